//! Best-effort external ticket creation for access requests.
//!
//! Runs after the record is already durable; any failure here is logged
//! and reported back as `ticket_created: false`, never as a request error.

use super::access::AccessRecord;
use crate::config::TicketSettings;
use serde_json::{Value, json};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct TicketOutcome {
	pub created: bool,
	pub url: Option<String>,
	pub id: Option<i64>,
	pub error: Option<String>,
}

pub struct TicketClient {
	settings: TicketSettings,
	http: reqwest::Client,
}

impl TicketClient {
	pub fn new(settings: TicketSettings) -> TicketClient {
		TicketClient {
			settings,
			http: reqwest::Client::builder()
				.timeout(Duration::from_secs(10))
				.build()
				.expect("reqwest client"),
		}
	}

	pub async fn create(&self, record: &AccessRecord) -> TicketOutcome {
		let Some(token) = &self.settings.token else {
			return TicketOutcome {
				error: Some("missing token".to_string()),
				..TicketOutcome::default()
			};
		};
		if self.settings.repo.is_empty() {
			return TicketOutcome {
				error: Some("missing repo".to_string()),
				..TicketOutcome::default()
			};
		}

		let url = format!(
			"{}/repos/{}/issues",
			self.settings.api_url.trim_end_matches('/'),
			self.settings.repo
		);
		let payload = json!({
			"title": format!(
				"Access request: {} {} ({})",
				record.name, record.surname, record.github_username
			),
			"body": format!(
				"New access request received:\n\nName: {} {}\nEmail: {}\nGitHub: {}\nRemote: {}\nTimestamp: {}\nUser-Agent: {}",
				record.name,
				record.surname,
				record.email,
				record.github_username,
				record.remote_addr,
				record.timestamp,
				record.user_agent,
			),
			"labels": self.settings.labels,
		});

		let response = self
			.http
			.post(&url)
			.header("Authorization", format!("token {token}"))
			.header("Accept", "application/vnd.github+json")
			.header("User-Agent", "geodepot-server")
			.json(&payload)
			.send()
			.await;

		match response {
			Ok(response) if response.status().is_success() => {
				let body = response.json::<Value>().await.unwrap_or(Value::Null);
				TicketOutcome {
					created: true,
					url: body
						.get("html_url")
						.or_else(|| body.get("url"))
						.and_then(Value::as_str)
						.map(str::to_string),
					id: body.get("number").and_then(Value::as_i64),
					error: None,
				}
			}
			Ok(response) => TicketOutcome {
				error: Some(format!("http {}", response.status().as_u16())),
				..TicketOutcome::default()
			},
			Err(err) => TicketOutcome {
				error: Some(err.to_string()),
				..TicketOutcome::default()
			},
		}
	}
}
