//! External-identity authentication via GitHub repository permission.
//!
//! Collaborators on the access-control repository can trade a GitHub token
//! for a local bearer token without an account on the identity host. The
//! bar is write permission or better on the configured repository.

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;
use std::time::Duration;

const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = "geodepot-server";

/// Outcome of an external identity check.
#[derive(Debug, PartialEq, Eq)]
pub enum ExternalIdentity {
	Verified { login: String },
	Denied { reason: String },
}

pub struct GithubAuth {
	api_url: String,
	repo: String,
	http: reqwest::Client,
}

impl GithubAuth {
	pub fn new(api_url: &str, repo: &str) -> GithubAuth {
		GithubAuth {
			api_url: api_url.trim_end_matches('/').to_string(),
			repo: repo.to_string(),
			http: reqwest::Client::builder()
				.timeout(Duration::from_secs(10))
				.build()
				.expect("reqwest client"),
		}
	}

	/// Verify a GitHub token and require >= write permission on the repo.
	pub async fn check(&self, token: &str) -> Result<ExternalIdentity> {
		let headers = self.headers(token)?;

		let (status, user) = self.get_json(&format!("{}/user", self.api_url), &headers).await?;
		if status != 200 {
			return Ok(ExternalIdentity::Denied {
				reason: format!("user check http {status}"),
			});
		}

		let (status, repo) = self
			.get_json(&format!("{}/repos/{}", self.api_url, self.repo), &headers)
			.await?;
		if status != 200 {
			// 404 also covers "no access at all" for private repos.
			return Ok(ExternalIdentity::Denied {
				reason: format!("repo check http {status}"),
			});
		}

		let level = permission_level(repo.get("permissions").unwrap_or(&Value::Null));
		if level >= PERMISSION_WRITE {
			let login = user
				.get("login")
				.and_then(Value::as_str)
				.map(str::to_string)
				.unwrap_or_else(|| format!("github:{}", user.get("id").and_then(Value::as_i64).unwrap_or(0)));
			Ok(ExternalIdentity::Verified { login })
		} else {
			Ok(ExternalIdentity::Denied {
				reason: "insufficient permission".to_string(),
			})
		}
	}

	fn headers(&self, token: &str) -> Result<HeaderMap> {
		let mut headers = HeaderMap::new();
		headers.insert(
			"Authorization",
			HeaderValue::from_str(&format!("token {token}")).context("token is not a valid header value")?,
		);
		headers.insert("Accept", HeaderValue::from_static("application/vnd.github+json"));
		headers.insert("X-GitHub-Api-Version", HeaderValue::from_static(API_VERSION));
		headers.insert("User-Agent", HeaderValue::from_static(USER_AGENT));
		Ok(headers)
	}

	async fn get_json(&self, url: &str, headers: &HeaderMap) -> Result<(u16, Value)> {
		let response = self
			.http
			.get(url)
			.headers(headers.clone())
			.send()
			.await
			.with_context(|| format!("requesting {url}"))?;
		let status = response.status().as_u16();
		let body = response.json::<Value>().await.unwrap_or(Value::Null);
		Ok((status, body))
	}
}

const PERMISSION_READ: u8 = 1;
const PERMISSION_TRIAGE: u8 = 2;
const PERMISSION_WRITE: u8 = 3;
const PERMISSION_MAINTAIN: u8 = 4;
const PERMISSION_ADMIN: u8 = 5;

/// Map the GitHub `permissions` object to a single ordered level.
fn permission_level(permissions: &Value) -> u8 {
	let has = |key: &str| permissions.get(key).and_then(Value::as_bool).unwrap_or(false);
	if has("admin") {
		PERMISSION_ADMIN
	} else if has("maintain") {
		PERMISSION_MAINTAIN
	} else if has("push") {
		PERMISSION_WRITE
	} else if has("triage") {
		PERMISSION_TRIAGE
	} else if has("pull") {
		PERMISSION_READ
	} else {
		0
	}
}
