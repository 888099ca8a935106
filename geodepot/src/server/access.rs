//! Access-request intake: validated form posts with a durable append-only
//! log and an independent throttle.
//!
//! The throttle state and the log share a single guard so the counters
//! stay honest under bursts: two concurrent submissions from the same
//! email cannot both pass the interval check and both persist.

use super::error::ApiError;
use crate::config::IntakeSettings;
use geodepot_core::io::append_line_durable;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
	collections::HashMap,
	path::PathBuf,
	time::Instant,
};

pub const LOG_FILENAME: &str = "requests.jsonl";

lazy_static! {
	static ref NAME_RE: Regex = Regex::new(r"^[A-Za-zÀ-ÖØ-öø-ÿ' -]{2,100}$").unwrap();
}

/// The four-field form body.
#[derive(Clone, Debug, Deserialize)]
pub struct AccessRequest {
	pub name: String,
	pub surname: String,
	pub email: String,
	pub github_username: String,
}

/// One persisted intake record; a single JSON line in the log.
#[derive(Clone, Debug, Serialize)]
pub struct AccessRecord {
	pub name: String,
	pub surname: String,
	pub email: String,
	pub github_username: String,
	/// UTC, RFC 3339.
	pub timestamp: String,
	pub remote_addr: String,
	pub user_agent: String,
}

pub fn valid_name(s: &str) -> bool {
	NAME_RE.is_match(s)
}

pub fn valid_email(email: &str) -> bool {
	if email.len() > 254 || email.contains(' ') {
		return false;
	}
	let mut parts = email.split('@');
	let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
		return false;
	};
	!local.is_empty() && !domain.is_empty() && !domain.starts_with('.') && !domain.ends_with('.') && domain.contains('.')
}

/// The upstream username rule: 1-39 chars, alphanumeric or hyphen, starting
/// alphanumeric, no doubled or trailing hyphen. (The upstream expresses the
/// hyphen rules with a lookahead, which `regex` does not support.)
pub fn valid_github_username(s: &str) -> bool {
	if s.is_empty() || s.len() > 39 {
		return false;
	}
	let bytes = s.as_bytes();
	if !bytes[0].is_ascii_alphanumeric() || *bytes.last().unwrap() == b'-' {
		return false;
	}
	bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-') && !s.contains("--")
}

/// Validate and trim a request body into its persisted fields, without the
/// request metadata.
pub fn validate(request: &AccessRequest) -> Result<(String, String, String, String), ApiError> {
	let name = request.name.trim().to_string();
	let surname = request.surname.trim().to_string();
	let email = request.email.trim().to_string();
	let github_username = request.github_username.trim().to_string();

	if !valid_name(&name) {
		return Err(ApiError::BadRequest("Invalid name".to_string()));
	}
	if !valid_name(&surname) {
		return Err(ApiError::BadRequest("Invalid surname".to_string()));
	}
	if !valid_email(&email) {
		return Err(ApiError::BadRequest("Invalid email address".to_string()));
	}
	if !valid_github_username(&github_username) {
		return Err(ApiError::BadRequest("Invalid GitHub username".to_string()));
	}
	Ok((name, surname, email, github_username))
}

pub struct AccessIntake {
	settings: IntakeSettings,
	state: Mutex<Throttle>,
}

#[derive(Default)]
struct Throttle {
	per_ip: HashMap<String, Vec<Instant>>,
	per_email: HashMap<String, Vec<Instant>>,
}

impl AccessIntake {
	pub fn new(settings: IntakeSettings) -> AccessIntake {
		AccessIntake {
			settings,
			state: Mutex::new(Throttle::default()),
		}
	}

	pub fn max_body_bytes(&self) -> usize {
		self.settings.max_body_bytes
	}

	/// Throttle-check, then persist. Only returns `Ok` once the record is
	/// fsynced to the log.
	pub fn submit(&self, record: &AccessRecord) -> Result<PathBuf, ApiError> {
		let now = Instant::now();
		let email_key = record.email.trim().to_lowercase();
		let line = serde_json::to_string(record).map_err(|err| ApiError::Internal(format!("encoding record: {err}")))?;

		let mut state = self.state.lock();
		self.admit(&mut state.per_ip, &record.remote_addr, now, self.settings.max_per_ip, "ip")?;
		self.admit(&mut state.per_email, &email_key, now, self.settings.max_per_email, "email")?;

		state.per_ip.entry(record.remote_addr.clone()).or_default().push(now);
		state.per_email.entry(email_key).or_default().push(now);

		let path = self.append(&line)?;
		Ok(path)
	}

	fn admit(
		&self,
		log: &mut HashMap<String, Vec<Instant>>,
		key: &str,
		now: Instant,
		max: usize,
		axis: &str,
	) -> Result<(), ApiError> {
		let entries = log.entry(key.to_string()).or_default();
		entries.retain(|t| now.duration_since(*t) <= self.settings.window);
		if let Some(last) = entries.last() {
			if now.duration_since(*last) < self.settings.min_interval {
				return Err(ApiError::RateLimited {
					detail: format!("Too many requests ({axis} interval)"),
					retry_after: self.settings.min_interval.as_secs().max(1),
				});
			}
		}
		if entries.len() >= max {
			return Err(ApiError::RateLimited {
				detail: format!("Too many requests ({axis} window)"),
				retry_after: self.settings.window.as_secs().max(1),
			});
		}
		Ok(())
	}

	fn append(&self, line: &str) -> Result<PathBuf, ApiError> {
		let path = self.settings.dir.join(LOG_FILENAME);
		match append_line_durable(&path, line) {
			Ok(()) => Ok(path),
			Err(err) => {
				// Configured directory may be unwritable (read-only mount);
				// fall back next to the working directory rather than dropping
				// the record.
				log::warn!("cannot append to {path:?} ({err:#}); falling back to ./access_requests");
				let fallback = PathBuf::from("access_requests").join(LOG_FILENAME);
				append_line_durable(&fallback, line)
					.map_err(|err| ApiError::Internal(format!("failed to persist request: {err:#}")))?;
				Ok(fallback)
			}
		}
	}
}
