use std::{env, path::PathBuf, time::Duration};

/// Snapshot of all server settings read from the environment.
#[derive(Clone, Debug)]
pub struct Settings {
	/// Listening port (`PORT`).
	pub port: u16,
	/// Master switch for bearer-token auth (`ENABLE_AUTH`). When off, every
	/// endpoint is public and token issuance returns a pseudo-token.
	pub enable_auth: bool,
	/// Token lifetime (`TOKEN_TTL_SECONDS`).
	pub token_ttl: Duration,
	pub identity: IdentitySettings,
	pub rate: RateSettings,
	pub intake: IntakeSettings,
	pub ticket: TicketSettings,
}

/// Where credentials are checked (`SSH_HOST`/`SSH_PORT`).
#[derive(Clone, Debug)]
pub struct IdentitySettings {
	pub host: Option<String>,
	pub port: u16,
	pub timeout: Duration,
}

/// General request rate limiting.
#[derive(Clone, Debug)]
pub struct RateSettings {
	pub enabled: bool,
	/// Max requests per source IP within the window (`RATE_REQ_LIMIT`).
	pub per_ip: usize,
	/// Sliding window length (`RATE_TIME_WINDOW`, seconds).
	pub window: Duration,
	/// Max requests across all sources within the window (`RATE_GLOBAL_LIMIT`).
	pub global: usize,
	/// Minimum spacing between requests from one source
	/// (`RATE_MIN_INTERVAL_MS`, 0 disables the axis).
	pub min_interval: Duration,
}

/// Access-request intake: persistence directory and its own throttle.
#[derive(Clone, Debug)]
pub struct IntakeSettings {
	pub dir: PathBuf,
	pub window: Duration,
	pub min_interval: Duration,
	pub max_per_ip: usize,
	pub max_per_email: usize,
	pub max_body_bytes: usize,
}

/// Best-effort external ticket creation for access requests.
#[derive(Clone, Debug)]
pub struct TicketSettings {
	pub api_url: String,
	pub repo: String,
	pub token: Option<String>,
	pub labels: Vec<String>,
}

impl Settings {
	pub fn from_env() -> Settings {
		Settings {
			port: env_u64("PORT", 8001) as u16,
			enable_auth: env_bool("ENABLE_AUTH", true),
			token_ttl: Duration::from_secs(env_u64("TOKEN_TTL_SECONDS", 3600)),
			identity: IdentitySettings {
				host: env_string("SSH_HOST"),
				port: env_u64("SSH_PORT", 22) as u16,
				timeout: Duration::from_secs(5),
			},
			rate: RateSettings {
				enabled: env_bool("ENABLE_RATE_LIMIT", true),
				per_ip: env_u64("RATE_REQ_LIMIT", 5) as usize,
				window: Duration::from_secs(env_u64("RATE_TIME_WINDOW", 30)),
				global: env_u64("RATE_GLOBAL_LIMIT", 20) as usize,
				min_interval: Duration::from_millis(env_u64("RATE_MIN_INTERVAL_MS", 0)),
			},
			intake: IntakeSettings {
				dir: PathBuf::from(
					env_string("ACCESS_REQUESTS_DIR").unwrap_or_else(|| "/var/lib/geodepot/access_requests".to_string()),
				),
				window: Duration::from_secs(env_u64("ACCESS_REQ_WINDOW_SECONDS", 3600)),
				min_interval: Duration::from_secs(env_u64("ACCESS_REQ_MIN_INTERVAL_SECONDS", 30)),
				max_per_ip: env_u64("ACCESS_REQ_MAX_PER_IP", 5) as usize,
				max_per_email: env_u64("ACCESS_REQ_MAX_PER_EMAIL", 3) as usize,
				max_body_bytes: env_u64("ACCESS_REQ_MAX_BODY_BYTES", 2048) as usize,
			},
			ticket: TicketSettings {
				api_url: env_string("TICKET_API_URL").unwrap_or_else(|| "https://api.github.com".to_string()),
				repo: env_string("TICKET_REPO").unwrap_or_default(),
				token: env_string("TICKET_TOKEN"),
				labels: env_string("TICKET_LABELS")
					.unwrap_or_else(|| "access-request".to_string())
					.split(',')
					.map(str::trim)
					.filter(|s| !s.is_empty())
					.map(str::to_string)
					.collect(),
			},
		}
	}
}

fn env_string(name: &str) -> Option<String> {
	env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_u64(name: &str, default: u64) -> u64 {
	match env_string(name) {
		Some(value) => value.parse().unwrap_or_else(|_| {
			log::warn!("ignoring unparseable {name}={value:?}; using default {default}");
			default
		}),
		None => default,
	}
}

fn env_bool(name: &str, default: bool) -> bool {
	match env_string(name) {
		Some(value) => matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
		None => default,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	// Env-var tests mutate process state, so everything lives in one test.
	#[test]
	fn env_helpers() {
		unsafe {
			env::set_var("GEODEPOT_TEST_INT", "42");
			env::set_var("GEODEPOT_TEST_BAD_INT", "forty-two");
			env::set_var("GEODEPOT_TEST_BOOL", "Yes");
			env::set_var("GEODEPOT_TEST_EMPTY", "  ");
		}
		assert_eq!(env_u64("GEODEPOT_TEST_INT", 7), 42);
		assert_eq!(env_u64("GEODEPOT_TEST_BAD_INT", 7), 7);
		assert_eq!(env_u64("GEODEPOT_TEST_MISSING", 7), 7);
		assert!(env_bool("GEODEPOT_TEST_BOOL", false));
		assert!(!env_bool("GEODEPOT_TEST_BAD_INT", true));
		assert_eq!(env_string("GEODEPOT_TEST_EMPTY"), None);
	}
}
