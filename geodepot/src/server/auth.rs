//! Token issuance and validation.
//!
//! Tokens are opaque 128-bit random strings held only in process memory,
//! each bound to the username it was issued for and an expiry instant.
//! There is no refresh: an expired token is deleted on first sight and the
//! client re-authenticates.

use super::identity::IdentityProvider;
use parking_lot::Mutex;
use std::{
	collections::HashMap,
	sync::Arc,
	time::{Duration, Instant},
};

/// The pseudo-token handed out when auth is disabled.
pub const ANONYMOUS_TOKEN: &str = "anonymous";

struct TokenEntry {
	username: String,
	expires_at: Instant,
}

pub struct Authenticator {
	tokens: Mutex<HashMap<String, TokenEntry>>,
	ttl: Duration,
	provider: Arc<dyn IdentityProvider>,
}

impl Authenticator {
	pub fn new(provider: Arc<dyn IdentityProvider>, ttl: Duration) -> Authenticator {
		Authenticator {
			tokens: Mutex::new(HashMap::new()),
			ttl,
			provider,
		}
	}

	pub fn ttl(&self) -> Duration {
		self.ttl
	}

	/// Check credentials against the identity provider and mint a token on
	/// success.
	pub async fn login(&self, username: &str, password: &str) -> Option<String> {
		if self.provider.verify(username, password).await {
			Some(self.issue(username))
		} else {
			None
		}
	}

	/// Mint a token for an already-verified identity.
	pub fn issue(&self, username: &str) -> String {
		let token = random_token();
		self.tokens.lock().insert(
			token.clone(),
			TokenEntry {
				username: username.to_string(),
				expires_at: Instant::now() + self.ttl,
			},
		);
		log::debug!("issued token for user '{username}'");
		token
	}

	/// Resolve a token to its username. Expired entries are removed eagerly.
	pub fn validate(&self, token: &str) -> Option<String> {
		let mut tokens = self.tokens.lock();
		match tokens.get(token) {
			Some(entry) if entry.expires_at > Instant::now() => Some(entry.username.clone()),
			Some(_) => {
				tokens.remove(token);
				None
			}
			None => None,
		}
	}

	#[cfg(test)]
	pub fn token_count(&self) -> usize {
		self.tokens.lock().len()
	}
}

fn random_token() -> String {
	let bytes: [u8; 16] = rand::random();
	bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::server::identity::StaticIdentityProvider;

	fn authenticator(ttl: Duration) -> Authenticator {
		Authenticator::new(Arc::new(StaticIdentityProvider::with_user("alice", "secret")), ttl)
	}

	#[test]
	fn tokens_are_opaque_and_distinct() {
		let auth = authenticator(Duration::from_secs(60));
		let a = auth.issue("alice");
		let b = auth.issue("alice");
		assert_ne!(a, b);
		assert_eq!(a.len(), 32);
		assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
	}

	#[test]
	fn validate_returns_issuing_identity() {
		let auth = authenticator(Duration::from_secs(60));
		let token = auth.issue("alice");
		assert_eq!(auth.validate(&token).as_deref(), Some("alice"));
		assert_eq!(auth.validate("deadbeef"), None);
	}

	#[test]
	fn expired_token_is_rejected_and_removed() {
		let auth = authenticator(Duration::from_millis(10));
		let token = auth.issue("alice");
		std::thread::sleep(Duration::from_millis(30));
		assert_eq!(auth.validate(&token), None);
		assert_eq!(auth.token_count(), 0, "expired entry should be deleted eagerly");
	}

	#[tokio::test]
	async fn login_checks_the_identity_provider() {
		let auth = authenticator(Duration::from_secs(60));
		let token = auth.login("alice", "secret").await.expect("valid credentials");
		assert_eq!(auth.validate(&token).as_deref(), Some("alice"));
		assert!(auth.login("alice", "wrong").await.is_none());
	}
}
