//! Credential verification capability.
//!
//! The server never sees an account database; it asks an external identity
//! host whether a username/password pair is valid. The check is modeled as
//! a trait so the HTTP layer and the tests can run against an in-memory
//! table while production uses the SSH gateway.

use crate::config::IdentitySettings;
use anyhow::Result;
use async_trait::async_trait;
use std::{
	collections::HashMap,
	net::{TcpStream, ToSocketAddrs},
	sync::Arc,
	time::Duration,
};

#[async_trait]
pub trait IdentityProvider: Send + Sync {
	/// True iff the credentials are accepted. Transport failures (host down,
	/// timeout) count as rejection, not as an error the caller must handle.
	async fn verify(&self, username: &str, password: &str) -> bool;
}

/// Build the provider configured by the environment. Without an identity
/// host configured, credential logins are disabled (every attempt fails).
pub fn provider_from_settings(settings: &IdentitySettings) -> Arc<dyn IdentityProvider> {
	match &settings.host {
		Some(host) => Arc::new(SshIdentityProvider::new(host.clone(), settings.port, settings.timeout)),
		None => {
			log::warn!("SSH_HOST not set; credential logins will be rejected");
			Arc::new(StaticIdentityProvider::default())
		}
	}
}

/// Verifies credentials by opening an SSH session against the identity host.
/// Success iff the session authenticates within the timeout.
pub struct SshIdentityProvider {
	host: String,
	port: u16,
	timeout: Duration,
}

impl SshIdentityProvider {
	pub fn new(host: String, port: u16, timeout: Duration) -> SshIdentityProvider {
		SshIdentityProvider { host, port, timeout }
	}

	fn verify_blocking(host: &str, port: u16, timeout: Duration, username: &str, password: &str) -> Result<bool> {
		let address = (host, port)
			.to_socket_addrs()?
			.next()
			.ok_or_else(|| anyhow::anyhow!("identity host {host}:{port} did not resolve"))?;
		let stream = TcpStream::connect_timeout(&address, timeout)?;
		stream.set_read_timeout(Some(timeout))?;
		stream.set_write_timeout(Some(timeout))?;

		let mut session = ssh2::Session::new()?;
		session.set_timeout(timeout.as_millis() as u32);
		session.set_tcp_stream(stream);
		session.handshake()?;

		match session.userauth_password(username, password) {
			Ok(()) => Ok(session.authenticated()),
			Err(_) => Ok(false),
		}
	}
}

#[async_trait]
impl IdentityProvider for SshIdentityProvider {
	async fn verify(&self, username: &str, password: &str) -> bool {
		let (host, port, timeout) = (self.host.clone(), self.port, self.timeout);
		let (username, password) = (username.to_string(), password.to_string());

		// The ssh2 session is blocking; keep it off the runtime workers and
		// bound the whole exchange, handshake included.
		let check = tokio::task::spawn_blocking(move || {
			SshIdentityProvider::verify_blocking(&host, port, timeout, &username, &password)
		});
		match tokio::time::timeout(timeout + Duration::from_secs(1), check).await {
			Ok(Ok(Ok(accepted))) => accepted,
			Ok(Ok(Err(err))) => {
				log::debug!("identity check failed: {err:#}");
				false
			}
			Ok(Err(join_err)) => {
				log::warn!("identity check task failed: {join_err}");
				false
			}
			Err(_) => {
				log::debug!("identity check timed out");
				false
			}
		}
	}
}

/// In-memory user table. Used in tests and as the rejection stub when no
/// identity host is configured.
#[derive(Default)]
pub struct StaticIdentityProvider {
	users: HashMap<String, String>,
}

impl StaticIdentityProvider {
	pub fn with_user(username: &str, password: &str) -> StaticIdentityProvider {
		let mut users = HashMap::new();
		users.insert(username.to_string(), password.to_string());
		StaticIdentityProvider { users }
	}
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
	async fn verify(&self, username: &str, password: &str) -> bool {
		self.users.get(username).is_some_and(|expected| expected == password)
	}
}
