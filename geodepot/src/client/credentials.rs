//! Credential and approval capability for the differential cache.
//!
//! The cache itself never prompts; whoever embeds it decides how to obtain
//! credentials and whether a download may proceed. The CLI installs an
//! interactive provider, tests and batch jobs use [`NonInteractive`].

use anyhow::{Result, bail};

#[derive(Clone, Debug)]
pub struct Credentials {
	pub username: String,
	pub password: String,
}

pub trait CredentialProvider: Send + Sync {
	/// Called whenever the server demands (re-)authentication. Interactive
	/// implementations may prompt again on every call.
	fn credentials(&self) -> Result<Credentials>;

	/// Asked once per reconcile before any download starts.
	fn approve_download(&self, filenames: &[String]) -> bool;
}

/// Fixed credentials (or none) and auto-approval; for scripts and tests.
#[derive(Default)]
pub struct NonInteractive {
	credentials: Option<Credentials>,
}

impl NonInteractive {
	pub fn new() -> NonInteractive {
		NonInteractive::default()
	}

	pub fn with_credentials(username: &str, password: &str) -> NonInteractive {
		NonInteractive {
			credentials: Some(Credentials {
				username: username.to_string(),
				password: password.to_string(),
			}),
		}
	}
}

impl CredentialProvider for NonInteractive {
	fn credentials(&self) -> Result<Credentials> {
		match &self.credentials {
			Some(credentials) => Ok(credentials.clone()),
			None => bail!("server requires authentication but no credentials are configured"),
		}
	}

	fn approve_download(&self, _filenames: &[String]) -> bool {
		true
	}
}
