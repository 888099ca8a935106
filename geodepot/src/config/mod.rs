//! Runtime configuration.
//!
//! The server is configured entirely through environment variables (the
//! deployment contract inherited from the shell scripts that run it) plus
//! one JSON file: the dataset registry. [`Settings::from_env`] snapshots
//! the environment once at startup; nothing reads env vars afterwards.

mod datasets;
mod settings;

pub use datasets::{DataKind, DatasetConfig, DatasetRegistry};
pub use settings::{IdentitySettings, IntakeSettings, RateSettings, Settings, TicketSettings};
