//! The client half: a local tile mirror kept consistent with the server
//! through differential reconciliation.

pub mod cache;
pub mod credentials;
pub mod supersets;

pub use cache::{CacheSettings, DatasetRef, DifferentialCache, ReconcileOutcome};
pub use credentials::{CredentialProvider, Credentials, NonInteractive};
pub use supersets::SupersetRegistry;
