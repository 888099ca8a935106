//! The tile server: discovery, file delivery, authentication, rate
//! limiting and access-request intake over one axum router.

pub mod access;
pub mod archive;
pub mod auth;
pub mod dataset;
pub mod error;
pub mod github;
pub mod handlers;
pub mod identity;
pub mod rate_limit;
pub mod routes;
pub mod state;
pub mod ticket;
pub mod tile_server;

pub use auth::Authenticator;
pub use dataset::Dataset;
pub use error::ApiError;
pub use state::AppState;
pub use tile_server::TileServer;
