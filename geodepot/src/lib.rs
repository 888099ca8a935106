//! geodepot: a spatial tile distribution service.
//!
//! Two halves share one core:
//! - [`server`] answers "which tiles cover this bbox" and "give me this
//!   tile" over HTTP, gated by bearer tokens and rate limiting, with an
//!   access-request intake for onboarding.
//! - [`client`] keeps a local tile mirror consistent with a server by
//!   reconciling bounding boxes: discover, diff by filename, download the
//!   missing tiles as one archive, update the local atlas atomically.
//!
//! Catalog types and rectangle math live in the `geodepot_core` crate.

pub mod client;
pub mod config;
pub mod server;
