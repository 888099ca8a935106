use super::{
	access::AccessIntake, auth::Authenticator, dataset::Dataset, github::GithubAuth, rate_limit::RateLimiter,
	ticket::TicketClient,
};
use std::{collections::BTreeMap, sync::Arc};

/// Shared state handed to every request handler.
///
/// Everything mutable lives behind its own capability (token map, rate
/// counters, intake throttle); the dataset map itself is read-only after
/// startup.
#[derive(Clone)]
pub struct AppState {
	pub datasets: Arc<BTreeMap<String, Arc<Dataset>>>,
	pub auth: Arc<Authenticator>,
	pub github: Arc<GithubAuth>,
	pub limiter: Option<Arc<RateLimiter>>,
	pub intake: Arc<AccessIntake>,
	pub ticket: Arc<TicketClient>,
	pub enable_auth: bool,
}
