//! Tile server lifecycle.
//!
//! This type owns lifecycle concerns only: assembling the shared state
//! from settings and the dataset registry, applying the global protection
//! layers, listening, graceful shutdown. Routing lives in `routes.rs`,
//! handlers in `handlers.rs`.

use super::{
	access::AccessIntake,
	auth::Authenticator,
	dataset::load_datasets,
	github::GithubAuth,
	identity::provider_from_settings,
	rate_limit::RateLimiter,
	routes,
	state::AppState,
	ticket::TicketClient,
};
use crate::config::{DatasetRegistry, Settings};
use anyhow::Result;
use axum::error_handling::HandleErrorLayer;
use axum::http::StatusCode;
use axum::{BoxError, response::IntoResponse};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::oneshot};
use tower::{
	ServiceBuilder, buffer::BufferLayer, limit::ConcurrencyLimitLayer, load_shed::LoadShedLayer, timeout::TimeoutLayer,
};
use tower_http::catch_panic::CatchPanicLayer;

pub struct TileServer {
	ip: String,
	port: u16,
	state: AppState,
	/// One-shot channel signalling graceful shutdown to the serving task.
	exit_signal: Option<oneshot::Sender<()>>,
	/// Join handle for the serving task; awaited in `stop()`.
	join: Option<tokio::task::JoinHandle<()>>,
}

impl TileServer {
	/// Assemble a server from environment settings and the dataset registry.
	///
	/// Dataset atlases that fail to load mark their dataset unavailable; the
	/// server still starts and serves the rest.
	pub fn from_settings(settings: &Settings, registry: &DatasetRegistry) -> TileServer {
		let datasets = load_datasets(registry);
		let state = AppState {
			datasets: Arc::new(datasets),
			auth: Arc::new(Authenticator::new(
				provider_from_settings(&settings.identity),
				settings.token_ttl,
			)),
			github: Arc::new(GithubAuth::new(&settings.ticket.api_url, &settings.ticket.repo)),
			limiter: settings
				.rate
				.enabled
				.then(|| Arc::new(RateLimiter::new(settings.rate.clone()))),
			intake: Arc::new(AccessIntake::new(settings.intake.clone())),
			ticket: Arc::new(TicketClient::new(settings.ticket.clone())),
			enable_auth: settings.enable_auth,
		};
		TileServer {
			ip: "0.0.0.0".to_string(),
			port: settings.port,
			state,
			exit_signal: None,
			join: None,
		}
	}

	/// Server over prebuilt state, bound to localhost. Used by tests and by
	/// the client test harness.
	pub fn with_state(state: AppState, port: u16) -> TileServer {
		TileServer {
			ip: "127.0.0.1".to_string(),
			port,
			state,
			exit_signal: None,
			join: None,
		}
	}

	/// Start listening. Idempotent: a running instance is stopped first.
	pub async fn start(&mut self) -> Result<()> {
		if self.exit_signal.is_some() || self.join.is_some() {
			self.stop().await;
		}

		let router = routes::build_router(self.state.clone());

		// Global backpressure, outermost handler first so axum sees an
		// infallible service: overload -> 503, panics caught, wall-time cap,
		// bounded queue, in-flight cap, shed when saturated.
		let overload_handler = HandleErrorLayer::new(|_err: BoxError| async move {
			let mut response = (StatusCode::SERVICE_UNAVAILABLE, "Service overloaded, try later").into_response();
			response.headers_mut().insert("Retry-After", "2".parse().unwrap());
			Ok::<_, std::convert::Infallible>(response)
		});
		let protection = ServiceBuilder::new()
			.layer(overload_handler)
			.layer(CatchPanicLayer::new())
			.layer(TimeoutLayer::new(Duration::from_secs(30)))
			.layer(BufferLayer::new(512))
			.layer(ConcurrencyLimitLayer::new(256))
			.layer(LoadShedLayer::new());
		let router = router.layer(protection);

		let addr = format!("{}:{}", self.ip, self.port);
		let listener = TcpListener::bind(&addr).await?;
		if self.port == 0 {
			self.port = listener.local_addr()?.port();
		}
		log::info!("tile server listening on {}:{}", self.ip, self.port);

		let (tx, rx) = oneshot::channel::<()>();
		let handle = tokio::spawn(async move {
			if let Err(err) = axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
				.with_graceful_shutdown(async {
					rx.await.ok();
				})
				.await
			{
				log::error!("server task exited with error: {err}");
			}
		});

		self.exit_signal = Some(tx);
		self.join = Some(handle);
		Ok(())
	}

	/// Trigger graceful shutdown and wait for the serving task (bounded).
	pub async fn stop(&mut self) {
		if self.exit_signal.is_none() && self.join.is_none() {
			return;
		}
		log::info!("stopping tile server");
		if let Some(tx) = self.exit_signal.take() {
			let _ = tx.send(());
		}
		if let Some(handle) = self.join.take() {
			match tokio::time::timeout(Duration::from_secs(10), handle).await {
				Ok(Err(join_err)) => log::warn!("server task join error: {join_err}"),
				Err(_) => log::warn!("server task did not shut down within timeout; continuing"),
				Ok(Ok(())) => {}
			}
		}
	}

	/// The bound port; with port 0 this is the assigned ephemeral port.
	pub fn port(&self) -> u16 {
		self.port
	}

	pub fn base_url(&self) -> String {
		format!("http://{}:{}", self.ip, self.port)
	}
}
