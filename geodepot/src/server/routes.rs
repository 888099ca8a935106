//! Router composition and cross-cutting middleware.
//!
//! Wiring only: handlers live in `handlers.rs`, lifecycle in
//! `tile_server.rs`. The middleware stack is ordered so rate limiting
//! runs before authentication, keeping unauthenticated floods cheap.

use super::{error::ApiError, handlers, state::AppState};
use axum::{
	Router,
	extract::{ConnectInfo, Request, State},
	http::header,
	middleware::{self, Next},
	response::{IntoResponse, Response},
	routing::{get, post},
};
use std::net::{IpAddr, SocketAddr};

/// Paths that bypass the token check: health, root, token issuance, the
/// external-identity callback, access-request intake and docs.
pub fn is_public(path: &str) -> bool {
	matches!(
		path,
		"/" | "/healthz" | "/auth/token" | "/auth/github" | "/access/request" | "/docs"
	)
}

pub fn build_router(state: AppState) -> Router {
	let mut router = Router::new()
		.route("/", get(handlers::root))
		.route("/healthz", get(handlers::health))
		.route("/auth/token", post(handlers::create_token))
		.route("/auth/github", post(handlers::external_auth))
		.route("/access/request", post(handlers::request_access))
		.route("/datasets/{dataset}/tiles", post(handlers::discover))
		.route("/datasets/{dataset}/download", post(handlers::download_batch))
		.route("/files/{kind}/{dataset}/{filename}", get(handlers::get_file))
		.route("/get/{kind}/{filename}", get(handlers::get_file_compat))
		.with_state(state.clone());

	// The layer added last runs first: rate limiting sits outside auth.
	router = router.layer(middleware::from_fn_with_state(state.clone(), auth_middleware));
	if state.limiter.is_some() {
		router = router.layer(middleware::from_fn_with_state(state, rate_limit_middleware));
	}
	router
}

async fn rate_limit_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
	if let Some(limiter) = &state.limiter {
		let ip = request
			.extensions()
			.get::<ConnectInfo<SocketAddr>>()
			.map_or(IpAddr::from([0, 0, 0, 0]), |info| info.0.ip());
		if let Err(rejection) = limiter.check(ip) {
			log::debug!("rate limited {ip}: {}", rejection.detail);
			return ApiError::RateLimited {
				detail: rejection.detail.to_string(),
				retry_after: rejection.retry_after,
			}
			.into_response();
		}
	}
	next.run(request).await
}

async fn auth_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
	if !state.enable_auth || is_public(request.uri().path()) {
		return next.run(request).await;
	}

	let bearer = request
		.headers()
		.get(header::AUTHORIZATION)
		.and_then(|value| value.to_str().ok())
		.and_then(|value| value.strip_prefix("Bearer "));
	let Some(token) = bearer else {
		return ApiError::Unauthorized("Missing or invalid Authorization header".to_string()).into_response();
	};
	if state.auth.validate(token.trim()).is_none() {
		return ApiError::Unauthorized("Invalid or expired token".to_string()).into_response();
	}
	next.run(request).await
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use crate::{
		config::{DataKind, IntakeSettings, TicketSettings},
		server::{
			access::AccessIntake,
			auth::Authenticator,
			dataset::Dataset,
			github::GithubAuth,
			identity::StaticIdentityProvider,
			ticket::TicketClient,
		},
	};
	use axum::{
		body::{Body, to_bytes},
		http::{Request as HttpRequest, StatusCode},
	};
	use geodepot_core::{Atlas, GridAtlas, GridEntry, VectorAtlas};
	use geodepot_core::{DimensionRounding, TileDescriptor};
	use serde_json::{Value, json};
	use std::{collections::BTreeMap, path::PathBuf, sync::Arc, time::Duration};
	use tower::ServiceExt as _;

	/// State with one vector and one grid dataset over temp directories.
	pub(crate) fn test_state(enable_auth: bool, data_dir: PathBuf, intake_dir: PathBuf) -> AppState {
		let mut vector = VectorAtlas::new();
		vector.insert(
			(0, 0),
			geodepot_core::VectorEntry {
				filename: "tile_0_0.gpkg".to_string(),
				bounds: geodepot_core::TileBounds::new(0.0, 0.0, 100.0, 100.0).unwrap(),
				width: 100.0,
				height: 100.0,
			},
		);

		let mut grid = GridAtlas::new(DimensionRounding::PromoteNinetyNine);
		grid.insert(
			0,
			0,
			GridEntry {
				filename: "t_0_0.laz".to_string(),
				width: 2499,
				height: 2499,
			},
		);

		let mut datasets = BTreeMap::new();
		datasets.insert(
			"gpkg".to_string(),
			Arc::new(Dataset {
				name: "gpkg".to_string(),
				kind: DataKind::Gpkg,
				data_dir: data_dir.clone(),
				atlas: Some(Atlas::Vector(vector)),
			}),
		);
		datasets.insert(
			"lidar".to_string(),
			Arc::new(Dataset {
				name: "lidar".to_string(),
				kind: DataKind::Lidar,
				data_dir,
				atlas: Some(Atlas::Grid(grid)),
			}),
		);
		datasets.insert(
			"zz-broken".to_string(),
			Arc::new(Dataset {
				name: "zz-broken".to_string(),
				kind: DataKind::Gpkg,
				data_dir: PathBuf::from("/nonexistent"),
				atlas: None,
			}),
		);

		let ticket_settings = TicketSettings {
			api_url: "http://127.0.0.1:9".to_string(),
			repo: String::new(),
			token: None,
			labels: vec![],
		};

		AppState {
			datasets: Arc::new(datasets),
			auth: Arc::new(Authenticator::new(
				Arc::new(StaticIdentityProvider::with_user("alice", "secret")),
				Duration::from_secs(60),
			)),
			github: Arc::new(GithubAuth::new(&ticket_settings.api_url, "nobody/nothing")),
			limiter: None,
			intake: Arc::new(AccessIntake::new(IntakeSettings {
				dir: intake_dir,
				window: Duration::from_secs(60),
				min_interval: Duration::ZERO,
				max_per_ip: 10,
				max_per_email: 10,
				max_body_bytes: 2048,
			})),
			ticket: Arc::new(TicketClient::new(ticket_settings)),
			enable_auth,
		}
	}

	async fn call(router: &Router, method: &str, path: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
		let mut builder = HttpRequest::builder().method(method).uri(path);
		if let Some(token) = token {
			builder = builder.header("Authorization", format!("Bearer {token}"));
		}
		let request = match body {
			Some(body) => builder
				.header("content-type", "application/json")
				.body(Body::from(body.to_string()))
				.unwrap(),
			None => builder.body(Body::empty()).unwrap(),
		};
		let response = router.clone().oneshot(request).await.unwrap();
		let status = response.status();
		let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
		let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
		(status, value)
	}

	fn router_with_auth() -> Router {
		let dir = std::env::temp_dir();
		build_router(test_state(true, dir.clone(), dir))
	}

	#[tokio::test]
	async fn public_endpoints_skip_the_token_check() {
		let router = router_with_auth();
		let (status, body) = call(&router, "GET", "/healthz", None, None).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["status"], "ok");

		let (status, _) = call(&router, "GET", "/", None, None).await;
		assert_eq!(status, StatusCode::OK);
	}

	#[tokio::test]
	async fn protected_endpoints_require_a_token() {
		let router = router_with_auth();
		let bbox = json!({"minx": 0.0, "miny": 0.0, "maxx": 50.0, "maxy": 50.0});

		let (status, _) = call(&router, "POST", "/datasets/gpkg/tiles", None, Some(bbox.clone())).await;
		assert_eq!(status, StatusCode::UNAUTHORIZED);

		let (status, _) = call(&router, "POST", "/datasets/gpkg/tiles", Some("bogus"), Some(bbox)).await;
		assert_eq!(status, StatusCode::UNAUTHORIZED);
	}

	#[tokio::test]
	async fn token_flow_and_discovery() {
		let router = router_with_auth();

		let (status, body) = call(
			&router,
			"POST",
			"/auth/token",
			None,
			Some(json!({"username": "alice", "password": "secret"})),
		)
		.await;
		assert_eq!(status, StatusCode::OK);
		let token = body["token"].as_str().unwrap().to_string();

		let (status, body) = call(
			&router,
			"POST",
			"/datasets/gpkg/tiles",
			Some(&token),
			Some(json!({"minx": 50.0, "miny": 50.0, "maxx": 150.0, "maxy": 150.0})),
		)
		.await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["num_tiles"], 1);
		assert_eq!(body["tiles"][0], "tile_0_0.gpkg");
	}

	#[tokio::test]
	async fn bad_credentials_are_unauthorized() {
		let router = router_with_auth();
		let (status, _) = call(
			&router,
			"POST",
			"/auth/token",
			None,
			Some(json!({"username": "alice", "password": "wrong"})),
		)
		.await;
		assert_eq!(status, StatusCode::UNAUTHORIZED);
	}

	#[tokio::test]
	async fn discovery_edge_cases() {
		let dir = std::env::temp_dir();
		let router = build_router(test_state(false, dir.clone(), dir));

		// Fully outside the atlas.
		let (status, _) = call(
			&router,
			"POST",
			"/datasets/gpkg/tiles",
			None,
			Some(json!({"minx": 200.0, "miny": 200.0, "maxx": 300.0, "maxy": 300.0})),
		)
		.await;
		assert_eq!(status, StatusCode::NOT_FOUND);

		// Edge contact intersects.
		let (status, body) = call(
			&router,
			"POST",
			"/datasets/gpkg/tiles",
			None,
			Some(json!({"minx": 100.0, "miny": 0.0, "maxx": 110.0, "maxy": 10.0})),
		)
		.await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["num_tiles"], 1);

		// Inverted bbox.
		let (status, _) = call(
			&router,
			"POST",
			"/datasets/gpkg/tiles",
			None,
			Some(json!({"minx": 10.0, "miny": 0.0, "maxx": 0.0, "maxy": 10.0})),
		)
		.await;
		assert_eq!(status, StatusCode::BAD_REQUEST);

		// Unknown dataset.
		let (status, _) = call(
			&router,
			"POST",
			"/datasets/mystery/tiles",
			None,
			Some(json!({"minx": 0.0, "miny": 0.0, "maxx": 1.0, "maxy": 1.0})),
		)
		.await;
		assert_eq!(status, StatusCode::NOT_FOUND);

		// Unavailable dataset -> internal error with a clear message.
		let (status, body) = call(
			&router,
			"POST",
			"/datasets/zz-broken/tiles",
			None,
			Some(json!({"minx": 0.0, "miny": 0.0, "maxx": 1.0, "maxy": 1.0})),
		)
		.await;
		assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
		assert!(body["detail"].as_str().unwrap().contains("not loaded"));
	}

	#[tokio::test]
	async fn lidar_discovery_returns_extents_and_applies_buffer() {
		let dir = std::env::temp_dir();
		let router = build_router(test_state(false, dir.clone(), dir));

		// Query away from the tile, pulled in range by the buffer.
		let (status, body) = call(
			&router,
			"POST",
			"/datasets/lidar/tiles",
			None,
			Some(json!({"xmin": 3000, "ymin": 3000, "xmax": 3100, "ymax": 3100, "buffer": 600})),
		)
		.await;
		assert_eq!(status, StatusCode::OK);
		let tile: TileDescriptor = serde_json::from_value(body["tiles"][0].clone()).unwrap();
		match tile {
			TileDescriptor::Extent { filename, xmax, ymax, .. } => {
				assert_eq!(filename, "t_0_0.laz");
				// 2499 promoted to 2500 by the rounding rule.
				assert_eq!((xmax, ymax), (2500, 2500));
			}
			other => panic!("expected extent descriptor, got {other:?}"),
		}

		// Same query without buffer misses.
		let (status, _) = call(
			&router,
			"POST",
			"/datasets/lidar/tiles",
			None,
			Some(json!({"xmin": 3000, "ymin": 3000, "xmax": 3100, "ymax": 3100})),
		)
		.await;
		assert_eq!(status, StatusCode::NOT_FOUND);
	}

	#[tokio::test]
	async fn file_requests_reject_traversal() {
		let dir = std::env::temp_dir();
		let router = build_router(test_state(false, dir.clone(), dir));

		let (status, _) = call(&router, "GET", "/files/gpkg/gpkg/..%2F..%2Fetc%2Fpasswd", None, None).await;
		assert!(
			status == StatusCode::BAD_REQUEST || status == StatusCode::NOT_FOUND,
			"traversal must not resolve, got {status}"
		);

		let (status, _) = call(&router, "GET", "/files/shapefile/gpkg/a.gpkg", None, None).await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
	}

	#[tokio::test]
	async fn single_file_roundtrip_and_compat_route() {
		let dir = assert_fs::TempDir::new().unwrap();
		std::fs::write(dir.path().join("tile_0_0.gpkg"), b"GPKG-BYTES").unwrap();
		let router = build_router(test_state(false, dir.path().to_path_buf(), dir.path().to_path_buf()));

		for path in ["/files/gpkg/gpkg/tile_0_0.gpkg", "/get/gpkg/tile_0_0.gpkg"] {
			let request = HttpRequest::builder().uri(path).body(Body::empty()).unwrap();
			let response = router.clone().oneshot(request).await.unwrap();
			assert_eq!(response.status(), StatusCode::OK, "{path}");
			assert_eq!(
				response.headers().get("content-type").unwrap(),
				"application/octet-stream"
			);
			let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
			assert_eq!(&bytes[..], b"GPKG-BYTES");
		}

		let (status, _) = call(&router, "GET", "/files/gpkg/gpkg/ghost.gpkg", None, None).await;
		assert_eq!(status, StatusCode::NOT_FOUND);
	}

	#[tokio::test]
	async fn access_request_validation_and_persistence() {
		let intake_dir = assert_fs::TempDir::new().unwrap();
		let router = build_router(test_state(
			true,
			std::env::temp_dir(),
			intake_dir.path().to_path_buf(),
		));

		// Malformed email -> 400, nothing written.
		let (status, _) = call(
			&router,
			"POST",
			"/access/request",
			None,
			Some(json!({"name": "Ada", "surname": "Lovelace", "email": "not-an-email", "github_username": "ada"})),
		)
		.await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert!(!intake_dir.path().join("requests.jsonl").exists());

		// Valid request -> accepted, durably logged, no external ticket
		// configured.
		let (status, body) = call(
			&router,
			"POST",
			"/access/request",
			None,
			Some(json!({"name": "Ada", "surname": "Lovelace", "email": "ada@example.com", "github_username": "ada"})),
		)
		.await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["accepted"], true);
		assert_eq!(body["ticket_created"], false);

		let log = std::fs::read_to_string(intake_dir.path().join("requests.jsonl")).unwrap();
		let record: Value = serde_json::from_str(log.lines().next().unwrap()).unwrap();
		assert_eq!(record["email"], "ada@example.com");
		assert!(record["timestamp"].as_str().unwrap().contains('T'));
	}

	#[tokio::test]
	async fn oversized_access_request_is_413() {
		let router = router_with_auth();
		let huge = "x".repeat(4096);
		let (status, _) = call(
			&router,
			"POST",
			"/access/request",
			None,
			Some(json!({"name": huge, "surname": "L", "email": "a@example.com", "github_username": "a"})),
		)
		.await;
		assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
	}

	#[tokio::test]
	async fn external_auth_without_token_is_refused_in_body() {
		let router = router_with_auth();
		let (status, body) = call(&router, "POST", "/auth/github", None, Some(json!({}))).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["authenticated"], false);
		assert_eq!(body["reason"], "missing token");
	}
}
