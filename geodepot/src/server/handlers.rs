//! HTTP handlers for the tile server.
//!
//! Handlers are thin: parse, delegate to the owning capability, map to the
//! wire shape. Status mapping lives in [`ApiError`]; middleware (rate
//! limiting, auth) lives in `routes.rs`.

use super::{
	access::{self, AccessRecord, AccessRequest},
	archive,
	auth::ANONYMOUS_TOKEN,
	dataset::Dataset,
	error::ApiError,
	github::ExternalIdentity,
	state::AppState,
};
use crate::config::DataKind;
use axum::{
	Json,
	body::Body,
	extract::{ConnectInfo, Path, Request, State},
	http::{HeaderMap, header},
	response::Response,
};
use geodepot_core::{TileBounds, TileDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::{net::SocketAddr, sync::Arc};

pub async fn health() -> Json<Value> {
	Json(json!({ "status": "ok" }))
}

pub async fn root() -> Json<Value> {
	Json(json!({ "message": "geodepot tile server" }))
}

// --- authentication ----------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AuthCredentials {
	pub username: String,
	pub password: String,
}

/// Exchange credentials for a bearer token.
pub async fn create_token(
	State(state): State<AppState>,
	Json(creds): Json<AuthCredentials>,
) -> Result<Json<Value>, ApiError> {
	if !state.enable_auth {
		// Auth disabled: hand out a constant pseudo-token for local use.
		return Ok(Json(json!({ "token": ANONYMOUS_TOKEN })));
	}
	match state.auth.login(&creds.username, &creds.password).await {
		Some(token) => Ok(Json(json!({ "token": token }))),
		None => Err(ApiError::Unauthorized("identity check failed".to_string())),
	}
}

#[derive(Debug, Default, Deserialize)]
pub struct ExternalAuthRequest {
	pub token: Option<String>,
	#[serde(default)]
	pub issue_token: bool,
}

/// Authenticate with an external (GitHub) identity instead of credentials.
/// Never fails the request; the outcome is in the body.
pub async fn external_auth(
	State(state): State<AppState>,
	headers: HeaderMap,
	body: axum::body::Bytes,
) -> Json<Value> {
	// The body is optional and lenient: a bare POST with the token in the
	// Authorization header is fine.
	let body: ExternalAuthRequest = serde_json::from_slice(&body).unwrap_or_default();
	let token = body.token.clone().or_else(|| token_from_headers(&headers));
	let Some(token) = token else {
		return Json(json!({ "authenticated": false, "reason": "missing token" }));
	};

	match state.github.check(&token).await {
		Ok(ExternalIdentity::Verified { login }) => {
			if body.issue_token {
				let issued = state.auth.issue(&login);
				let expires_in = state.auth.ttl().as_secs();
				let expires_at = time::OffsetDateTime::now_utc().unix_timestamp() + expires_in as i64;
				Json(json!({
					"authenticated": true,
					"token": issued,
					"user": login,
					"expires_in": expires_in,
					"expires_at": expires_at,
				}))
			} else {
				Json(json!({ "authenticated": true }))
			}
		}
		Ok(ExternalIdentity::Denied { reason }) => Json(json!({ "authenticated": false, "reason": reason })),
		Err(err) => {
			log::warn!("external identity check failed: {err:#}");
			Json(json!({ "authenticated": false, "reason": "identity service unreachable" }))
		}
	}
}

/// Accept `Authorization: Bearer <t>` and the legacy `Authorization: token <t>`.
fn token_from_headers(headers: &HeaderMap) -> Option<String> {
	let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
	let lower = value.to_lowercase();
	for prefix in ["bearer ", "token "] {
		if lower.starts_with(prefix) {
			return Some(value[prefix.len()..].trim().to_string());
		}
	}
	None
}

// --- discovery ---------------------------------------------------------------

/// A discovery bbox arrives in one of two dialects: exact float bounds
/// (vector) or integer bounds plus an expansion buffer (point clouds).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum DiscoverRequest {
	Buffered {
		xmin: i64,
		ymin: i64,
		xmax: i64,
		ymax: i64,
		#[serde(default)]
		buffer: i64,
	},
	Exact {
		minx: f64,
		miny: f64,
		maxx: f64,
		maxy: f64,
	},
}

impl DiscoverRequest {
	/// Resolve to query bounds. Buffer expansion applies to grid datasets
	/// only and is checked for arithmetic wrap.
	fn bounds(&self, kind: DataKind) -> Result<TileBounds, ApiError> {
		match *self {
			DiscoverRequest::Exact { minx, miny, maxx, maxy } => {
				TileBounds::new(minx, miny, maxx, maxy).map_err(|_| invalid_bbox())
			}
			DiscoverRequest::Buffered {
				xmin,
				ymin,
				xmax,
				ymax,
				buffer,
			} => {
				let buffer = if kind == DataKind::Lidar { buffer } else { 0 };
				let bxmin = xmin.checked_sub(buffer).ok_or_else(invalid_bbox)?;
				let bymin = ymin.checked_sub(buffer).ok_or_else(invalid_bbox)?;
				let bxmax = xmax.checked_add(buffer).ok_or_else(invalid_bbox)?;
				let bymax = ymax.checked_add(buffer).ok_or_else(invalid_bbox)?;
				TileBounds::new(bxmin as f64, bymin as f64, bxmax as f64, bymax as f64).map_err(|_| invalid_bbox())
			}
		}
	}
}

fn invalid_bbox() -> ApiError {
	ApiError::BadRequest("Invalid bbox: min must be <= max".to_string())
}

#[derive(Debug, Serialize)]
pub struct DiscoverResponse {
	pub message: String,
	pub num_tiles: usize,
	pub tiles: Vec<TileDescriptor>,
}

/// Which tiles of a dataset intersect a bounding box.
pub async fn discover(
	Path(name): Path<String>,
	State(state): State<AppState>,
	Json(request): Json<DiscoverRequest>,
) -> Result<Json<DiscoverResponse>, ApiError> {
	let dataset = lookup(&state, &name)?;
	let atlas = dataset.atlas()?;
	let bounds = request.bounds(dataset.kind)?;
	log::debug!("discover: dataset='{name}' bounds={bounds:?}");

	let tiles = atlas.query(&bounds);
	if tiles.is_empty() {
		return Err(ApiError::NotFound(
			"No tiles intersect the requested bounding box".to_string(),
		));
	}

	let tiles: Vec<TileDescriptor> = tiles
		.into_iter()
		.map(|tile| match dataset.kind {
			DataKind::Lidar => TileDescriptor::Extent {
				filename: tile.filename,
				xmin: tile.extent.minx as i64,
				ymin: tile.extent.miny as i64,
				xmax: tile.extent.maxx as i64,
				ymax: tile.extent.maxy as i64,
			},
			DataKind::Gpkg => TileDescriptor::Name(tile.filename),
		})
		.collect();

	Ok(Json(DiscoverResponse {
		message: "Success".to_string(),
		num_tiles: tiles.len(),
		tiles,
	}))
}

// --- file delivery -----------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
	pub filenames: Vec<String>,
}

/// Stream a tar.gz archive of the requested tiles.
pub async fn download_batch(
	Path(name): Path<String>,
	State(state): State<AppState>,
	Json(request): Json<BatchRequest>,
) -> Result<Response, ApiError> {
	let dataset = Arc::clone(lookup(&state, &name)?);
	if request.filenames.is_empty() {
		return Err(ApiError::NotFound("no filenames requested".to_string()));
	}
	if dataset.kind == DataKind::Gpkg {
		// The sidecar needs origins, so a vector batch needs the atlas.
		dataset.atlas()?;
	}
	log::debug!("batch: dataset='{name}' files={}", request.filenames.len());

	let filenames = request.filenames;
	let (bytes, packed) = tokio::task::spawn_blocking(move || archive::build_batch_archive(&dataset, &filenames))
		.await
		.map_err(|err| ApiError::Internal(format!("archive task failed: {err}")))??;
	if packed == 0 {
		return Err(ApiError::NotFound("none of the requested files exist".to_string()));
	}

	Response::builder()
		.status(200)
		.header(header::CONTENT_TYPE, "application/gzip")
		.header(header::CONTENT_DISPOSITION, "attachment; filename=\"tiles.tar.gz\"")
		.body(Body::from(bytes))
		.map_err(|err| ApiError::Internal(format!("building response: {err}")))
}

/// One tile by name: `/files/{kind}/{dataset}/{filename}`.
pub async fn get_file(
	Path((kind, name, filename)): Path<(String, String, String)>,
	State(state): State<AppState>,
) -> Result<Response, ApiError> {
	let kind = parse_kind(&kind)?;
	let dataset = lookup(&state, &name)?;
	if dataset.kind != kind {
		return Err(ApiError::NotFound(format!("dataset '{name}' does not serve {kind} files")));
	}
	serve_file(dataset, &filename).await
}

/// Back-compat single-dataset route: `/get/{kind}/{filename}` picks the
/// first registered dataset of that kind.
pub async fn get_file_compat(
	Path((kind, filename)): Path<(String, String)>,
	State(state): State<AppState>,
) -> Result<Response, ApiError> {
	let kind = parse_kind(&kind)?;
	let dataset = state
		.datasets
		.values()
		.find(|dataset| dataset.kind == kind)
		.ok_or_else(|| ApiError::NotFound(format!("no dataset of kind '{kind}' registered")))?;
	serve_file(dataset, &filename).await
}

fn parse_kind(kind: &str) -> Result<DataKind, ApiError> {
	DataKind::parse(kind).ok_or_else(|| ApiError::BadRequest(format!("unknown data kind '{kind}'")))
}

async fn serve_file(dataset: &Dataset, filename: &str) -> Result<Response, ApiError> {
	let path = dataset.resolve_file(filename)?;
	let bytes = tokio::fs::read(&path)
		.await
		.map_err(|_| ApiError::NotFound(format!("File not found: {filename}")))?;
	log::debug!("serving {:?} ({} bytes)", path, bytes.len());

	Response::builder()
		.status(200)
		.header(header::CONTENT_TYPE, "application/octet-stream")
		.header(
			header::CONTENT_DISPOSITION,
			format!("attachment; filename=\"{filename}\""),
		)
		.body(Body::from(bytes))
		.map_err(|err| ApiError::Internal(format!("building response: {err}")))
}

fn lookup<'a>(state: &'a AppState, name: &str) -> Result<&'a Arc<Dataset>, ApiError> {
	state
		.datasets
		.get(name)
		.ok_or_else(|| ApiError::NotFound(format!("unknown dataset '{name}'")))
}

// --- access requests ---------------------------------------------------------

/// Validated, throttled, durably-logged intake of access requests.
pub async fn request_access(State(state): State<AppState>, request: Request) -> Result<Json<Value>, ApiError> {
	let (parts, body) = request.into_parts();

	let limit = state.intake.max_body_bytes();
	let bytes = axum::body::to_bytes(body, limit)
		.await
		.map_err(|_| ApiError::PayloadTooLarge("Request too large".to_string()))?;

	let form: AccessRequest =
		serde_json::from_slice(&bytes).map_err(|_| ApiError::BadRequest("Invalid request body".to_string()))?;
	let (name, surname, email, github_username) = access::validate(&form)?;

	let remote_addr = parts
		.extensions
		.get::<ConnectInfo<SocketAddr>>()
		.map_or_else(|| "unknown".to_string(), |info| info.0.ip().to_string());
	let user_agent = parts
		.headers
		.get(header::USER_AGENT)
		.and_then(|v| v.to_str().ok())
		.unwrap_or_default()
		.to_string();

	let record = AccessRecord {
		name,
		surname,
		email,
		github_username,
		timestamp: utc_timestamp(),
		remote_addr,
		user_agent,
	};

	// Throttle + fsync happen under one guard; keep the blocking work off
	// the runtime workers.
	let intake = Arc::clone(&state.intake);
	let to_persist = record.clone();
	tokio::task::spawn_blocking(move || intake.submit(&to_persist))
		.await
		.map_err(|err| ApiError::Internal(format!("intake task failed: {err}")))??;

	// Ticket creation is best-effort: the record is already durable.
	let ticket = state.ticket.create(&record).await;
	if let Some(error) = &ticket.error {
		log::warn!("external ticket not created: {error}");
	}

	Ok(Json(json!({
		"accepted": true,
		"ticket_created": ticket.created,
		"ticket_url": ticket.url,
		"ticket_id": ticket.id,
	})))
}

fn utc_timestamp() -> String {
	time::OffsetDateTime::now_utc()
		.format(&time::format_description::well_known::Rfc3339)
		.unwrap_or_else(|_| time::OffsetDateTime::now_utc().unix_timestamp().to_string())
}
