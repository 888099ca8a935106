//! The differential cache: local-vs-server reconciliation.
//!
//! A reconcile makes the local tile mirror at least as complete as the
//! server's for one bounding box: discover what the server has, diff
//! against the local atlas by filename (one-way, `server \ local`; stale
//! local tiles are never deleted), download the missing tiles as one
//! archive, extract, then swap the local atlas in atomically. A crash at
//! any point leaves the previous atlas in place, so the atlas never
//! references a file that is not on disk.

use super::{credentials::CredentialProvider, supersets::SupersetRegistry};
use crate::config::DataKind;
use crate::server::archive::SIDECAR_NAME;
use anyhow::{Context, Result, bail};
use flate2::read::GzDecoder;
use futures::stream::{self, StreamExt, TryStreamExt};
use geodepot_core::{Atlas, GridEntry, TileBounds, TileDescriptor, io::atomic_write, read_header_extent};
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use std::{
	collections::{BTreeSet, HashMap},
	fs,
	path::{Path, PathBuf},
	sync::Arc,
	time::Duration,
};

/// Client configuration: where the server is and where the mirror lives.
#[derive(Clone, Debug)]
pub struct CacheSettings {
	pub server_url: String,
	pub cache_root: PathBuf,
	/// Bound on in-flight single-file fetches.
	pub parallel_fetches: usize,
	/// Attempts per request on network errors.
	pub attempts: u32,
	/// Base delay for exponential backoff between attempts.
	pub retry_base: Duration,
}

impl CacheSettings {
	pub fn new(server_url: impl Into<String>, cache_root: impl Into<PathBuf>) -> CacheSettings {
		CacheSettings {
			server_url: server_url.into(),
			cache_root: cache_root.into(),
			parallel_fetches: 4,
			attempts: 3,
			retry_base: Duration::from_secs(1),
		}
	}
}

/// A dataset as the client addresses it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatasetRef {
	pub name: String,
	pub kind: DataKind,
}

impl DatasetRef {
	pub fn new(name: impl Into<String>, kind: DataKind) -> DatasetRef {
		DatasetRef { name: name.into(), kind }
	}
}

/// What a reconcile did and where the tiles are.
#[derive(Debug)]
pub struct ReconcileOutcome {
	/// Full paths for every tile covering the bbox, local-first.
	pub paths: Vec<PathBuf>,
	/// Number of tiles downloaded and merged by this call.
	pub downloaded: usize,
	/// True when a previously satisfied superset bbox made the server
	/// round-trip unnecessary.
	pub skipped_network: bool,
}

#[derive(Deserialize)]
struct DiscoverReply {
	#[serde(default)]
	tiles: Vec<TileDescriptor>,
}

pub struct DifferentialCache {
	settings: CacheSettings,
	http: reqwest::Client,
	provider: Arc<dyn CredentialProvider>,
	token: Mutex<Option<String>>,
	/// Reconciles for the same dataset serialize on these; distinct
	/// datasets proceed in parallel.
	locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
	supersets: Mutex<SupersetRegistry>,
}

impl DifferentialCache {
	pub fn new(settings: CacheSettings, provider: Arc<dyn CredentialProvider>) -> Result<DifferentialCache> {
		let http = reqwest::Client::builder()
			.connect_timeout(Duration::from_secs(10))
			.timeout(Duration::from_secs(300))
			.build()
			.context("building http client")?;
		let supersets = SupersetRegistry::load(settings.cache_root.join("satisfied_boxes.json"));
		Ok(DifferentialCache {
			settings,
			http,
			provider,
			token: Mutex::new(None),
			locks: Mutex::new(HashMap::new()),
			supersets: Mutex::new(supersets),
		})
	}

	/// Make the local mirror cover `bounds` for `dataset` and return the
	/// tile paths. `buffer` expands the request on all sides for
	/// point-cloud datasets; vector datasets ignore it.
	pub async fn reconcile(&self, dataset: &DatasetRef, bounds: &TileBounds, buffer: i64) -> Result<ReconcileOutcome> {
		let lock = self.dataset_lock(&dataset.name);
		let _guard = lock.lock().await;

		let effective = effective_bounds(dataset.kind, bounds, buffer)?;
		let atlas_path = self.atlas_path(&dataset.name);
		let tiles_dir = self.tiles_dir(&dataset.name);

		if self.supersets.lock().covers(&dataset.name, &effective) {
			log::info!(
				"dataset '{}': bbox {effective:?} already satisfied by an earlier reconcile; skipping server round-trip",
				dataset.name
			);
			let atlas = Atlas::load_or_empty(&atlas_path, dataset.kind.atlas_kind(), dataset.kind.rounding());
			let names: BTreeSet<String> = atlas.query(&effective).into_iter().map(|t| t.filename).collect();
			return Ok(ReconcileOutcome {
				paths: tile_paths(&tiles_dir, &names),
				downloaded: 0,
				skipped_network: true,
			});
		}

		let server_set = self.discover(dataset, bounds, buffer).await?;
		let server_names: BTreeSet<String> = server_set.iter().map(|d| d.filename().to_string()).collect();

		let atlas = Atlas::load_or_empty(&atlas_path, dataset.kind.atlas_kind(), dataset.kind.rounding());
		let local_names: BTreeSet<String> = atlas.query(&effective).into_iter().map(|t| t.filename).collect();

		// One-way difference: tiles the server has and we do not. Local
		// tiles absent on the server are retained, not deleted.
		let missing: Vec<String> = server_names.difference(&local_names).cloned().collect();

		if missing.is_empty() {
			log::info!("dataset '{}': local mirror already complete for {effective:?}", dataset.name);
			self.record_satisfied(&dataset.name, &effective);
			let names: BTreeSet<String> = server_names.intersection(&local_names).cloned().collect();
			return Ok(ReconcileOutcome {
				paths: tile_paths(&tiles_dir, &names),
				downloaded: 0,
				skipped_network: false,
			});
		}

		log::info!("dataset '{}': {} tiles missing locally", dataset.name, missing.len());
		if !self.provider.approve_download(&missing) {
			bail!("download of {} tiles was not approved", missing.len());
		}

		let archive = self.download_batch(dataset, &missing).await?;

		let kind = dataset.kind;
		let task_atlas_path = atlas_path.clone();
		let task_tiles_dir = tiles_dir.clone();
		let extracted = tokio::task::spawn_blocking(move || {
			extract_and_merge(&archive, kind, atlas, &task_atlas_path, &task_tiles_dir)
		})
		.await
		.context("extraction task failed")??;

		self.record_satisfied(&dataset.name, &effective);

		let mut names = local_names;
		names.extend(extracted.iter().cloned());
		Ok(ReconcileOutcome {
			paths: tile_paths(&tiles_dir, &names),
			downloaded: extracted.len(),
			skipped_network: false,
		})
	}

	/// Fetch individual tiles over the single-file endpoint with a bounded
	/// number of in-flight requests. Each file lands atomically; the local
	/// atlas is not touched (use [`reconcile`](Self::reconcile) for that).
	pub async fn fetch_files(&self, dataset: &DatasetRef, filenames: &[String]) -> Result<Vec<PathBuf>> {
		let tiles_dir = self.tiles_dir(&dataset.name);
		fs::create_dir_all(&tiles_dir).with_context(|| format!("creating {tiles_dir:?}"))?;

		let paths: Vec<PathBuf> = stream::iter(filenames.iter().cloned())
			.map(|filename| self.fetch_single(dataset, &tiles_dir, filename))
			.buffer_unordered(self.settings.parallel_fetches.max(1))
			.try_collect()
			.await?;
		Ok(paths)
	}

	async fn fetch_single(&self, dataset: &DatasetRef, tiles_dir: &Path, filename: String) -> Result<PathBuf> {
		let url = format!(
			"{}/files/{}/{}/{}",
			self.base_url(),
			dataset.kind,
			dataset.name,
			filename
		);
		let response = self.authorized(|token| self.with_token(self.http.get(&url), token)).await?;
		if !response.status().is_success() {
			bail!("fetching {filename}: http {}", response.status().as_u16());
		}
		let bytes = response.bytes().await.context("reading file body")?;
		let dest = tiles_dir.join(&filename);
		atomic_write(&dest, &bytes)?;
		Ok(dest)
	}

	async fn discover(&self, dataset: &DatasetRef, bounds: &TileBounds, buffer: i64) -> Result<Vec<TileDescriptor>> {
		let body = match dataset.kind {
			DataKind::Gpkg => json!({
				"minx": bounds.minx, "miny": bounds.miny, "maxx": bounds.maxx, "maxy": bounds.maxy,
			}),
			DataKind::Lidar => json!({
				"xmin": bounds.minx as i64, "ymin": bounds.miny as i64,
				"xmax": bounds.maxx as i64, "ymax": bounds.maxy as i64,
				"buffer": buffer,
			}),
		};
		let url = format!("{}/datasets/{}/tiles", self.base_url(), dataset.name);

		let response = self
			.authorized(|token| self.with_token(self.http.post(&url), token).json(&body))
			.await?;
		match response.status() {
			StatusCode::OK => {
				let reply: DiscoverReply = response.json().await.context("parsing discovery reply")?;
				Ok(reply.tiles)
			}
			StatusCode::NOT_FOUND => Ok(Vec::new()),
			status => {
				let detail = response.text().await.unwrap_or_default();
				bail!("discovery failed with http {status}: {detail}");
			}
		}
	}

	async fn download_batch(&self, dataset: &DatasetRef, filenames: &[String]) -> Result<Vec<u8>> {
		let url = format!("{}/datasets/{}/download", self.base_url(), dataset.name);
		let body = json!({ "filenames": filenames });
		let response = self
			.authorized(|token| self.with_token(self.http.post(&url), token).json(&body))
			.await?;
		if !response.status().is_success() {
			bail!("batch download failed with http {}", response.status().as_u16());
		}
		// All-or-nothing at the archive level: a broken stream fails the
		// reconcile before anything touches the mirror.
		let bytes = response.bytes().await.context("downloading archive")?;
		log::info!("dataset '{}': downloaded archive ({} bytes)", dataset.name, bytes.len());
		Ok(bytes.to_vec())
	}

	async fn authenticate(&self) -> Result<()> {
		let credentials = self.provider.credentials()?;
		let url = format!("{}/auth/token", self.base_url());
		let body = json!({ "username": credentials.username, "password": credentials.password });
		let response = self.send_with_retry(|| self.http.post(&url).json(&body)).await?;
		if !response.status().is_success() {
			bail!("authentication failed (http {})", response.status().as_u16());
		}
		let value: Value = response.json().await.context("parsing token reply")?;
		let token = value
			.get("token")
			.and_then(Value::as_str)
			.context("token missing from reply")?;
		*self.token.lock() = Some(token.to_string());
		log::info!("authenticated with the tile server");
		Ok(())
	}

	/// Send with the current token; on 401 obtain fresh credentials once and
	/// retry. A second 401 surfaces as an error (credentials are re-prompted,
	/// never silently retried).
	async fn authorized<F>(&self, build: F) -> Result<reqwest::Response>
	where
		F: Fn(Option<String>) -> reqwest::RequestBuilder,
	{
		let mut refreshed = false;
		loop {
			let token = self.token.lock().clone();
			let response = self.send_with_retry(|| build(token.clone())).await?;
			if response.status() == StatusCode::UNAUTHORIZED && !refreshed {
				refreshed = true;
				log::info!("server requires authentication");
				self.authenticate().await?;
				continue;
			}
			return Ok(response);
		}
	}

	/// Transient network errors back off exponentially and retry a bounded
	/// number of times; HTTP error statuses are returned, not retried.
	async fn send_with_retry<F>(&self, build: F) -> Result<reqwest::Response>
	where
		F: Fn() -> reqwest::RequestBuilder,
	{
		let mut delay = self.settings.retry_base;
		let attempts = self.settings.attempts.max(1);
		for attempt in 1..=attempts {
			match build().send().await {
				Ok(response) => return Ok(response),
				Err(err) if attempt < attempts => {
					log::warn!("network error talking to the server (attempt {attempt}/{attempts}): {err}");
					tokio::time::sleep(delay).await;
					delay *= 2;
				}
				Err(err) => return Err(anyhow::Error::new(err).context("server unreachable after retries")),
			}
		}
		unreachable!("retry loop always returns")
	}

	fn with_token(&self, builder: reqwest::RequestBuilder, token: Option<String>) -> reqwest::RequestBuilder {
		match token {
			Some(token) => builder.bearer_auth(token),
			None => builder,
		}
	}

	fn record_satisfied(&self, dataset: &str, bounds: &TileBounds) {
		if let Err(err) = self.supersets.lock().record(dataset, bounds) {
			log::warn!("could not persist satisfied-bbox registry: {err:#}");
		}
	}

	fn dataset_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
		Arc::clone(self.locks.lock().entry(name.to_string()).or_default())
	}

	fn base_url(&self) -> &str {
		self.settings.server_url.trim_end_matches('/')
	}

	pub fn dataset_dir(&self, name: &str) -> PathBuf {
		self.settings.cache_root.join(name)
	}

	pub fn atlas_path(&self, name: &str) -> PathBuf {
		self.dataset_dir(name).join("atlas.json")
	}

	pub fn tiles_dir(&self, name: &str) -> PathBuf {
		self.dataset_dir(name).join("tiles")
	}
}

fn effective_bounds(kind: DataKind, bounds: &TileBounds, buffer: i64) -> Result<TileBounds> {
	if kind != DataKind::Lidar || buffer == 0 {
		return Ok(*bounds);
	}
	let buffer = buffer as f64;
	TileBounds::new(
		bounds.minx - buffer,
		bounds.miny - buffer,
		bounds.maxx + buffer,
		bounds.maxy + buffer,
	)
	.context("bbox inverted after buffering")
}

fn tile_paths(tiles_dir: &Path, names: &BTreeSet<String>) -> Vec<PathBuf> {
	names.iter().map(|name| tiles_dir.join(name)).collect()
}

/// Unpack the archive into a staging directory, move tiles into the mirror,
/// merge their records into the atlas and swap the atlas file atomically.
/// Any failure before the final rename leaves the previous atlas intact.
fn extract_and_merge(
	archive: &[u8],
	kind: DataKind,
	mut atlas: Atlas,
	atlas_path: &Path,
	tiles_dir: &Path,
) -> Result<Vec<String>> {
	fs::create_dir_all(tiles_dir).with_context(|| format!("creating {tiles_dir:?}"))?;
	let staging_parent = tiles_dir.parent().unwrap_or(tiles_dir);
	let staging = tempfile::tempdir_in(staging_parent).context("creating staging directory")?;

	tar::Archive::new(GzDecoder::new(archive))
		.unpack(staging.path())
		.context("unpacking archive")?;

	let origins: HashMap<String, (i64, i64)> = if kind == DataKind::Gpkg {
		read_sidecar(&staging.path().join(SIDECAR_NAME))?
	} else {
		HashMap::new()
	};

	let mut extracted = Vec::new();
	for entry in fs::read_dir(staging.path()).context("listing staging directory")? {
		let entry = entry?;
		if !entry.file_type()?.is_file() {
			continue;
		}
		let name = entry.file_name().to_string_lossy().to_string();
		if name == SIDECAR_NAME {
			continue;
		}
		let dest = tiles_dir.join(&name);
		move_file(&entry.path(), &dest)?;
		// The atlas rename below must not be reordered before the data.
		if let Ok(file) = fs::File::open(&dest) {
			let _ = file.sync_all();
		}
		extracted.push(name);
	}
	if let Ok(dir) = fs::File::open(tiles_dir) {
		let _ = dir.sync_all();
	}

	match &mut atlas {
		Atlas::Vector(vector) => {
			for name in &extracted {
				match origins.get(name) {
					Some(&(x, y)) => vector.insert_origin(name, x, y),
					None => log::warn!("no sidecar origin for {name:?}; tile kept on disk but not indexed"),
				}
			}
		}
		Atlas::Grid(grid) => {
			for name in &extracted {
				match read_header_extent(&tiles_dir.join(name)) {
					Ok(extent) => {
						grid.insert(
							extent.xmin,
							extent.ymin,
							GridEntry {
								filename: name.clone(),
								width: extent.xmax - extent.xmin,
								height: extent.ymax - extent.ymin,
							},
						);
					}
					Err(err) => log::warn!("unreadable point cloud header for {name:?}: {err:#}; not indexed"),
				}
			}
		}
	}

	atlas.save(atlas_path)?;
	// Staging directory (and with it the archive remnants) is removed when
	// `staging` drops.
	Ok(extracted)
}

fn read_sidecar(path: &Path) -> Result<HashMap<String, (i64, i64)>> {
	let mut origins = HashMap::new();
	let bytes = match fs::read(path) {
		Ok(bytes) => bytes,
		Err(_) => {
			log::warn!("batch archive carried no {SIDECAR_NAME}; tiles will not be indexed");
			return Ok(origins);
		}
	};
	let value: Value = serde_json::from_slice(&bytes).context("parsing sidecar")?;
	if let Some(object) = value.as_object() {
		for (filename, coords) in object {
			let pair = coords
				.as_array()
				.filter(|a| a.len() == 2)
				.and_then(|a| Some((a[0].as_i64()?, a[1].as_i64()?)));
			match pair {
				Some(origin) => {
					origins.insert(filename.clone(), origin);
				}
				None => log::warn!("malformed sidecar entry for {filename:?}"),
			}
		}
	}
	Ok(origins)
}

fn move_file(from: &Path, to: &Path) -> Result<()> {
	if fs::rename(from, to).is_ok() {
		return Ok(());
	}
	// Staging and mirror may sit on different filesystems.
	fs::copy(from, to).with_context(|| format!("copying {from:?} to {to:?}"))?;
	let _ = fs::remove_file(from);
	Ok(())
}
