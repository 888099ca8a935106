//! Batch tile archives.
//!
//! A batch request is answered with one gzipped tar stream containing each
//! requested file at most once. Files missing on disk (or with unsafe
//! names) are logged and skipped; a partial archive is still a successful
//! batch. Vector batches carry a `missing_coords.json` sidecar mapping
//! each packed filename to its tile origin so clients can update their
//! local atlas without re-parsing geometries; the sidecar is written into
//! the archive itself, never onto disk.

use super::dataset::Dataset;
use crate::config::DataKind;
use anyhow::{Context, Result};
use flate2::{Compression, write::GzEncoder};
use serde_json::{Map, Value};
use std::{collections::BTreeSet, fs::File};

pub const SIDECAR_NAME: &str = "missing_coords.json";

/// Build the archive bytes for `filenames`. Returns the archive and the
/// number of tile files actually packed.
pub fn build_batch_archive(dataset: &Dataset, filenames: &[String]) -> Result<(Vec<u8>, usize)> {
	let mut archive = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
	let mut packed = 0usize;
	let mut sidecar = Map::new();

	// Dedup while keeping request order irrelevant to the result.
	let unique: BTreeSet<&String> = filenames.iter().collect();
	for filename in unique {
		let path = match dataset.resolve_file(filename) {
			Ok(path) => path,
			Err(_) => {
				log::warn!("batch: skipping unsafe filename {filename:?}");
				continue;
			}
		};
		let mut file = match File::open(&path) {
			Ok(file) => file,
			Err(err) => {
				log::warn!("batch: skipping {filename:?}: {err}");
				continue;
			}
		};
		archive
			.append_file(filename.as_str(), &mut file)
			.with_context(|| format!("archiving {filename:?}"))?;
		packed += 1;

		if dataset.kind == DataKind::Gpkg {
			if let Some(atlas) = &dataset.atlas {
				match atlas.origin_of(filename) {
					Some((x, y)) => {
						sidecar.insert(filename.clone(), serde_json::json!([x, y]));
					}
					None => log::warn!("batch: no atlas origin for {filename:?}; omitting from sidecar"),
				}
			}
		}
	}

	if dataset.kind == DataKind::Gpkg {
		let bytes = serde_json::to_vec_pretty(&Value::Object(sidecar))?;
		let mut header = tar::Header::new_gnu();
		header.set_size(bytes.len() as u64);
		header.set_mode(0o644);
		header.set_cksum();
		archive
			.append_data(&mut header, SIDECAR_NAME, bytes.as_slice())
			.context("archiving sidecar")?;
	}

	let encoder = archive.into_inner().context("finishing archive")?;
	let bytes = encoder.finish().context("finishing gzip stream")?;
	Ok((bytes, packed))
}

#[cfg(test)]
mod tests {
	use super::*;
	use assert_fs::TempDir;
	use flate2::read::GzDecoder;
	use geodepot_core::{Atlas, VectorAtlas};
	use std::{collections::HashMap, fs, io::Read};

	fn unpack(bytes: &[u8]) -> HashMap<String, Vec<u8>> {
		let mut archive = tar::Archive::new(GzDecoder::new(bytes));
		let mut entries = HashMap::new();
		for entry in archive.entries().unwrap() {
			let mut entry = entry.unwrap();
			let name = entry.path().unwrap().to_string_lossy().to_string();
			let mut content = Vec::new();
			entry.read_to_end(&mut content).unwrap();
			entries.insert(name, content);
		}
		entries
	}

	fn vector_dataset(dir: &TempDir) -> Dataset {
		let mut atlas = VectorAtlas::new();
		atlas.insert_origin("a.gpkg", 0, 0);
		atlas.insert_origin("b.gpkg", 10_000, 20_000);
		Dataset {
			name: "gpkg".to_string(),
			kind: DataKind::Gpkg,
			data_dir: dir.path().to_path_buf(),
			atlas: Some(Atlas::Vector(atlas)),
		}
	}

	#[test]
	fn vector_batch_contains_files_and_sidecar() {
		let dir = TempDir::new().unwrap();
		fs::write(dir.path().join("a.gpkg"), b"AAA").unwrap();
		fs::write(dir.path().join("b.gpkg"), b"BBB").unwrap();
		let dataset = vector_dataset(&dir);

		let (bytes, packed) =
			build_batch_archive(&dataset, &["a.gpkg".to_string(), "b.gpkg".to_string()]).unwrap();
		assert_eq!(packed, 2);

		let entries = unpack(&bytes);
		assert_eq!(entries["a.gpkg"], b"AAA");
		assert_eq!(entries["b.gpkg"], b"BBB");
		let sidecar: serde_json::Value = serde_json::from_slice(&entries[SIDECAR_NAME]).unwrap();
		assert_eq!(sidecar["b.gpkg"], serde_json::json!([10_000, 20_000]));
	}

	#[test]
	fn missing_and_unsafe_files_are_skipped() {
		let dir = TempDir::new().unwrap();
		fs::write(dir.path().join("a.gpkg"), b"AAA").unwrap();
		let dataset = vector_dataset(&dir);

		let (bytes, packed) = build_batch_archive(
			&dataset,
			&[
				"a.gpkg".to_string(),
				"ghost.gpkg".to_string(),
				"../escape.gpkg".to_string(),
			],
		)
		.unwrap();
		assert_eq!(packed, 1);
		let entries = unpack(&bytes);
		assert!(entries.contains_key("a.gpkg"));
		assert!(!entries.keys().any(|k| k.contains("escape")));
	}

	#[test]
	fn duplicate_requests_pack_once() {
		let dir = TempDir::new().unwrap();
		fs::write(dir.path().join("a.gpkg"), b"AAA").unwrap();
		let dataset = vector_dataset(&dir);

		let (bytes, packed) =
			build_batch_archive(&dataset, &["a.gpkg".to_string(), "a.gpkg".to_string()]).unwrap();
		assert_eq!(packed, 1);
		assert_eq!(unpack(&bytes).len(), 2); // tile + sidecar
	}

	#[test]
	fn lidar_batch_has_no_sidecar() {
		let dir = TempDir::new().unwrap();
		fs::write(dir.path().join("t.laz"), b"LAZ").unwrap();
		let dataset = Dataset {
			name: "lidar".to_string(),
			kind: DataKind::Lidar,
			data_dir: dir.path().to_path_buf(),
			atlas: None,
		};
		let (bytes, packed) = build_batch_archive(&dataset, &["t.laz".to_string()]).unwrap();
		assert_eq!(packed, 1);
		let entries = unpack(&bytes);
		assert_eq!(entries.len(), 1);
		assert!(!entries.contains_key(SIDECAR_NAME));
	}
}
