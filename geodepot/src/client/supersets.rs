//! Registry of bounding boxes already reconciled to completion.
//!
//! If an earlier reconcile fully satisfied a bbox, any bbox contained in it
//! needs no discovery call at all: the local mirror already covers it.

use anyhow::Result;
use geodepot_core::{TileBounds, io::atomic_write};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SatisfiedBox {
	dataset: String,
	bbox: [f64; 4],
}

/// Per-client persistent registry, one JSON file under the cache root.
pub struct SupersetRegistry {
	path: PathBuf,
	records: Vec<SatisfiedBox>,
}

impl SupersetRegistry {
	pub fn load(path: PathBuf) -> SupersetRegistry {
		let records = fs::read(&path)
			.ok()
			.and_then(|bytes| serde_json::from_slice(&bytes).ok())
			.unwrap_or_default();
		SupersetRegistry { path, records }
	}

	/// True if a previously satisfied bbox for `dataset` contains `bounds`.
	pub fn covers(&self, dataset: &str, bounds: &TileBounds) -> bool {
		self.records.iter().any(|record| {
			record.dataset == dataset && {
				let [minx, miny, maxx, maxy] = record.bbox;
				minx <= bounds.minx && miny <= bounds.miny && maxx >= bounds.maxx && maxy >= bounds.maxy
			}
		})
	}

	/// Record a fully satisfied bbox. Boxes contained in an existing record
	/// add nothing and are dropped.
	pub fn record(&mut self, dataset: &str, bounds: &TileBounds) -> Result<()> {
		if self.covers(dataset, bounds) {
			return Ok(());
		}
		self.records.push(SatisfiedBox {
			dataset: dataset.to_string(),
			bbox: [bounds.minx, bounds.miny, bounds.maxx, bounds.maxy],
		});
		let bytes = serde_json::to_vec_pretty(&self.records)?;
		atomic_write(&self.path, &bytes)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use assert_fs::TempDir;

	fn bounds(minx: f64, miny: f64, maxx: f64, maxy: f64) -> TileBounds {
		TileBounds::new(minx, miny, maxx, maxy).unwrap()
	}

	#[test]
	fn contained_bbox_is_covered() {
		let dir = TempDir::new().unwrap();
		let mut registry = SupersetRegistry::load(dir.path().join("supersets.json"));
		registry.record("gpkg", &bounds(0.0, 0.0, 100.0, 100.0)).unwrap();

		assert!(registry.covers("gpkg", &bounds(10.0, 10.0, 90.0, 90.0)));
		assert!(registry.covers("gpkg", &bounds(0.0, 0.0, 100.0, 100.0)));
		assert!(!registry.covers("gpkg", &bounds(50.0, 50.0, 150.0, 150.0)));
		assert!(!registry.covers("lidar", &bounds(10.0, 10.0, 90.0, 90.0)));
	}

	#[test]
	fn registry_survives_reload() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("supersets.json");
		{
			let mut registry = SupersetRegistry::load(path.clone());
			registry.record("gpkg", &bounds(0.0, 0.0, 100.0, 100.0)).unwrap();
		}
		let registry = SupersetRegistry::load(path);
		assert!(registry.covers("gpkg", &bounds(1.0, 1.0, 99.0, 99.0)));
	}

	#[test]
	fn corrupt_registry_starts_empty() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("supersets.json");
		fs::write(&path, "nonsense").unwrap();
		let registry = SupersetRegistry::load(path);
		assert!(!registry.covers("gpkg", &bounds(0.0, 0.0, 1.0, 1.0)));
	}
}
