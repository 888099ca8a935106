//! Served datasets: a loaded (read-only) atlas plus its file directory.

use super::error::ApiError;
use crate::config::{DataKind, DatasetConfig, DatasetRegistry};
use geodepot_core::{Atlas, detect_kind};
use std::{
	collections::BTreeMap,
	fs,
	path::{Path, PathBuf},
	sync::Arc,
};

/// One dataset as served. The atlas is loaded once at startup and read-only
/// afterwards; `None` marks the dataset unavailable (its endpoints answer
/// with a clear internal error while other datasets keep serving).
pub struct Dataset {
	pub name: String,
	pub kind: DataKind,
	pub data_dir: PathBuf,
	pub atlas: Option<Atlas>,
}

impl Dataset {
	/// The atlas, or the error every atlas-dependent endpoint reports while
	/// the dataset is unavailable.
	pub fn atlas(&self) -> Result<&Atlas, ApiError> {
		self
			.atlas
			.as_ref()
			.ok_or_else(|| ApiError::DatasetUnavailable(format!("atlas for dataset '{}' is not loaded", self.name)))
	}

	/// Resolve a client-supplied filename inside the data directory.
	///
	/// Filenames are plain path components; separators, parent references
	/// and empty names are rejected before any filesystem access.
	pub fn resolve_file(&self, filename: &str) -> Result<PathBuf, ApiError> {
		if filename.is_empty()
			|| filename.contains('/')
			|| filename.contains('\\')
			|| filename.contains("..")
			|| filename == "."
		{
			return Err(ApiError::BadRequest("Invalid filename".to_string()));
		}
		let path = self.data_dir.join(filename);
		debug_assert!(path.starts_with(&self.data_dir));
		Ok(path)
	}
}

/// Load every registered dataset. Loading failures never abort startup:
/// the dataset is registered as unavailable instead.
pub fn load_datasets(registry: &DatasetRegistry) -> BTreeMap<String, Arc<Dataset>> {
	let mut datasets = BTreeMap::new();
	for (name, config) in &registry.datasets {
		let dataset = load_dataset(name, config);
		datasets.insert(name.clone(), Arc::new(dataset));
	}
	datasets
}

fn load_dataset(name: &str, config: &DatasetConfig) -> Dataset {
	let (kind, atlas) = match read_atlas(config) {
		Ok((kind, atlas)) => {
			log::info!(
				"dataset '{name}': loaded {} atlas with {} tiles from {:?}",
				kind,
				atlas.len(),
				config.atlas_path
			);
			(kind, Some(atlas))
		}
		Err(err) => {
			log::error!("dataset '{name}': atlas unusable ({err:#}); marking unavailable");
			(config.kind.unwrap_or(DataKind::Gpkg), None)
		}
	};
	Dataset {
		name: name.to_string(),
		kind,
		data_dir: config.data_directory.clone(),
		atlas,
	}
}

fn read_atlas(config: &DatasetConfig) -> anyhow::Result<(DataKind, Atlas)> {
	let kind = match config.kind {
		Some(kind) => kind,
		None => infer_kind(&config.atlas_path)?,
	};
	let atlas = Atlas::load(&config.atlas_path, kind.atlas_kind(), kind.rounding())?;
	Ok((kind, atlas))
}

fn infer_kind(atlas_path: &Path) -> anyhow::Result<DataKind> {
	let bytes = fs::read(atlas_path)?;
	let value: serde_json::Value = serde_json::from_slice(&bytes)?;
	Ok(match detect_kind(&value) {
		geodepot_core::AtlasKind::Grid => DataKind::Lidar,
		geodepot_core::AtlasKind::Vector => DataKind::Gpkg,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	fn dataset() -> Dataset {
		Dataset {
			name: "test".to_string(),
			kind: DataKind::Gpkg,
			data_dir: PathBuf::from("/srv/tiles"),
			atlas: None,
		}
	}

	#[rstest]
	#[case("tile_0_0.gpkg", true)]
	#[case("a.laz", true)]
	#[case("../etc/passwd", false)]
	#[case("..", false)]
	#[case("sub/tile.gpkg", false)]
	#[case("sub\\tile.gpkg", false)]
	#[case("", false)]
	#[case(".", false)]
	fn filename_resolution(#[case] filename: &str, #[case] accepted: bool) {
		let result = dataset().resolve_file(filename);
		assert_eq!(result.is_ok(), accepted, "{filename:?}");
		if let Ok(path) = result {
			assert!(path.starts_with("/srv/tiles"));
		}
	}

	#[test]
	fn unavailable_dataset_reports_internal() {
		let err = dataset().atlas().unwrap_err();
		assert!(matches!(err, ApiError::DatasetUnavailable(_)));
	}
}
