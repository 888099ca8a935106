use anyhow::{Context, Result, bail};
use geodepot_core::{AtlasKind, DimensionRounding};
use serde::{Deserialize, Serialize};
use std::{
	collections::BTreeMap,
	env, fmt, fs,
	path::{Path, PathBuf},
};

/// The two tile flavors a deployment serves. The kind appears in file URLs
/// (`/files/{kind}/…`) and decides the atlas shape and quirks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
	Lidar,
	Gpkg,
}

impl DataKind {
	pub fn as_str(self) -> &'static str {
		match self {
			DataKind::Lidar => "lidar",
			DataKind::Gpkg => "gpkg",
		}
	}

	pub fn parse(s: &str) -> Option<DataKind> {
		match s {
			"lidar" => Some(DataKind::Lidar),
			"gpkg" => Some(DataKind::Gpkg),
			_ => None,
		}
	}

	pub fn atlas_kind(self) -> AtlasKind {
		match self {
			DataKind::Lidar => AtlasKind::Grid,
			DataKind::Gpkg => AtlasKind::Vector,
		}
	}

	/// The dimension quirk follows the dataset kind: point-cloud deliveries
	/// carry the `…99` artifact, vector tiles have exact rectangles.
	pub fn rounding(self) -> DimensionRounding {
		match self {
			DataKind::Lidar => DimensionRounding::PromoteNinetyNine,
			DataKind::Gpkg => DimensionRounding::None,
		}
	}
}

impl fmt::Display for DataKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// One registered dataset: where its atlas and its tile files live.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
	/// Omitted in older registry files; inferred from the atlas shape.
	#[serde(default)]
	pub kind: Option<DataKind>,
	pub atlas_path: PathBuf,
	pub data_directory: PathBuf,
}

/// Mapping `dataset name -> config`, persisted as UTF-8 JSON.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetRegistry {
	pub datasets: BTreeMap<String, DatasetConfig>,
}

impl DatasetRegistry {
	pub fn from_path(path: &Path) -> Result<DatasetRegistry> {
		let bytes = fs::read(path).with_context(|| format!("reading dataset registry {path:?}"))?;
		let registry: DatasetRegistry =
			serde_json::from_slice(&bytes).with_context(|| format!("parsing dataset registry {path:?}"))?;
		Ok(registry)
	}

	/// Registry from the environment: `DATASETS_PATH` names a registry file;
	/// without it the legacy per-kind path variables register the two default
	/// datasets `lidar` and `gpkg`.
	pub fn from_env() -> Result<DatasetRegistry> {
		if let Ok(path) = env::var("DATASETS_PATH") {
			return DatasetRegistry::from_path(Path::new(&path));
		}

		let mut datasets = BTreeMap::new();
		if let (Ok(atlas), Ok(dir)) = (env::var("LIDAR_ATLAS_PATH"), env::var("LAZ_DIRECTORY")) {
			datasets.insert(
				"lidar".to_string(),
				DatasetConfig {
					kind: Some(DataKind::Lidar),
					atlas_path: PathBuf::from(atlas),
					data_directory: PathBuf::from(dir),
				},
			);
		}
		if let (Ok(atlas), Ok(dir)) = (env::var("GPKG_ATLAS_PATH"), env::var("GPKG_DATA_DIRECTORY")) {
			datasets.insert(
				"gpkg".to_string(),
				DatasetConfig {
					kind: Some(DataKind::Gpkg),
					atlas_path: PathBuf::from(atlas),
					data_directory: PathBuf::from(dir),
				},
			);
		}
		if datasets.is_empty() {
			bail!("no datasets configured: set DATASETS_PATH or the per-kind path variables");
		}
		Ok(DatasetRegistry { datasets })
	}

	pub fn insert(&mut self, name: impl Into<String>, config: DatasetConfig) {
		self.datasets.insert(name.into(), config);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use assert_fs::TempDir;

	#[test]
	fn registry_parses_with_and_without_kind() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("datasets.json");
		fs::write(
			&path,
			r#"{
				"halmstad-laz": {"kind": "lidar", "atlas_path": "/data/atlas.json", "data_directory": "/data/laz"},
				"footprints": {"atlas_path": "/data/tiles_atlas.json", "data_directory": "/data/tiled"}
			}"#,
		)
		.unwrap();

		let registry = DatasetRegistry::from_path(&path).unwrap();
		assert_eq!(registry.datasets.len(), 2);
		assert_eq!(registry.datasets["halmstad-laz"].kind, Some(DataKind::Lidar));
		assert_eq!(registry.datasets["footprints"].kind, None);
		assert_eq!(registry.datasets["footprints"].data_directory, PathBuf::from("/data/tiled"));
	}

	#[test]
	fn kind_parse_roundtrip() {
		assert_eq!(DataKind::parse("lidar"), Some(DataKind::Lidar));
		assert_eq!(DataKind::parse("gpkg"), Some(DataKind::Gpkg));
		assert_eq!(DataKind::parse("shapefile"), None);
		assert_eq!(DataKind::Lidar.to_string(), "lidar");
	}
}
