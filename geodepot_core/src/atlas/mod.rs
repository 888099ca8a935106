//! The atlas: an indexed, projected-coordinate catalog of tiles.
//!
//! Two catalog shapes exist in the wild and both are supported behind one
//! query interface:
//! - [`GridAtlas`] — point-cloud tiles in a two-level sorted map keyed by
//!   integer origin; queried via a padded binary range seek.
//! - [`VectorAtlas`] — footprint tiles in a flat map keyed
//!   `tile_<x>_<y>` with exact rectangles; queried by linear scan.

mod grid;
mod index;
mod vector;

pub use grid::{GridAtlas, GridEntry};
pub use index::{SEEK_PADDING, range_seek};
pub use vector::{DEFAULT_VECTOR_TILE_SIZE, VectorAtlas, VectorEntry};

use crate::{DimensionRounding, Tile, TileBounds, io::atomic_write};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fs, path::Path};

/// The two catalog shapes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AtlasKind {
	/// Two-level integer-origin map (LAZ point clouds).
	Grid,
	/// Flat map with exact rectangles (GPKG footprints).
	Vector,
}

/// A named tile catalog for one dataset in one CRS.
#[derive(Clone, Debug, PartialEq)]
pub enum Atlas {
	Grid(GridAtlas),
	Vector(VectorAtlas),
}

impl Atlas {
	pub fn empty(kind: AtlasKind, rounding: DimensionRounding) -> Atlas {
		match kind {
			AtlasKind::Grid => Atlas::Grid(GridAtlas::new(rounding)),
			AtlasKind::Vector => Atlas::Vector(VectorAtlas::new()),
		}
	}

	pub fn from_value(value: &Value, kind: AtlasKind, rounding: DimensionRounding) -> Atlas {
		match kind {
			AtlasKind::Grid => Atlas::Grid(GridAtlas::from_value(value, rounding)),
			AtlasKind::Vector => Atlas::Vector(VectorAtlas::from_value(value)),
		}
	}

	/// Read an atlas file. Fails if the file is missing or not JSON; lenient
	/// about individual malformed entries (skipped with a warning).
	pub fn load(path: &Path, kind: AtlasKind, rounding: DimensionRounding) -> Result<Atlas> {
		let bytes = fs::read(path).with_context(|| format!("reading atlas file {path:?}"))?;
		let value: Value = serde_json::from_slice(&bytes).with_context(|| format!("parsing atlas file {path:?}"))?;
		Ok(Atlas::from_value(&value, kind, rounding))
	}

	/// Read an atlas file, treating a missing or unreadable file as an empty
	/// catalog. The client uses this: a broken local atlas must never stop a
	/// reconcile, it only means everything looks missing.
	pub fn load_or_empty(path: &Path, kind: AtlasKind, rounding: DimensionRounding) -> Atlas {
		match Atlas::load(path, kind, rounding) {
			Ok(atlas) => atlas,
			Err(err) => {
				log::warn!("local atlas {path:?} not usable ({err:#}); starting from an empty catalog");
				Atlas::empty(kind, rounding)
			}
		}
	}

	/// Persist via write-to-temp + fsync + atomic rename.
	pub fn save(&self, path: &Path) -> Result<()> {
		let value = self.to_value();
		let mut bytes = serde_json::to_vec_pretty(&value)?;
		bytes.push(b'\n');
		atomic_write(path, &bytes).with_context(|| format!("writing atlas file {path:?}"))
	}

	pub fn to_value(&self) -> Value {
		match self {
			Atlas::Grid(grid) => grid.to_value(),
			Atlas::Vector(vector) => vector.to_value(),
		}
	}

	pub fn kind(&self) -> AtlasKind {
		match self {
			Atlas::Grid(_) => AtlasKind::Grid,
			Atlas::Vector(_) => AtlasKind::Vector,
		}
	}

	/// All tiles whose extent intersects `query`, without duplicates.
	pub fn query(&self, query: &TileBounds) -> Vec<Tile> {
		match self {
			Atlas::Grid(grid) => grid.query(query),
			Atlas::Vector(vector) => vector.query(query),
		}
	}

	pub fn len(&self) -> usize {
		match self {
			Atlas::Grid(grid) => grid.len(),
			Atlas::Vector(vector) => vector.len(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn origin_of(&self, filename: &str) -> Option<(i64, i64)> {
		match self {
			Atlas::Grid(grid) => grid.origin_of(filename),
			Atlas::Vector(vector) => vector.origin_of(filename),
		}
	}
}

/// Guess the catalog shape from a parsed atlas document.
///
/// Grid documents nest one level deeper than vector documents; an empty
/// document defaults to vector.
pub fn detect_kind(value: &Value) -> AtlasKind {
	if let Some(object) = value.as_object() {
		for entry in object.values() {
			if let Some(inner) = entry.as_object() {
				if inner.get("filename").is_some() {
					return AtlasKind::Vector;
				}
				if inner.values().any(Value::is_object) {
					return AtlasKind::Grid;
				}
			}
		}
	}
	AtlasKind::Vector
}
