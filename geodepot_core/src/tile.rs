use crate::TileBounds;
use serde::{Deserialize, Serialize};

/// One immutable prebuilt unit of data, referenced by filename.
///
/// The filename is unique within its dataset and safe to use as a path
/// component; the extent is expressed in the dataset's CRS.
#[derive(Clone, Debug, PartialEq)]
pub struct Tile {
	pub filename: String,
	pub extent: TileBounds,
}

impl Tile {
	pub fn new(filename: impl Into<String>, extent: TileBounds) -> Tile {
		Tile {
			filename: filename.into(),
			extent,
		}
	}
}

/// Wire form of a discovered tile.
///
/// Vector datasets announce bare filenames; grid (LAZ) datasets include the
/// tile rectangle so clients can place the tile without opening it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TileDescriptor {
	Extent {
		filename: String,
		xmin: i64,
		ymin: i64,
		xmax: i64,
		ymax: i64,
	},
	Name(String),
}

impl TileDescriptor {
	pub fn filename(&self) -> &str {
		match self {
			TileDescriptor::Extent { filename, .. } => filename,
			TileDescriptor::Name(filename) => filename,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn descriptor_serializes_bare_or_tagged() {
		let name = TileDescriptor::Name("tile_0_0.gpkg".to_string());
		assert_eq!(serde_json::to_string(&name).unwrap(), "\"tile_0_0.gpkg\"");

		let extent = TileDescriptor::Extent {
			filename: "a.laz".to_string(),
			xmin: 0,
			ymin: 0,
			xmax: 2500,
			ymax: 2500,
		};
		let json = serde_json::to_string(&extent).unwrap();
		assert!(json.contains("\"filename\":\"a.laz\""));
		assert!(json.contains("\"xmax\":2500"));
	}

	#[test]
	fn descriptor_roundtrips_from_json() {
		let parsed: TileDescriptor = serde_json::from_str("\"b.gpkg\"").unwrap();
		assert_eq!(parsed.filename(), "b.gpkg");

		let parsed: TileDescriptor =
			serde_json::from_str(r#"{"filename":"a.laz","xmin":1,"ymin":2,"xmax":3,"ymax":4}"#).unwrap();
		assert_eq!(parsed.filename(), "a.laz");
	}
}
