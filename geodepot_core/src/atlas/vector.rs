use crate::{Tile, TileBounds};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Nominal edge length of a vector tile, used when a sidecar only carries
/// the tile origin.
pub const DEFAULT_VECTOR_TILE_SIZE: i64 = 10_000;

/// Catalog of vector tiles (building/road footprints) with exact rectangles.
///
/// Persisted as a flat JSON object keyed `tile_<xmin>_<ymin>`; in memory the
/// tiles are keyed by integer origin so serialization stays ordered and
/// merges by origin are cheap.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VectorAtlas {
	tiles: BTreeMap<(i64, i64), VectorEntry>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VectorEntry {
	pub filename: String,
	pub bounds: TileBounds,
	pub width: f64,
	pub height: f64,
}

impl VectorAtlas {
	pub fn new() -> VectorAtlas {
		VectorAtlas::default()
	}

	/// Build from a parsed atlas JSON document, skipping malformed entries
	/// with a warning.
	pub fn from_value(value: &Value) -> VectorAtlas {
		let mut atlas = VectorAtlas::new();
		let Some(object) = value.as_object() else {
			log::warn!("vector atlas document is not a JSON object; treating as empty");
			return atlas;
		};
		for (key, entry) in object {
			let Some(entry) = parse_entry(entry) else {
				log::warn!("skipping malformed atlas entry {key:?}");
				continue;
			};
			let origin = parse_key(key).unwrap_or((entry.bounds.minx as i64, entry.bounds.miny as i64));
			atlas.tiles.insert(origin, entry);
		}
		atlas
	}

	/// Serialize keyed `tile_<x>_<y>`, ordered by origin.
	pub fn to_value(&self) -> Value {
		let mut object = Map::new();
		for ((x, y), entry) in &self.tiles {
			object.insert(
				format!("tile_{x}_{y}"),
				serde_json::json!({
					"filename": entry.filename,
					"minx": entry.bounds.minx,
					"miny": entry.bounds.miny,
					"maxx": entry.bounds.maxx,
					"maxy": entry.bounds.maxy,
					"width": entry.width,
					"height": entry.height,
				}),
			);
		}
		Value::Object(object)
	}

	pub fn insert(&mut self, origin: (i64, i64), entry: VectorEntry) {
		self.tiles.insert(origin, entry);
	}

	/// Register a tile known only by filename and origin (sidecar merge).
	/// Dimensions default to the nominal tile size.
	pub fn insert_origin(&mut self, filename: &str, x: i64, y: i64) {
		let size = DEFAULT_VECTOR_TILE_SIZE;
		self.tiles.insert(
			(x, y),
			VectorEntry {
				filename: filename.to_string(),
				bounds: TileBounds::from_origin(x, y, size, size),
				width: size as f64,
				height: size as f64,
			},
		);
	}

	pub fn len(&self) -> usize {
		self.tiles.len()
	}

	pub fn is_empty(&self) -> bool {
		self.tiles.is_empty()
	}

	pub fn filenames(&self) -> impl Iterator<Item = &str> {
		self.tiles.values().map(|e| e.filename.as_str())
	}

	pub fn origin_of(&self, filename: &str) -> Option<(i64, i64)> {
		self
			.tiles
			.iter()
			.find(|(_, entry)| entry.filename == filename)
			.map(|(origin, _)| *origin)
	}

	pub fn query(&self, query: &TileBounds) -> Vec<Tile> {
		self
			.tiles
			.values()
			.filter(|entry| entry.bounds.intersects(query))
			.map(|entry| Tile::new(entry.filename.clone(), entry.bounds))
			.collect()
	}
}

fn parse_key(key: &str) -> Option<(i64, i64)> {
	let rest = key.strip_prefix("tile_")?;
	let (x, y) = rest.split_once('_')?;
	Some((x.parse().ok()?, y.parse().ok()?))
}

fn parse_entry(value: &Value) -> Option<VectorEntry> {
	let filename = value.get("filename")?.as_str()?.to_string();
	let minx = parse_coord(value.get("minx")?)?;
	let miny = parse_coord(value.get("miny")?)?;
	let maxx = parse_coord(value.get("maxx")?)?;
	let maxy = parse_coord(value.get("maxy")?)?;
	let bounds = TileBounds::new(minx, miny, maxx, maxy).ok()?;
	let width = value.get("width").and_then(parse_coord).unwrap_or(maxx - minx);
	let height = value.get("height").and_then(parse_coord).unwrap_or(maxy - miny);
	Some(VectorEntry {
		filename,
		bounds,
		width,
		height,
	})
}

fn parse_coord(value: &Value) -> Option<f64> {
	if let Some(float) = value.as_f64() {
		return Some(float);
	}
	value.as_str()?.trim().parse().ok()
}
