use super::index::{SEEK_PADDING, range_seek};
use crate::{DimensionRounding, Tile, TileBounds};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Catalog of point-cloud tiles keyed by integer origin.
///
/// Tiles are stored as a two-level map `x origin -> y origin -> entry`, both
/// levels sorted ascending, which is what makes the padded range seek in
/// [`query`](GridAtlas::query) valid.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GridAtlas {
	columns: BTreeMap<i64, BTreeMap<i64, GridEntry>>,
	rounding: DimensionRounding,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GridEntry {
	pub filename: String,
	pub width: i64,
	pub height: i64,
}

impl GridAtlas {
	pub fn new(rounding: DimensionRounding) -> GridAtlas {
		GridAtlas {
			columns: BTreeMap::new(),
			rounding,
		}
	}

	/// Build from a parsed atlas JSON document.
	///
	/// Entries with non-numeric origins or missing fields are skipped with a
	/// warning; a malformed entry must not abort a query over the rest.
	pub fn from_value(value: &Value, rounding: DimensionRounding) -> GridAtlas {
		let mut atlas = GridAtlas::new(rounding);
		let Some(object) = value.as_object() else {
			log::warn!("grid atlas document is not a JSON object; treating as empty");
			return atlas;
		};
		for (x_key, rows) in object {
			let Ok(x) = x_key.trim().parse::<i64>() else {
				log::warn!("skipping atlas column with non-numeric origin {x_key:?}");
				continue;
			};
			let Some(rows) = rows.as_object() else {
				log::warn!("skipping atlas column {x_key}: not an object");
				continue;
			};
			for (y_key, entry) in rows {
				let Ok(y) = y_key.trim().parse::<i64>() else {
					log::warn!("skipping atlas tile with non-numeric origin {x_key}/{y_key:?}");
					continue;
				};
				match parse_entry(entry) {
					Some(entry) => {
						atlas.insert(x, y, entry);
					}
					None => log::warn!("skipping malformed atlas tile at ({x}, {y})"),
				}
			}
		}
		atlas
	}

	/// Serialize with both key levels ordered ascending as integers.
	pub fn to_value(&self) -> Value {
		let mut outer = Map::new();
		for (x, rows) in &self.columns {
			let mut inner = Map::new();
			for (y, entry) in rows {
				inner.insert(
					y.to_string(),
					serde_json::json!({
						"filename": entry.filename,
						"width": entry.width,
						"height": entry.height,
					}),
				);
			}
			outer.insert(x.to_string(), Value::Object(inner));
		}
		Value::Object(outer)
	}

	pub fn insert(&mut self, x: i64, y: i64, entry: GridEntry) {
		self.columns.entry(x).or_default().insert(y, entry);
	}

	pub fn len(&self) -> usize {
		self.columns.values().map(BTreeMap::len).sum()
	}

	pub fn is_empty(&self) -> bool {
		self.columns.is_empty()
	}

	pub fn filenames(&self) -> impl Iterator<Item = &str> {
		self
			.columns
			.values()
			.flat_map(|rows| rows.values().map(|e| e.filename.as_str()))
	}

	pub fn origin_of(&self, filename: &str) -> Option<(i64, i64)> {
		for (x, rows) in &self.columns {
			for (y, entry) in rows {
				if entry.filename == filename {
					return Some((*x, *y));
				}
			}
		}
		None
	}

	/// All tiles whose extent intersects `query`.
	///
	/// Starts each level at the padded range seek and stops once origins pass
	/// the padded upper edge; within a column the walk also terminates early
	/// when the previous tile's top edge has already cleared the padded query
	/// top. Every candidate still passes the precise rectangle test.
	pub fn query(&self, query: &TileBounds) -> Vec<Tile> {
		let mut tiles = Vec::new();
		if self.columns.is_empty() {
			return tiles;
		}

		let pad = SEEK_PADDING as f64;
		let x_keys: Vec<i64> = self.columns.keys().copied().collect();
		let x_low = (query.minx.floor() as i64).saturating_sub(SEEK_PADDING);
		let x_high = (query.maxx.ceil() as i64).saturating_add(SEEK_PADDING);
		let Some(x_start) = range_seek(&x_keys, x_low, x_high) else {
			return tiles;
		};

		for &x in &x_keys[x_start..] {
			if x as f64 > query.maxx + pad {
				break;
			}
			let rows = &self.columns[&x];
			let y_keys: Vec<i64> = rows.keys().copied().collect();
			let y_low = (query.miny.floor() as i64).saturating_sub(SEEK_PADDING);
			let y_high = (query.maxy.ceil() as i64).saturating_add(SEEK_PADDING);
			let Some(y_start) = range_seek(&y_keys, y_low, y_high) else {
				continue;
			};

			let mut previous_top: Option<f64> = None;
			for &y in &y_keys[y_start..] {
				if y as f64 > query.maxy + pad {
					break;
				}
				if let Some(top) = previous_top {
					if top >= query.maxy + pad {
						break;
					}
				}
				let entry = &rows[&y];
				let bounds = self.entry_bounds(x, y, entry);
				if bounds.intersects(query) {
					tiles.push(Tile::new(entry.filename.clone(), bounds));
				}
				previous_top = Some(bounds.maxy);
			}
		}
		tiles
	}

	fn entry_bounds(&self, x: i64, y: i64, entry: &GridEntry) -> TileBounds {
		TileBounds::from_origin(x, y, self.rounding.apply(entry.width), self.rounding.apply(entry.height))
	}
}

fn parse_entry(value: &Value) -> Option<GridEntry> {
	let filename = value.get("filename")?.as_str()?.to_string();
	let width = parse_dimension(value.get("width")?)?;
	let height = parse_dimension(value.get("height")?)?;
	Some(GridEntry { filename, width, height })
}

// Atlas generations stored dimensions as ints, floats or numeric strings.
fn parse_dimension(value: &Value) -> Option<i64> {
	if let Some(int) = value.as_i64() {
		return Some(int);
	}
	if let Some(float) = value.as_f64() {
		return Some(float as i64);
	}
	value.as_str()?.trim().parse().ok()
}
