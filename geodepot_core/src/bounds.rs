use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A rectangular extent in the projected coordinate system of a dataset.
///
/// The rectangle is axis-aligned and closed on all edges: two extents that
/// merely touch still intersect. Degenerate rectangles (zero width and/or
/// height) are valid and behave like points or lines.
///
/// # Examples
/// ```
/// use geodepot_core::TileBounds;
///
/// let a = TileBounds::new(0.0, 0.0, 100.0, 100.0).unwrap();
/// let b = TileBounds::new(100.0, 0.0, 110.0, 10.0).unwrap();
/// assert!(a.intersects(&b)); // edge-touching counts
/// ```
#[derive(Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TileBounds {
	pub minx: f64,
	pub miny: f64,
	pub maxx: f64,
	pub maxy: f64,
}

impl TileBounds {
	/// Build an extent, rejecting inverted rectangles.
	pub fn new(minx: f64, miny: f64, maxx: f64, maxy: f64) -> Result<TileBounds> {
		ensure!(minx <= maxx, "invalid bounds: minx ({minx}) > maxx ({maxx})");
		ensure!(miny <= maxy, "invalid bounds: miny ({miny}) > maxy ({maxy})");
		Ok(TileBounds { minx, miny, maxx, maxy })
	}

	/// Extent of a tile anchored at an integer origin with the given dimensions.
	pub fn from_origin(x: i64, y: i64, width: i64, height: i64) -> TileBounds {
		TileBounds {
			minx: x as f64,
			miny: y as f64,
			maxx: (x + width) as f64,
			maxy: (y + height) as f64,
		}
	}

	/// Closed-interval intersection test.
	pub fn intersects(&self, other: &TileBounds) -> bool {
		!(self.maxx < other.minx || self.minx > other.maxx || self.maxy < other.miny || self.miny > other.maxy)
	}

	/// True if `other` lies entirely within `self`.
	pub fn contains(&self, other: &TileBounds) -> bool {
		self.minx <= other.minx && self.miny <= other.miny && self.maxx >= other.maxx && self.maxy >= other.maxy
	}

	pub fn as_tuple(&self) -> (f64, f64, f64, f64) {
		(self.minx, self.miny, self.maxx, self.maxy)
	}
}

impl fmt::Debug for TileBounds {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "[{}, {}, {}, {}]", self.minx, self.miny, self.maxx, self.maxy)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn new_rejects_inverted() {
		assert!(TileBounds::new(10.0, 0.0, 0.0, 10.0).is_err());
		assert!(TileBounds::new(0.0, 10.0, 10.0, 0.0).is_err());
		assert!(TileBounds::new(0.0, 0.0, 0.0, 0.0).is_ok());
	}

	#[test]
	fn intersection_is_closed_on_edges() {
		let tile = TileBounds::new(0.0, 0.0, 100.0, 100.0).unwrap();
		assert!(tile.intersects(&TileBounds::new(100.0, 0.0, 110.0, 10.0).unwrap()));
		assert!(tile.intersects(&TileBounds::new(-10.0, -10.0, 0.0, 0.0).unwrap()));
		assert!(!tile.intersects(&TileBounds::new(100.1, 0.0, 110.0, 10.0).unwrap()));
	}

	#[test]
	fn degenerate_point_intersects_containing_tile() {
		let tile = TileBounds::new(0.0, 0.0, 100.0, 100.0).unwrap();
		let point = TileBounds::new(50.0, 50.0, 50.0, 50.0).unwrap();
		assert!(tile.intersects(&point));
		assert!(tile.contains(&point));
	}

	#[test]
	fn containment() {
		let outer = TileBounds::new(0.0, 0.0, 100.0, 100.0).unwrap();
		let inner = TileBounds::new(10.0, 10.0, 90.0, 90.0).unwrap();
		assert!(outer.contains(&inner));
		assert!(!inner.contains(&outer));
		assert!(outer.contains(&outer));
	}
}
