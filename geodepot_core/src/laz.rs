//! Minimal LAS/LAZ public-header reader.
//!
//! Only the spatial extent is needed to index a tile, and the public header
//! block is stored uncompressed even in LAZ files, so a full point-cloud
//! parser would be wasted here. Offsets follow the LAS 1.2-1.4 public
//! header block, which is identical up to and including the bounding box.

use crate::{DimensionRounding, TileBounds};
use anyhow::{Context, Result, bail};
use byteorder::{ByteOrder, LittleEndian};
use std::{fs::File, io::Read, path::Path};

const SIGNATURE: &[u8; 4] = b"LASF";
const HEADER_LEN: usize = 227;

// Field offsets within the public header block.
const OFFSET_MAX_X: usize = 179;
const OFFSET_MIN_X: usize = 187;
const OFFSET_MAX_Y: usize = 195;
const OFFSET_MIN_Y: usize = 203;

/// Integer extent read from a point-cloud header, truncated to whole units.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderExtent {
	pub xmin: i64,
	pub ymin: i64,
	pub xmax: i64,
	pub ymax: i64,
}

impl HeaderExtent {
	/// Tile dimensions after applying the dataset's rounding rule.
	pub fn dimensions(&self, rounding: DimensionRounding) -> (i64, i64) {
		(
			rounding.apply(self.xmax - self.xmin),
			rounding.apply(self.ymax - self.ymin),
		)
	}

	pub fn bounds(&self, rounding: DimensionRounding) -> TileBounds {
		let (width, height) = self.dimensions(rounding);
		TileBounds::from_origin(self.xmin, self.ymin, width, height)
	}
}

/// Read the spatial extent from a `.laz`/`.las` file header.
pub fn read_header_extent(path: &Path) -> Result<HeaderExtent> {
	let mut file = File::open(path).with_context(|| format!("opening point cloud file {path:?}"))?;
	let mut header = [0u8; HEADER_LEN];
	file
		.read_exact(&mut header)
		.with_context(|| format!("reading LAS header of {path:?}"))?;
	parse_header(&header).with_context(|| format!("parsing LAS header of {path:?}"))
}

fn parse_header(header: &[u8; HEADER_LEN]) -> Result<HeaderExtent> {
	if &header[0..4] != SIGNATURE {
		bail!("missing LASF signature");
	}

	let max_x = LittleEndian::read_f64(&header[OFFSET_MAX_X..]);
	let min_x = LittleEndian::read_f64(&header[OFFSET_MIN_X..]);
	let max_y = LittleEndian::read_f64(&header[OFFSET_MAX_Y..]);
	let min_y = LittleEndian::read_f64(&header[OFFSET_MIN_Y..]);

	if !(min_x.is_finite() && min_y.is_finite() && max_x.is_finite() && max_y.is_finite()) {
		bail!("non-finite bounding box in header");
	}
	if min_x > max_x || min_y > max_y {
		bail!("inverted bounding box in header");
	}

	Ok(HeaderExtent {
		xmin: min_x as i64,
		ymin: min_y as i64,
		xmax: max_x as i64,
		ymax: max_y as i64,
	})
}

#[cfg(test)]
pub(crate) fn write_test_header(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Vec<u8> {
	let mut header = vec![0u8; HEADER_LEN];
	header[0..4].copy_from_slice(SIGNATURE);
	header[24] = 1; // version major
	header[25] = 2; // version minor
	LittleEndian::write_u16(&mut header[94..], HEADER_LEN as u16);
	LittleEndian::write_f64(&mut header[OFFSET_MAX_X..OFFSET_MAX_X + 8], max_x);
	LittleEndian::write_f64(&mut header[OFFSET_MIN_X..OFFSET_MIN_X + 8], min_x);
	LittleEndian::write_f64(&mut header[OFFSET_MAX_Y..OFFSET_MAX_Y + 8], max_y);
	LittleEndian::write_f64(&mut header[OFFSET_MIN_Y..OFFSET_MIN_Y + 8], min_y);
	header
}
