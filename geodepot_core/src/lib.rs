//! Core types for the geodepot tile distribution service.
//!
//! This crate owns the pieces both halves of the system share: the
//! [`Atlas`] catalog (flat vector map or two-level grid map behind one
//! query interface), the closed-interval [`TileBounds`] rectangle math,
//! the LAS/LAZ header extent reader and the durable write helpers used
//! for atomic atlas updates.

mod atlas;
mod bounds;
pub mod io;
mod laz;
mod rounding;
mod tile;

pub use atlas::{
	Atlas, AtlasKind, DEFAULT_VECTOR_TILE_SIZE, GridAtlas, GridEntry, SEEK_PADDING, VectorAtlas, VectorEntry,
	detect_kind, range_seek,
};
pub use bounds::TileBounds;
pub use laz::{HeaderExtent, read_header_extent};
pub use rounding::DimensionRounding;
pub use tile::{Tile, TileDescriptor};
