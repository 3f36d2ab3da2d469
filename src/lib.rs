//! Scout Index - tiled-grid spatial indexes for map databases
//!
//! This library provides the area index (bounding box → object offsets per
//! type) and the coverage index (which grid cells hold imported data), plus
//! the writers used by the ingest binary.

pub mod area_index;
pub mod coverage_index;
pub mod error;
pub mod grid;
pub mod models;
pub mod scanner;
pub mod varint;

pub use area_index::{AreaIndex, AreaIndexBuilder, AreaOffsets};
pub use coverage_index::{CoverageIndex, CoverageIndexBuilder};
pub use error::{IndexError, Result};
pub use grid::{Level, TileId, TileIdBox};
pub use models::{FileOffset, GeoBox, GeoCoord, TypeConfig, TypeId, TypeInfo, TypeInfoSet};
