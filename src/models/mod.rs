//! Core data models shared by the indexes.

pub mod geo_box;
pub mod types;

pub use geo_box::{GeoBox, GeoCoord};
pub use types::{TypeConfig, TypeId, TypeInfo, TypeInfoSet, DEFAULT_INDEX_LEVEL};

/// Byte position of an object record in a companion data file.
pub type FileOffset = u64;
