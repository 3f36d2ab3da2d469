//! Regular geographic grid: levels, cell ranges, tiles and cell bitmaps.

pub mod bitmap;
mod level;
mod tile;

pub use bitmap::Bitmap;
pub use level::{CellRange, Level};
pub use tile::{TileId, TileIdBox};
