//! Coverage index: which grid cells of a fixed level contain imported data.
//!
//! The file is small (one bit per cell of the bounding cell rectangle) and is
//! read into memory at open, so lookups never touch the disk.

mod builder;

pub use builder::{CoverageIndexBuilder, CoverageStats, DEFAULT_COVERAGE_LEVEL};

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{IndexError, Result};
use crate::grid::bitmap::{self, Bitmap};
use crate::grid::{CellRange, Level, TileId, TileIdBox};
use crate::models::GeoCoord;
use crate::scanner::FileScanner;

/// File name of the coverage index inside a database directory.
pub const COVERAGE_INDEX_FILE: &str = "coverage.idx";

/// Level plus cell bounds, five little-endian u32 values.
const COVERAGE_HEADER_LEN: u64 = 4 * 5;

/// An opened coverage index.
#[derive(Debug)]
pub struct CoverageIndex {
    path: PathBuf,
    level: Level,
    cells: CellRange,
    bitmap: Option<Bitmap>,
}

impl CoverageIndex {
    /// Open `dir/coverage.idx`.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::open_file(dir.as_ref().join(COVERAGE_INDEX_FILE))
    }

    pub fn open_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let scanner = FileScanner::open(path, false)?;

        let [raw_level, min_x, min_y, max_x, max_y] = read_header(&scanner)
            .map_err(|_| IndexError::corrupt(path, "file too short for header"))?;

        let level = Level::new(raw_level)
            .map_err(|_| IndexError::corrupt(path, format!("invalid level {}", raw_level)))?;

        let cells = CellRange::new(min_x, max_x, min_y, max_y)
            .filter(|c| c.x_end <= level.max_cell() && c.y_end <= level.max_cell())
            .ok_or_else(|| {
                IndexError::corrupt(
                    path,
                    format!(
                        "invalid cell bounds {},{} - {},{} for level {}",
                        min_x, min_y, max_x, max_y, level
                    ),
                )
            })?;

        let bitmap_len = bitmap::byte_len(cells.len()) as u64;
        if COVERAGE_HEADER_LEN + bitmap_len != scanner.len() {
            return Err(IndexError::corrupt(
                path,
                format!(
                    "expected {} bytes for {}x{} cells, file has {}",
                    COVERAGE_HEADER_LEN + bitmap_len,
                    cells.x_count(),
                    cells.y_count(),
                    scanner.len()
                ),
            ));
        }

        let bytes = scanner
            .read_at(COVERAGE_HEADER_LEN, bitmap_len as usize)?
            .into_owned();
        let bitmap = Bitmap::from_bytes(bytes, cells.len())
            .ok_or_else(|| IndexError::corrupt(path, "bitmap padding bits set"))?;

        info!(
            "Opened coverage index {} (level {}, {}x{} cells, {} covered)",
            path.display(),
            level,
            cells.x_count(),
            cells.y_count(),
            bitmap.count_ones()
        );

        Ok(Self {
            path: path.to_path_buf(),
            level,
            cells,
            bitmap: Some(bitmap),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.bitmap.is_some()
    }

    /// Drop the loaded bitmap. Afterwards nothing is covered.
    pub fn close(&mut self) {
        if self.bitmap.take().is_some() {
            debug!("Closed coverage index {}", self.path.display());
        }
    }

    pub fn level(&self) -> Level {
        self.level
    }

    /// Tiles spanned by the stored bitmap
    pub fn tile_box(&self) -> Option<TileIdBox> {
        TileIdBox::from_range(self.level, self.cells)
    }

    /// Tile of this index's level containing `coord`
    pub fn get_tile(&self, coord: &GeoCoord) -> TileId {
        TileId::for_coord(self.level, coord)
    }

    /// Whether data was imported in the cell containing `coord`.
    pub fn is_covered(&self, coord: &GeoCoord) -> bool {
        coord.is_valid() && self.is_tile_covered(&self.get_tile(coord))
    }

    /// Whether `tile` holds imported data; tiles of other levels never do.
    pub fn is_tile_covered(&self, tile: &TileId) -> bool {
        let Some(bitmap) = &self.bitmap else {
            return false;
        };
        if tile.level() != self.level || !self.cells.contains(tile.x(), tile.y()) {
            return false;
        }
        bitmap.get(self.cells.linear_index(tile.x(), tile.y()))
    }

    /// Number of covered cells
    pub fn covered_tiles(&self) -> u64 {
        self.bitmap.as_ref().map_or(0, Bitmap::count_ones)
    }
}

fn read_header(scanner: &FileScanner) -> Result<[u32; 5]> {
    let mut cursor = scanner.cursor(0);
    let mut header = [0u32; 5];
    for value in &mut header {
        *value = cursor.read_u32()?;
    }
    Ok(header)
}
