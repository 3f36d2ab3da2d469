//! Writer for coverage index files.
//!
//! Marks are kept as cell rectangles and only turned into bits when the file
//! is written, so memory is bounded by the bitmap of the covered extent.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::info;

use crate::error::{IndexError, Result};
use crate::grid::bitmap;
use crate::grid::{CellRange, Level, TileId};
use crate::models::{GeoBox, GeoCoord};

/// Cell level used when the build configuration names none.
pub const DEFAULT_COVERAGE_LEVEL: u32 = 14;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageStats {
    pub covered_tiles: u64,
    pub width: u64,
    pub height: u64,
    pub file_size: u64,
}

/// Collects covered cells and writes a coverage index.
pub struct CoverageIndexBuilder {
    level: Level,
    ranges: Vec<CellRange>,
}

impl CoverageIndexBuilder {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ranges: Vec::new(),
        }
    }

    pub fn level(&self) -> Level {
        self.level
    }

    /// Number of marks (coordinates, boxes, tiles) so far
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Mark the cell containing `coord`. Invalid coordinates are ignored.
    pub fn add_coord(&mut self, coord: &GeoCoord) {
        if coord.is_valid() {
            let (x, y) = self.level.cell_of(coord);
            self.ranges.push(CellRange::single(x, y));
        }
    }

    /// Mark every cell overlapping `bbox`.
    pub fn add_box(&mut self, bbox: &GeoBox) -> Result<()> {
        let range = self
            .level
            .cells_for_box(bbox)
            .ok_or_else(|| IndexError::Build(format!("invalid bounding box {}", bbox)))?;
        self.ranges.push(range);
        Ok(())
    }

    /// Mark a single tile, which must be of the builder's level.
    pub fn add_tile(&mut self, tile: &TileId) -> Result<()> {
        if tile.level() != self.level {
            return Err(IndexError::Build(format!(
                "tile {} is not of level {}",
                tile, self.level
            )));
        }
        self.ranges.push(CellRange::single(tile.x(), tile.y()));
        Ok(())
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<CoverageStats> {
        let path = path.as_ref();

        // an empty coverage still stores one (unset) cell
        let extent = self
            .ranges
            .iter()
            .copied()
            .reduce(|a, b| a.union(&b))
            .unwrap_or(CellRange::single(0, 0));

        let bits = self.mark(&extent)?;

        let mut writer = BufWriter::new(File::create(path)?);
        for value in [
            self.level.get(),
            extent.x_start,
            extent.y_start,
            extent.x_end,
            extent.y_end,
        ] {
            writer.write_all(&value.to_le_bytes())?;
        }
        writer.write_all(&bits)?;
        writer.flush()?;

        let stats = CoverageStats {
            covered_tiles: bits.iter().map(|b| b.count_ones() as u64).sum(),
            width: extent.x_count(),
            height: extent.y_count(),
            file_size: writer.get_ref().metadata()?.len(),
        };

        info!(
            "Wrote coverage index {} (level {}, {}x{} cells, {} covered)",
            path.display(),
            self.level,
            stats.width,
            stats.height,
            stats.covered_tiles
        );

        Ok(stats)
    }

    /// Bitmap of `extent` with every marked cell set.
    fn mark(&self, extent: &CellRange) -> Result<Vec<u8>> {
        let too_large = || {
            IndexError::Build(format!(
                "coverage bitmap of {}x{} cells at level {} does not fit in memory",
                extent.x_count(),
                extent.y_count(),
                self.level
            ))
        };

        let len = usize::try_from(extent.len().div_ceil(8)).map_err(|_| too_large())?;
        let mut bits = Vec::new();
        bits.try_reserve_exact(len).map_err(|_| too_large())?;
        bits.resize(len, 0u8);

        for range in &self.ranges {
            for y in range.y_start..=range.y_end {
                let first = extent.linear_index(range.x_start, y);
                let last = extent.linear_index(range.x_end, y);
                bitmap::set_range(&mut bits, first, last + 1);
            }
        }

        Ok(bits)
    }
}
