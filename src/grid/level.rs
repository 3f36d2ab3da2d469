//! Magnification levels and the regular cell grid they define.
//!
//! At level `n` the world is split into `2^n` columns and `2^n` rows, so a
//! cell is `360 / 2^n` degrees wide and `180 / 2^n` degrees high. Cell
//! `(0, 0)` sits at the south-west corner (-90, -180).

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::models::geo_box::{MIN_LAT, MIN_LON};
use crate::models::{GeoBox, GeoCoord};

/// Grid magnification level.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(try_from = "u32", into = "u32")]
pub struct Level(u32);

impl Level {
    /// Finest supported level; cell indices still fit in `u32`.
    pub const MAX: u32 = 31;

    pub fn new(level: u32) -> Result<Self> {
        if level > Self::MAX {
            return Err(IndexError::InvalidLevel(level));
        }
        Ok(Self(level))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Next coarser level, `None` at level 0
    pub fn parent(self) -> Option<Level> {
        self.0.checked_sub(1).map(Level)
    }

    /// Next finer level, `None` at the finest level
    pub fn child(self) -> Option<Level> {
        (self.0 < Self::MAX).then(|| Level(self.0 + 1))
    }

    /// Number of cells along each axis
    pub fn cells_per_axis(self) -> u64 {
        1u64 << self.0
    }

    /// Highest valid cell index on either axis
    pub fn max_cell(self) -> u32 {
        (self.cells_per_axis() - 1) as u32
    }

    /// Cell width in degrees of longitude
    pub fn cell_width(self) -> f64 {
        360.0 / self.cells_per_axis() as f64
    }

    /// Cell height in degrees of latitude
    pub fn cell_height(self) -> f64 {
        180.0 / self.cells_per_axis() as f64
    }

    fn clamp_cell(self, value: f64) -> u32 {
        let max = self.max_cell();
        if value >= max as f64 {
            max
        } else if value > 0.0 {
            value as u32
        } else {
            // negative and NaN
            0
        }
    }

    /// Column containing `lon`
    pub fn cell_x(self, lon: f64) -> u32 {
        self.clamp_cell(((lon - MIN_LON) / self.cell_width()).floor())
    }

    /// Row containing `lat`
    pub fn cell_y(self, lat: f64) -> u32 {
        self.clamp_cell(((lat - MIN_LAT) / self.cell_height()).floor())
    }

    /// `(x, y)` of the cell containing `coord`
    pub fn cell_of(self, coord: &GeoCoord) -> (u32, u32) {
        (self.cell_x(coord.lon), self.cell_y(coord.lat))
    }

    /// Geographic extent of cell `(x, y)`
    pub fn cell_box(self, x: u32, y: u32) -> GeoBox {
        let width = self.cell_width();
        let height = self.cell_height();
        GeoBox::new(
            GeoCoord::new(y as f64 * height + MIN_LAT, x as f64 * width + MIN_LON),
            GeoCoord::new(
                (y as f64 + 1.0) * height + MIN_LAT,
                (x as f64 + 1.0) * width + MIN_LON,
            ),
        )
    }

    /// Cells overlapping `bbox`, `None` for an invalid box
    pub fn cells_for_box(self, bbox: &GeoBox) -> Option<CellRange> {
        if !bbox.is_valid() {
            return None;
        }
        let (x_start, y_start) = self.cell_of(&bbox.min());
        let (x_end, y_end) = self.cell_of(&bbox.max());
        CellRange::new(x_start, x_end, y_start, y_end)
    }
}

impl TryFrom<u32> for Level {
    type Error = IndexError;

    fn try_from(level: u32) -> Result<Self> {
        Level::new(level)
    }
}

impl From<Level> for u32 {
    fn from(level: Level) -> Self {
        level.0
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inclusive rectangle of cells on one grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRange {
    pub x_start: u32,
    pub x_end: u32,
    pub y_start: u32,
    pub y_end: u32,
}

impl CellRange {
    /// `None` unless start <= end on both axes
    pub fn new(x_start: u32, x_end: u32, y_start: u32, y_end: u32) -> Option<Self> {
        (x_start <= x_end && y_start <= y_end).then_some(Self {
            x_start,
            x_end,
            y_start,
            y_end,
        })
    }

    pub fn single(x: u32, y: u32) -> Self {
        Self {
            x_start: x,
            x_end: x,
            y_start: y,
            y_end: y,
        }
    }

    pub fn x_count(&self) -> u64 {
        (self.x_end - self.x_start) as u64 + 1
    }

    pub fn y_count(&self) -> u64 {
        (self.y_end - self.y_start) as u64 + 1
    }

    /// Number of cells in the range
    pub fn len(&self) -> u64 {
        self.x_count() * self.y_count()
    }

    /// Always false; a range holds at least one cell
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x_start && x <= self.x_end && y >= self.y_start && y <= self.y_end
    }

    pub fn intersect(&self, other: &CellRange) -> Option<CellRange> {
        CellRange::new(
            self.x_start.max(other.x_start),
            self.x_end.min(other.x_end),
            self.y_start.max(other.y_start),
            self.y_end.min(other.y_end),
        )
    }

    /// Smallest range covering both
    pub fn union(&self, other: &CellRange) -> CellRange {
        CellRange {
            x_start: self.x_start.min(other.x_start),
            x_end: self.x_end.max(other.x_end),
            y_start: self.y_start.min(other.y_start),
            y_end: self.y_end.max(other.y_end),
        }
    }

    /// Row-major bit position of `(x, y)`; the cell must be inside the range
    pub fn linear_index(&self, x: u32, y: u32) -> u64 {
        debug_assert!(self.contains(x, y));
        (y - self.y_start) as u64 * self.x_count() + (x - self.x_start) as u64
    }

    /// Cells in row-major order (south row first, west to east)
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> {
        let range = *self;
        (range.y_start..=range.y_end)
            .flat_map(move |y| (range.x_start..=range.x_end).map(move |x| (x, y)))
    }
}
