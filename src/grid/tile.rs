//! Tile identity: a grid cell qualified by its level.

use std::fmt;

use super::{CellRange, Level};
use crate::models::{GeoBox, GeoCoord};

/// A single grid cell at a given level.
///
/// Tiles order by level, then row, then column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId {
    level: Level,
    y: u32,
    x: u32,
}

impl TileId {
    /// Create a tile; `None` if the cell lies outside the level's grid.
    pub fn new(level: Level, x: u32, y: u32) -> Option<Self> {
        (x <= level.max_cell() && y <= level.max_cell()).then_some(Self { level, y, x })
    }

    /// Tile containing `coord`
    pub fn for_coord(level: Level, coord: &GeoCoord) -> Self {
        let (x, y) = level.cell_of(coord);
        Self { level, y, x }
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn x(&self) -> u32 {
        self.x
    }

    pub fn y(&self) -> u32 {
        self.y
    }

    pub fn bounding_box(&self) -> GeoBox {
        self.level.cell_box(self.x, self.y)
    }

    /// The tile one level up that covers this one, `None` at level 0.
    pub fn parent(&self) -> Option<TileId> {
        let level = self.level.parent()?;
        Some(Self {
            level,
            y: self.y / 2,
            x: self.x / 2,
        })
    }

    /// The four tiles one level down, `None` at the finest level.
    pub fn children(&self) -> Option<[TileId; 4]> {
        let level = self.level.child()?;
        let (x, y) = (self.x * 2, self.y * 2);
        Some([
            Self { level, y, x },
            Self { level, y, x: x + 1 },
            Self { level, y: y + 1, x },
            Self {
                level,
                y: y + 1,
                x: x + 1,
            },
        ])
    }

    /// "level.y.x"
    pub fn display_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.level, self.y, self.x)
    }
}

/// Inclusive rectangle of tiles on one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileIdBox {
    level: Level,
    cells: CellRange,
}

impl TileIdBox {
    /// Box spanning two tiles of the same level, in any corner order.
    pub fn new(a: TileId, b: TileId) -> Option<Self> {
        if a.level != b.level {
            return None;
        }
        let cells = CellRange::new(a.x.min(b.x), a.x.max(b.x), a.y.min(b.y), a.y.max(b.y))?;
        Some(Self {
            level: a.level,
            cells,
        })
    }

    pub fn from_range(level: Level, cells: CellRange) -> Option<Self> {
        (cells.x_end <= level.max_cell() && cells.y_end <= level.max_cell())
            .then_some(Self { level, cells })
    }

    /// Tiles overlapping `bbox`, `None` for an invalid box
    pub fn for_box(level: Level, bbox: &GeoBox) -> Option<Self> {
        let cells = level.cells_for_box(bbox)?;
        Some(Self { level, cells })
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn cells(&self) -> CellRange {
        self.cells
    }

    pub fn min(&self) -> TileId {
        TileId {
            level: self.level,
            y: self.cells.y_start,
            x: self.cells.x_start,
        }
    }

    pub fn max(&self) -> TileId {
        TileId {
            level: self.level,
            y: self.cells.y_end,
            x: self.cells.x_end,
        }
    }

    pub fn width(&self) -> u64 {
        self.cells.x_count()
    }

    pub fn height(&self) -> u64 {
        self.cells.y_count()
    }

    pub fn count(&self) -> u64 {
        self.cells.len()
    }

    pub fn contains(&self, tile: &TileId) -> bool {
        tile.level == self.level && self.cells.contains(tile.x, tile.y)
    }

    pub fn intersection(&self, other: &TileIdBox) -> Option<TileIdBox> {
        if self.level != other.level {
            return None;
        }
        let cells = self.cells.intersect(&other.cells)?;
        Some(Self {
            level: self.level,
            cells,
        })
    }

    pub fn bounding_box(&self) -> GeoBox {
        let min = self.level.cell_box(self.cells.x_start, self.cells.y_start);
        let max = self.level.cell_box(self.cells.x_end, self.cells.y_end);
        GeoBox::new(min.min(), max.max())
    }

    /// Tiles in row-major order
    pub fn iter(&self) -> impl Iterator<Item = TileId> {
        let level = self.level;
        self.cells.iter().map(move |(x, y)| TileId { level, y, x })
    }
}
