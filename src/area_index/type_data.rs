//! Per-type grid metadata stored in the area index header.

use std::io::{self, Write};
use std::path::Path;

use crate::error::{IndexError, Result};
use crate::grid::bitmap::{self, Bitmap};
use crate::grid::{CellRange, Level};
use crate::models::{FileOffset, GeoBox, TypeConfig, TypeId};
use crate::scanner::{FileScanner, ScanCursor};

/// Size of one serialized header entry in bytes.
pub(crate) const TYPE_HEADER_LEN: u64 = 2 + 4 * 6 + 1 + 8;

/// Stored optimization level of a type's base section.
pub(crate) const BASE_SECTION: u32 = u32::MAX;

/// Largest slot width the format allows
pub(crate) const MAX_DATA_OFFSET_BYTES: u8 = 4;

/// Raw header entry as stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TypeHeader {
    pub type_id: TypeId,
    pub opt_level: u32,
    pub level: u32,
    pub cell_x_start: u32,
    pub cell_x_end: u32,
    pub cell_y_start: u32,
    pub cell_y_end: u32,
    pub data_offset_bytes: u8,
    pub bitmap_offset: FileOffset,
}

impl TypeHeader {
    pub fn read(cursor: &mut ScanCursor<'_>) -> Result<Self> {
        Ok(Self {
            type_id: cursor.read_u16()?,
            opt_level: cursor.read_u32()?,
            level: cursor.read_u32()?,
            cell_x_start: cursor.read_u32()?,
            cell_x_end: cursor.read_u32()?,
            cell_y_start: cursor.read_u32()?,
            cell_y_end: cursor.read_u32()?,
            data_offset_bytes: cursor.read_u8()?,
            bitmap_offset: cursor.read_u64()?,
        })
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.type_id.to_le_bytes())?;
        writer.write_all(&self.opt_level.to_le_bytes())?;
        writer.write_all(&self.level.to_le_bytes())?;
        writer.write_all(&self.cell_x_start.to_le_bytes())?;
        writer.write_all(&self.cell_x_end.to_le_bytes())?;
        writer.write_all(&self.cell_y_start.to_le_bytes())?;
        writer.write_all(&self.cell_y_end.to_le_bytes())?;
        writer.write_all(&[self.data_offset_bytes])?;
        writer.write_all(&self.bitmap_offset.to_le_bytes())?;
        Ok(())
    }
}

/// Grid metadata of one section, loaded once at open.
///
/// A type has one base section and optionally further sections that only
/// serve a single magnification (`opt_level`).
#[derive(Debug, Clone)]
pub struct TypeData {
    type_id: TypeId,
    opt_level: Option<Level>,
    level: Level,
    cells: CellRange,
    data_offset_bytes: u8,
    bitmap_offset: FileOffset,
    bitmap: Bitmap,
    bounds: GeoBox,
}

impl TypeData {
    /// Validate `header` and load its bitmap.
    ///
    /// `sections_end` is the first byte after the type sections, i.e. the
    /// start of the header.
    pub(crate) fn load(
        header: &TypeHeader,
        scanner: &FileScanner,
        sections_end: u64,
        type_config: &TypeConfig,
    ) -> Result<Self> {
        let path = scanner.path();
        let corrupt = |reason: String| {
            IndexError::corrupt(path, format!("type {}: {}", header.type_id, reason))
        };

        if type_config.get(header.type_id).is_none() {
            return Err(corrupt("type id not in type configuration".into()));
        }

        let opt_level = match header.opt_level {
            BASE_SECTION => None,
            opt => Some(
                Level::new(opt)
                    .map_err(|_| corrupt(format!("invalid optimization level {}", opt)))?,
            ),
        };

        let level = Level::new(header.level)
            .map_err(|_| corrupt(format!("invalid level {}", header.level)))?;

        let cells = CellRange::new(
            header.cell_x_start,
            header.cell_x_end,
            header.cell_y_start,
            header.cell_y_end,
        )
        .ok_or_else(|| corrupt("cell range start after end".into()))?;

        if cells.x_end > level.max_cell() || cells.y_end > level.max_cell() {
            return Err(corrupt(format!(
                "cell range exceeds grid of level {}",
                level
            )));
        }

        if !(1..=MAX_DATA_OFFSET_BYTES).contains(&header.data_offset_bytes) {
            return Err(corrupt(format!(
                "invalid data offset width {}",
                header.data_offset_bytes
            )));
        }

        let bitmap_len = bitmap::byte_len(cells.len()) as u64;
        let bitmap_end = header
            .bitmap_offset
            .checked_add(bitmap_len)
            .filter(|end| header.bitmap_offset >= 8 && *end <= sections_end)
            .ok_or_else(|| corrupt("bitmap outside of data sections".into()))?;

        let bytes = scanner
            .read_at(header.bitmap_offset, bitmap_len as usize)?
            .into_owned();
        let bitmap = Bitmap::from_bytes(bytes, cells.len())
            .ok_or_else(|| corrupt("bitmap padding bits set".into()))?;

        let slot_table_len = bitmap.count_ones() * header.data_offset_bytes as u64;
        if bitmap_end + slot_table_len > sections_end {
            return Err(corrupt("slot table outside of data sections".into()));
        }

        let first = level.cell_box(cells.x_start, cells.y_start);
        let last = level.cell_box(cells.x_end, cells.y_end);

        Ok(Self {
            type_id: header.type_id,
            opt_level,
            level,
            cells,
            data_offset_bytes: header.data_offset_bytes,
            bitmap_offset: header.bitmap_offset,
            bitmap,
            bounds: GeoBox::new(first.min(), last.max()),
        })
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Magnification this section is optimized for, `None` for the base section
    pub fn opt_level(&self) -> Option<Level> {
        self.opt_level
    }

    /// Grid level of the stored cells
    pub fn level(&self) -> Level {
        self.level
    }

    /// Stored cell extent
    pub fn cells(&self) -> CellRange {
        self.cells
    }

    pub fn cell_x_count(&self) -> u64 {
        self.cells.x_count()
    }

    pub fn cell_y_count(&self) -> u64 {
        self.cells.y_count()
    }

    pub fn data_offset_bytes(&self) -> u8 {
        self.data_offset_bytes
    }

    pub fn bitmap_offset(&self) -> FileOffset {
        self.bitmap_offset
    }

    pub fn bitmap(&self) -> &Bitmap {
        &self.bitmap
    }

    /// Geographic extent of the stored cells
    pub fn bounds(&self) -> GeoBox {
        self.bounds
    }

    /// Number of cells holding at least one object
    pub fn filled_cells(&self) -> u64 {
        self.bitmap.count_ones()
    }

    pub(crate) fn slot_table_offset(&self) -> FileOffset {
        self.bitmap_offset + bitmap::byte_len(self.cells.len()) as u64
    }

    pub(crate) fn slot_offset(&self, slot: u64) -> FileOffset {
        self.slot_table_offset() + slot * self.data_offset_bytes as u64
    }

    pub(crate) fn cell_data_offset(&self) -> FileOffset {
        self.slot_offset(self.bitmap.count_ones())
    }
}

/// Read all header entries starting at `header_offset`.
pub(crate) fn read_headers(scanner: &FileScanner, header_offset: u64) -> Result<Vec<TypeHeader>> {
    let path: &Path = scanner.path();
    let mut cursor = scanner.cursor(header_offset);
    let count = cursor.read_u32()? as u64;

    let expected_end = header_offset + 4 + count * TYPE_HEADER_LEN;
    if expected_end != scanner.len() {
        return Err(IndexError::corrupt(
            path,
            format!(
                "header with {} entries should end at {}, file has {} bytes",
                count,
                expected_end,
                scanner.len()
            ),
        ));
    }

    (0..count).map(|_| TypeHeader::read(&mut cursor)).collect()
}
