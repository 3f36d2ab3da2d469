//! Writer for area index files.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use geo::BoundingRect;
use geo_types::Rect;
use tracing::{debug, info};

use super::type_data::{TypeHeader, BASE_SECTION, MAX_DATA_OFFSET_BYTES};
use crate::error::{IndexError, Result};
use crate::grid::bitmap;
use crate::grid::{CellRange, Level};
use crate::models::{FileOffset, GeoBox, TypeConfig, TypeId};
use crate::varint;

/// Upper bound of cells a single object may cover.
pub const MAX_CELLS_PER_OBJECT: u64 = 1 << 20;

/// Objects of one type, keyed by `(y, x)` so iteration is row-major.
struct TypeCells {
    level: Level,
    cells: BTreeMap<(u32, u32), Vec<FileOffset>>,
}

impl TypeCells {
    fn extent(&self) -> Option<CellRange> {
        self.cells
            .keys()
            .map(|&(y, x)| CellRange::single(x, y))
            .reduce(|a, b| a.union(&b))
    }
}

/// Summary of a written index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AreaIndexStats {
    pub sections: usize,
    pub filled_cells: u64,
    pub cell_entries: u64,
    pub file_size: u64,
}

/// Collects object bounding boxes per type and writes an area index.
pub struct AreaIndexBuilder {
    type_config: Arc<TypeConfig>,
    types: BTreeMap<(TypeId, Option<Level>), TypeCells>,
}

impl AreaIndexBuilder {
    pub fn new(type_config: Arc<TypeConfig>) -> Self {
        Self {
            type_config,
            types: BTreeMap::new(),
        }
    }

    /// Cells of one section. Optimized sections never use a grid finer
    /// than the magnification they serve.
    fn type_cells(&mut self, type_id: TypeId, opt_level: Option<Level>) -> Result<&mut TypeCells> {
        let info = self
            .type_config
            .get(type_id)
            .ok_or(IndexError::UnknownType(type_id))?;
        let mut level = Level::new(info.level())?;
        if let Some(opt_level) = opt_level {
            level = level.min(opt_level);
        }

        Ok(self
            .types
            .entry((type_id, opt_level))
            .or_insert_with(|| TypeCells {
                level,
                cells: BTreeMap::new(),
            }))
    }

    /// Register the object at `offset` in every cell its box overlaps.
    pub fn add(&mut self, type_id: TypeId, offset: FileOffset, bbox: GeoBox) -> Result<()> {
        self.add_to_section(type_id, None, offset, bbox)
    }

    /// Register an object in the section of `type_id` served at `magnification`.
    ///
    /// `offset` usually points to a simplified copy of the object.
    pub fn add_optimized(
        &mut self,
        type_id: TypeId,
        magnification: Level,
        offset: FileOffset,
        bbox: GeoBox,
    ) -> Result<()> {
        self.add_to_section(type_id, Some(magnification), offset, bbox)
    }

    fn add_to_section(
        &mut self,
        type_id: TypeId,
        opt_level: Option<Level>,
        offset: FileOffset,
        bbox: GeoBox,
    ) -> Result<()> {
        let entry = self.type_cells(type_id, opt_level)?;
        let range = entry
            .level
            .cells_for_box(&bbox)
            .ok_or_else(|| IndexError::Build(format!("invalid bounding box for {}", offset)))?;

        if range.len() > MAX_CELLS_PER_OBJECT {
            return Err(IndexError::Build(format!(
                "object {} covers {} cells at level {}",
                offset,
                range.len(),
                entry.level
            )));
        }

        for (x, y) in range.iter() {
            entry.cells.entry((y, x)).or_default().push(offset);
        }
        Ok(())
    }

    /// Register a geometry by its bounding rectangle.
    pub fn add_geometry<G>(&mut self, type_id: TypeId, offset: FileOffset, geometry: &G) -> Result<()>
    where
        G: BoundingRect<f64>,
    {
        let rect: Option<Rect<f64>> = geometry.bounding_rect().into();
        let rect =
            rect.ok_or_else(|| IndexError::Build(format!("object {} has no extent", offset)))?;
        self.add(type_id, offset, rect.into())
    }

    /// Number of objects-in-cells collected so far
    pub fn entry_count(&self) -> usize {
        self.types
            .values()
            .flat_map(|t| t.cells.values())
            .map(Vec::len)
            .sum()
    }

    /// Write the index to `path`.
    ///
    /// Every non-internal type of the configuration gets a base section, so
    /// types without objects are still reported as served by the index.
    /// Optimized sections follow the base section of their type. Objects
    /// added for internal types are not written.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<AreaIndexStats> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        let mut stats = AreaIndexStats::default();

        // patched once the header position is known
        writer.write_all(&0u64.to_le_bytes())?;
        let mut pos: u64 = 8;

        // internal types get no section
        let type_ids: Vec<TypeId> = self.type_config.indexable_types().iter().collect();

        // base section first, then the optimized ones of the same type
        let mut keys = Vec::with_capacity(self.types.len() + type_ids.len());
        for type_id in type_ids {
            keys.push((type_id, None));
            keys.extend(
                self.types
                    .keys()
                    .filter(|(id, opt)| *id == type_id && opt.is_some())
                    .copied(),
            );
        }

        let mut headers = Vec::with_capacity(keys.len());
        for (type_id, opt_level) in keys {
            let section = match self.types.get(&(type_id, opt_level)) {
                Some(cells) => encode_section(type_id, opt_level, cells)?,
                None => {
                    let level = Level::new(
                        self.type_config
                            .get(type_id)
                            .map(|t| t.level())
                            .unwrap_or_default(),
                    )?;
                    empty_section(type_id, opt_level, level)
                }
            };

            debug!(
                "Type {} (optimization {}): level {}, {}x{} cells, {} filled, {} bytes",
                section.header.type_id,
                section.header.opt_level,
                section.header.level,
                section.extent.x_count(),
                section.extent.y_count(),
                section.filled_cells,
                section.bytes.len()
            );

            let mut header = section.header;
            header.bitmap_offset = pos;
            writer.write_all(&section.bytes)?;
            pos += section.bytes.len() as u64;

            stats.filled_cells += section.filled_cells;
            stats.cell_entries += section.cell_entries;
            headers.push(header);
        }

        let header_offset = pos;
        writer.write_all(&(headers.len() as u32).to_le_bytes())?;
        for header in &headers {
            header.write(&mut writer)?;
        }
        stats.sections = headers.len();

        writer.seek(SeekFrom::Start(0))?;
        writer.write_all(&header_offset.to_le_bytes())?;
        writer.flush()?;

        stats.file_size = writer.get_ref().metadata()?.len();

        info!(
            "Wrote area index {} ({} sections, {} filled cells, {} entries, {} bytes)",
            path.display(),
            stats.sections,
            stats.filled_cells,
            stats.cell_entries,
            stats.file_size
        );

        Ok(stats)
    }
}

/// Encoded type section; `header.bitmap_offset` is filled in by the caller.
struct Section {
    header: TypeHeader,
    extent: CellRange,
    bytes: Vec<u8>,
    filled_cells: u64,
    cell_entries: u64,
}

/// Stored form of a section's optimization level
fn opt_level_value(opt_level: Option<Level>) -> u32 {
    opt_level.map_or(BASE_SECTION, Level::get)
}

fn empty_section(type_id: TypeId, opt_level: Option<Level>, level: Level) -> Section {
    let extent = CellRange::single(0, 0);
    Section {
        header: TypeHeader {
            type_id,
            opt_level: opt_level_value(opt_level),
            level: level.get(),
            cell_x_start: 0,
            cell_x_end: 0,
            cell_y_start: 0,
            cell_y_end: 0,
            data_offset_bytes: 1,
            bitmap_offset: 0,
        },
        extent,
        bytes: vec![0u8; bitmap::byte_len(extent.len())],
        filled_cells: 0,
        cell_entries: 0,
    }
}

fn encode_section(
    type_id: TypeId,
    opt_level: Option<Level>,
    type_cells: &TypeCells,
) -> Result<Section> {
    let Some(extent) = type_cells.extent() else {
        return Ok(empty_section(type_id, opt_level, type_cells.level));
    };

    let mut bits = vec![0u8; bitmap::byte_len(extent.len())];
    let mut slots = Vec::with_capacity(type_cells.cells.len());
    let mut data = Vec::new();
    let mut cell_entries = 0u64;

    for (&(y, x), offsets) in &type_cells.cells {
        bitmap::set_bit(&mut bits, extent.linear_index(x, y));
        slots.push(data.len() as u64);

        let mut offsets = offsets.clone();
        offsets.sort_unstable();
        offsets.dedup();
        cell_entries += offsets.len() as u64;

        varint::encode(offsets.len() as u64, &mut data);
        let mut previous = 0;
        for offset in offsets {
            varint::encode(offset - previous, &mut data);
            previous = offset;
        }
    }

    let max_slot = slots.last().copied().unwrap_or(0);
    let data_offset_bytes = bytes_needed(max_slot);
    if data_offset_bytes > MAX_DATA_OFFSET_BYTES {
        return Err(IndexError::Build(format!(
            "type {} cell data too large ({} bytes)",
            type_id,
            data.len()
        )));
    }

    let mut bytes =
        Vec::with_capacity(bits.len() + slots.len() * data_offset_bytes as usize + data.len());
    bytes.extend_from_slice(&bits);
    for slot in &slots {
        bytes.extend_from_slice(&slot.to_le_bytes()[..data_offset_bytes as usize]);
    }
    bytes.extend_from_slice(&data);

    Ok(Section {
        header: TypeHeader {
            type_id,
            opt_level: opt_level_value(opt_level),
            level: type_cells.level.get(),
            cell_x_start: extent.x_start,
            cell_x_end: extent.x_end,
            cell_y_start: extent.y_start,
            cell_y_end: extent.y_end,
            data_offset_bytes,
            bitmap_offset: 0,
        },
        extent,
        bytes,
        filled_cells: slots.len() as u64,
        cell_entries,
    })
}

/// Smallest little-endian width holding `value`, at least one byte.
fn bytes_needed(value: u64) -> u8 {
    let bits = 64 - value.leading_zeros();
    (bits.div_ceil(8).max(1)) as u8
}
