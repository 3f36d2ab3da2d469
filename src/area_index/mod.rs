//! Area index: per-type cell grids mapping bounding boxes to object offsets.
//!
//! The index file holds, for every indexed object type, a bitmap of the
//! cells that contain objects, a slot table pointing into the cell data, and
//! the cell data itself (delta encoded offset lists). All grid metadata is
//! loaded at open; queries only read slot entries and cell lists.
//!
//! Besides its base section a type may have sections built for a single
//! magnification, typically holding simplified objects for low zoom levels.
//! Those are only consulted by [`AreaIndex::get_offsets_at`].
//!
//! Queries take `&self` and use positioned reads, so one [`AreaIndex`] can be
//! shared between threads without locking.

mod builder;
mod type_data;

pub use builder::{AreaIndexBuilder, AreaIndexStats, MAX_CELLS_PER_OBJECT};
pub use type_data::TypeData;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hashbrown::HashSet;
use tracing::{debug, info, warn};

use crate::error::{IndexError, Result};
use crate::grid::Level;
use crate::models::{FileOffset, GeoBox, TypeConfig, TypeId, TypeInfoSet};
use crate::scanner::{FileScanner, ScanCursor};
use type_data::read_headers;

/// File name of the area index inside a database directory.
pub const AREA_INDEX_FILE: &str = "area.idx";

/// Queries slower than this are logged as warnings.
const SLOW_QUERY: Duration = Duration::from_millis(100);

/// Result of an area query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AreaOffsets {
    /// Distinct object offsets, ascending
    pub offsets: Vec<FileOffset>,
    /// Requested types this index answered for
    pub loaded_types: TypeInfoSet,
}

/// Sections are keyed by type and optimization level, base section first.
type SectionKey = (TypeId, Option<Level>);

/// An opened area index file.
pub struct AreaIndex {
    scanner: FileScanner,
    header_offset: u64,
    sections: BTreeMap<SectionKey, TypeData>,
    max_opt_level: Option<Level>,
    type_config: Arc<TypeConfig>,
}

impl AreaIndex {
    /// Open `dir/area.idx`.
    pub fn open<P: AsRef<Path>>(
        type_config: Arc<TypeConfig>,
        dir: P,
        memory_mapped: bool,
    ) -> Result<Self> {
        Self::open_file(type_config, dir.as_ref().join(AREA_INDEX_FILE), memory_mapped)
    }

    /// Open an area index file and load all type metadata.
    pub fn open_file<P: AsRef<Path>>(
        type_config: Arc<TypeConfig>,
        path: P,
        memory_mapped: bool,
    ) -> Result<Self> {
        let path = path.as_ref();
        let scanner = FileScanner::open(path, memory_mapped)?;

        let header_offset = scanner
            .cursor(0)
            .read_u64()
            .map_err(|_| IndexError::corrupt(path, "file too short for header offset"))?;

        let header_fits = header_offset
            .checked_add(4)
            .is_some_and(|end| end <= scanner.len());
        if header_offset < 8 || !header_fits {
            return Err(IndexError::corrupt(
                path,
                format!(
                    "header offset {} outside of file ({} bytes)",
                    header_offset,
                    scanner.len()
                ),
            ));
        }

        let headers = read_headers(&scanner, header_offset).map_err(|e| match e {
            IndexError::UnexpectedEof { .. } => IndexError::corrupt(path, e.to_string()),
            e => e,
        })?;

        let mut sections = BTreeMap::new();
        for header in &headers {
            let data = TypeData::load(header, &scanner, header_offset, &type_config)?;
            debug!(
                "Type {} (optimized for {:?}): level {}, {}x{} cells, {} filled",
                data.type_id(),
                data.opt_level(),
                data.level(),
                data.cell_x_count(),
                data.cell_y_count(),
                data.filled_cells()
            );
            let key = (data.type_id(), data.opt_level());
            if sections.insert(key, data).is_some() {
                return Err(IndexError::corrupt(
                    path,
                    format!(
                        "duplicate entry for type {} optimization level {:?}",
                        key.0, key.1
                    ),
                ));
            }
        }

        let max_opt_level = sections.keys().filter_map(|&(_, opt)| opt).max();

        info!(
            "Opened area index {} ({} sections, optimized up to {:?}, memory mapped: {})",
            path.display(),
            sections.len(),
            max_opt_level,
            scanner.is_memory_mapped()
        );

        Ok(Self {
            scanner,
            header_offset,
            sections,
            max_opt_level,
            type_config,
        })
    }

    pub fn path(&self) -> &Path {
        self.scanner.path()
    }

    pub fn is_open(&self) -> bool {
        self.scanner.is_open()
    }

    /// Release the file. Safe to call more than once.
    pub fn close(&mut self) {
        if self.scanner.is_open() {
            self.scanner.close();
            info!("Closed area index {}", self.path().display());
        }
    }

    pub fn type_config(&self) -> &TypeConfig {
        &self.type_config
    }

    /// Base section metadata of one indexed type
    pub fn type_data(&self, type_id: TypeId) -> Option<&TypeData> {
        self.sections.get(&(type_id, None))
    }

    /// Section of `type_id` built for exactly `magnification`
    pub fn optimized_type_data(&self, type_id: TypeId, magnification: Level) -> Option<&TypeData> {
        self.sections.get(&(type_id, Some(magnification)))
    }

    /// All types with a section in the file
    pub fn indexed_types(&self) -> TypeInfoSet {
        self.sections.keys().map(|&(type_id, _)| type_id).collect()
    }

    /// Whether optimized sections may exist for `magnification`.
    ///
    /// True up to the highest optimization level in the file. Types without
    /// a section for that exact magnification are still not served.
    pub fn has_optimizations(&self, magnification: Level) -> bool {
        self.max_opt_level.is_some_and(|max| magnification <= max)
    }

    /// Requested types the base sections can answer for.
    pub fn available_types(&self, types: &TypeInfoSet) -> TypeInfoSet {
        types.iter().filter(|&id| self.serves((id, None))).collect()
    }

    /// Requested types with a section optimized for `magnification`.
    pub fn available_types_at(&self, types: &TypeInfoSet, magnification: Level) -> TypeInfoSet {
        types
            .iter()
            .filter(|&id| self.serves((id, Some(magnification))))
            .collect()
    }

    fn serves(&self, key: SectionKey) -> bool {
        let internal = self
            .type_config
            .get(key.0)
            .map_or(true, |info| info.internal);
        !internal && self.sections.contains_key(&key)
    }

    /// Offsets of all objects of `types` stored in cells overlapping `bbox`.
    ///
    /// The result is exact at cell granularity: an object is returned if any
    /// cell it was registered in overlaps any cell the box touches.
    pub fn get_offsets(&self, bbox: &GeoBox, types: &TypeInfoSet) -> Result<AreaOffsets> {
        self.query(bbox, types, None)
    }

    /// Like [`get_offsets`](Self::get_offsets), but only reads sections
    /// optimized for exactly `magnification`.
    ///
    /// Types without such a section are left out of `loaded_types`, so the
    /// caller can fetch them from the base sections instead.
    pub fn get_offsets_at(
        &self,
        bbox: &GeoBox,
        types: &TypeInfoSet,
        magnification: Level,
    ) -> Result<AreaOffsets> {
        self.query(bbox, types, Some(magnification))
    }

    fn query(
        &self,
        bbox: &GeoBox,
        types: &TypeInfoSet,
        opt_level: Option<Level>,
    ) -> Result<AreaOffsets> {
        if !self.scanner.is_open() {
            return Err(IndexError::Closed);
        }

        let start = Instant::now();
        let mut loaded_types = TypeInfoSet::new();
        let mut offsets = HashSet::new();

        for type_id in types.iter() {
            let key = (type_id, opt_level);
            if !self.serves(key) {
                continue;
            }
            loaded_types.set(type_id);

            if let Some(data) = self.sections.get(&key) {
                self.collect_type(data, bbox, &mut offsets)?;
            }
        }

        let mut offsets: Vec<FileOffset> = offsets.into_iter().collect();
        offsets.sort_unstable();

        let elapsed = start.elapsed();
        if elapsed > SLOW_QUERY {
            warn!(
                "Slow area query {} for types {:?}: {:?}, {} offsets",
                bbox,
                loaded_types.names(&self.type_config),
                elapsed,
                offsets.len()
            );
        } else {
            debug!(
                "Area query {}: {} offsets from {} types in {:?}",
                bbox,
                offsets.len(),
                loaded_types.len(),
                elapsed
            );
        }

        Ok(AreaOffsets {
            offsets,
            loaded_types,
        })
    }

    fn collect_type(
        &self,
        data: &TypeData,
        bbox: &GeoBox,
        offsets: &mut HashSet<FileOffset>,
    ) -> Result<()> {
        if !data.bounds().intersects(bbox) {
            return Ok(());
        }

        let Some(range) = data
            .level()
            .cells_for_box(bbox)
            .and_then(|r| r.intersect(&data.cells()))
        else {
            return Ok(());
        };

        let cells = data.cells();
        let bitmap = data.bitmap();
        let data_start = data.cell_data_offset();
        let mut cursor = self.scanner.cursor(data.slot_table_offset());

        for y in range.y_start..=range.y_end {
            let first = cells.linear_index(range.x_start, y);
            let last = cells.linear_index(range.x_end, y) + 1;

            let slot = bitmap.rank(first);
            let filled = bitmap.rank(last) - slot;
            if filled == 0 {
                continue;
            }

            // the set cells of one row are stored back to back
            cursor.set_pos(data.slot_offset(slot));
            let relative = cursor.read_sized(data.data_offset_bytes())?;
            let list_start = data_start
                .checked_add(relative)
                .filter(|&pos| pos < self.header_offset)
                .ok_or_else(|| {
                    self.corrupt(format!(
                        "type {}: cell list offset {} past data section",
                        data.type_id(),
                        relative
                    ))
                })?;

            cursor.set_pos(list_start);
            for _ in 0..filled {
                self.read_cell(&mut cursor, offsets)?;
            }
        }

        Ok(())
    }

    fn read_cell(&self, cursor: &mut ScanCursor<'_>, offsets: &mut HashSet<FileOffset>) -> Result<()> {
        let count = cursor.read_number()?;

        // every entry takes at least one byte
        let remaining = self.header_offset.saturating_sub(cursor.position());
        if count > remaining {
            return Err(self.corrupt(format!(
                "cell list of {} entries at {} overruns data section",
                count,
                cursor.position()
            )));
        }

        offsets.reserve(count as usize);
        let mut previous: FileOffset = 0;
        for _ in 0..count {
            let delta = cursor.read_number()?;
            previous = previous
                .checked_add(delta)
                .ok_or_else(|| self.corrupt("cell list offset overflow"))?;
            offsets.insert(previous);
        }

        if cursor.position() > self.header_offset {
            return Err(self.corrupt("cell list overruns data section"));
        }
        Ok(())
    }

    fn corrupt(&self, reason: impl Into<String>) -> IndexError {
        IndexError::corrupt(PathBuf::from(self.path()), reason)
    }
}

impl std::fmt::Debug for AreaIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AreaIndex")
            .field("path", &self.path())
            .field("open", &self.is_open())
            .field("sections", &self.sections.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::CellRange;
    use crate::models::{GeoCoord, TypeInfo};
    use super::type_data::TYPE_HEADER_LEN;
    use rayon::prelude::*;
    use std::fs;
    use tempfile::TempDir;

    const BUILDING: TypeId = 1;
    const WATER: TypeId = 2;
    const BOUNDARY: TypeId = 3;
    const FOREST: TypeId = 4;

    fn config() -> Arc<TypeConfig> {
        Arc::new(
            TypeConfig::new(vec![
                TypeInfo::new(BUILDING, "building").with_level(2),
                TypeInfo::new(WATER, "water").with_level(2),
                TypeInfo::new(BOUNDARY, "boundary").with_level(2).internal(),
            ])
            .unwrap(),
        )
    }

    fn sw_box() -> GeoBox {
        // cell (0, 0) at level 2
        GeoBox::from_lon_lat(-170.0, -80.0, -100.0, -50.0)
    }

    fn ne_box() -> GeoBox {
        // cell (3, 3) at level 2
        GeoBox::from_lon_lat(100.0, 50.0, 170.0, 80.0)
    }

    fn build(config: Arc<TypeConfig>, fill: impl FnOnce(&mut AreaIndexBuilder)) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = AreaIndexBuilder::new(config);
        fill(&mut builder);
        builder.write(dir.path().join(AREA_INDEX_FILE)).unwrap();
        dir
    }

    fn sample_index() -> TempDir {
        build(config(), |b| {
            b.add(BUILDING, 100, sw_box()).unwrap();
            b.add(BUILDING, 200, ne_box()).unwrap();
            b.add(WATER, 100, sw_box()).unwrap();
            b.add(WATER, 300, GeoBox::world()).unwrap();
            b.add(BOUNDARY, 400, GeoBox::world()).unwrap();
        })
    }

    fn set(ids: &[TypeId]) -> TypeInfoSet {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_open_loads_type_data() {
        let dir = sample_index();
        let index = AreaIndex::open(config(), dir.path(), false).unwrap();
        assert!(index.is_open());
        assert_eq!(index.path(), dir.path().join(AREA_INDEX_FILE));

        // internal types are not written
        assert_eq!(index.indexed_types(), set(&[BUILDING, WATER]));

        let building = index.type_data(BUILDING).unwrap();
        assert_eq!(building.level(), Level::new(2).unwrap());
        assert_eq!(building.cells(), CellRange::new(0, 3, 0, 3).unwrap());
        assert_eq!(building.filled_cells(), 2);
        assert_eq!(building.bounds(), GeoBox::world());
        assert_eq!(building.opt_level(), None);

        assert!(!index.has_optimizations(Level::new(0).unwrap()));
    }

    #[test]
    fn test_query_selects_cells() {
        let dir = sample_index();
        let index = AreaIndex::open(config(), dir.path(), false).unwrap();

        // cells (0, 0) - (1, 1)
        let south_west = GeoBox::from_lon_lat(-170.0, -80.0, -1.0, -1.0);
        let result = index.get_offsets(&south_west, &set(&[BUILDING])).unwrap();
        assert_eq!(result.offsets, vec![100]);
        assert_eq!(result.loaded_types, set(&[BUILDING]));

        let result = index.get_offsets(&GeoBox::world(), &set(&[BUILDING])).unwrap();
        assert_eq!(result.offsets, vec![100, 200]);
    }

    #[test]
    fn test_query_deduplicates_across_types_and_cells() {
        let dir = sample_index();
        let index = AreaIndex::open(config(), dir.path(), false).unwrap();

        let result = index
            .get_offsets(&GeoBox::world(), &set(&[BUILDING, WATER]))
            .unwrap();
        assert_eq!(result.offsets, vec![100, 200, 300]);
        assert_eq!(result.loaded_types, set(&[BUILDING, WATER]));
    }

    #[test]
    fn test_point_box_selects_single_cell() {
        let dir = sample_index();
        let index = AreaIndex::open(config(), dir.path(), false).unwrap();

        let point = GeoCoord::new(60.0, 120.0);
        let bbox = GeoBox::from_corners(point, point);
        let result = index.get_offsets(&bbox, &set(&[BUILDING])).unwrap();
        assert_eq!(result.offsets, vec![200]);
    }

    #[test]
    fn test_invalid_box_reports_loaded_types() {
        let dir = sample_index();
        let index = AreaIndex::open(config(), dir.path(), false).unwrap();

        let result = index
            .get_offsets(&GeoBox::empty(), &set(&[BUILDING, WATER]))
            .unwrap();
        assert!(result.offsets.is_empty());
        assert_eq!(result.loaded_types, set(&[BUILDING, WATER]));
    }

    #[test]
    fn test_missing_and_internal_types_not_loaded() {
        let dir = sample_index();

        // FOREST is known to the reader but has no section in the file
        let mut types = config().types().to_vec();
        types.push(TypeInfo::new(FOREST, "forest"));
        let reader_config = Arc::new(TypeConfig::new(types).unwrap());
        let index = AreaIndex::open(reader_config, dir.path(), false).unwrap();

        let result = index
            .get_offsets(&GeoBox::world(), &set(&[BUILDING, BOUNDARY, FOREST, 99]))
            .unwrap();
        assert_eq!(result.loaded_types, set(&[BUILDING]));
        assert_eq!(result.offsets, vec![100, 200]);

        assert_eq!(
            index.available_types(&set(&[WATER, BOUNDARY, FOREST])),
            set(&[WATER])
        );
    }

    #[test]
    fn test_empty_request() {
        let dir = sample_index();
        let index = AreaIndex::open(config(), dir.path(), true).unwrap();
        let result = index.get_offsets(&GeoBox::world(), &TypeInfoSet::new()).unwrap();
        assert_eq!(result, AreaOffsets::default());
    }

    #[test]
    fn test_type_without_objects() {
        let dir = build(config(), |b| {
            b.add(BUILDING, 5, sw_box()).unwrap();
        });
        let index = AreaIndex::open(config(), dir.path(), false).unwrap();

        let result = index
            .get_offsets(&GeoBox::world(), &set(&[WATER]))
            .unwrap();
        assert!(result.offsets.is_empty());
        assert_eq!(result.loaded_types, set(&[WATER]));
    }

    #[test]
    fn test_close() {
        let dir = sample_index();
        let mut index = AreaIndex::open(config(), dir.path(), true).unwrap();
        index.close();
        index.close();
        assert!(!index.is_open());
        assert!(matches!(
            index.get_offsets(&GeoBox::world(), &set(&[BUILDING])),
            Err(IndexError::Closed)
        ));
    }

    #[test]
    fn test_mapped_and_file_agree() {
        let dir = sample_index();
        let mapped = AreaIndex::open(config(), dir.path(), true).unwrap();
        let plain = AreaIndex::open(config(), dir.path(), false).unwrap();

        for bbox in [sw_box(), ne_box(), GeoBox::world()] {
            let types = set(&[BUILDING, WATER]);
            assert_eq!(
                mapped.get_offsets(&bbox, &types).unwrap(),
                plain.get_offsets(&bbox, &types).unwrap()
            );
        }
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            AreaIndex::open(config(), dir.path(), false),
            Err(IndexError::Io(_))
        ));
    }

    fn single_cell_index() -> (TempDir, PathBuf) {
        let config = Arc::new(
            TypeConfig::new(vec![TypeInfo::new(BUILDING, "building").with_level(2)]).unwrap(),
        );
        let dir = build(config, |b| b.add(BUILDING, 100, sw_box()).unwrap());
        let path = dir.path().join(AREA_INDEX_FILE);
        // offset, bitmap, slot, count + offset, then one header entry
        assert_eq!(fs::metadata(&path).unwrap().len(), 8 + 1 + 1 + 2 + 4 + 35);
        (dir, path)
    }

    fn single_cell_config() -> Arc<TypeConfig> {
        Arc::new(TypeConfig::new(vec![TypeInfo::new(BUILDING, "building").with_level(2)]).unwrap())
    }

    fn patch(path: &Path, pos: usize, value: u8) {
        let mut bytes = fs::read(path).unwrap();
        bytes[pos] = value;
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_truncated_file_rejected() {
        let (_dir, path) = single_cell_index();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 1]).unwrap();

        let err = AreaIndex::open_file(single_cell_config(), &path, false).unwrap_err();
        assert!(err.is_corruption(), "{}", err);

        fs::write(&path, &bytes[..5]).unwrap();
        let err = AreaIndex::open_file(single_cell_config(), &path, false).unwrap_err();
        assert!(matches!(err, IndexError::Corrupt { .. }));
    }

    #[test]
    fn test_bad_header_offset_rejected() {
        let (_dir, path) = single_cell_index();
        patch(&path, 0, 0xF0);
        let err = AreaIndex::open_file(single_cell_config(), &path, false).unwrap_err();
        assert!(matches!(err, IndexError::Corrupt { .. }));
    }

    #[test]
    fn test_bad_data_offset_width_rejected() {
        let (_dir, path) = single_cell_index();
        // header at 12, entry at 16, width after id, levels and cell bounds
        patch(&path, 16 + 2 + 24, 7);
        let err = AreaIndex::open_file(single_cell_config(), &path, true).unwrap_err();
        assert!(matches!(err, IndexError::Corrupt { .. }));
    }

    #[test]
    fn test_bad_level_rejected() {
        let (_dir, path) = single_cell_index();
        patch(&path, 16 + 2 + 4, 40);
        let err = AreaIndex::open_file(single_cell_config(), &path, false).unwrap_err();
        assert!(matches!(err, IndexError::Corrupt { .. }));
    }

    #[test]
    fn test_bad_optimization_level_rejected() {
        let (_dir, path) = single_cell_index();
        // base marker 0xFFFFFFFF becomes 0xFFFFFF28
        patch(&path, 16 + 2, 40);
        let err = AreaIndex::open_file(single_cell_config(), &path, false).unwrap_err();
        assert!(matches!(err, IndexError::Corrupt { .. }));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let (_dir, path) = single_cell_index();
        let other = Arc::new(TypeConfig::new(vec![TypeInfo::new(9, "other")]).unwrap());
        let err = AreaIndex::open_file(other, &path, false).unwrap_err();
        assert!(matches!(err, IndexError::Corrupt { .. }));
    }

    #[test]
    fn test_corrupt_cell_list_fails_query() {
        let (_dir, path) = single_cell_index();
        // cell data starts after offset, bitmap and slot
        patch(&path, 10, 0x7F);
        let index = AreaIndex::open_file(single_cell_config(), &path, false).unwrap();

        let err = index
            .get_offsets(&GeoBox::world(), &set(&[BUILDING]))
            .unwrap_err();
        assert!(err.is_corruption());

        // boxes not touching the cell never read it
        let result = index.get_offsets(&ne_box(), &set(&[BUILDING])).unwrap();
        assert!(result.offsets.is_empty());
    }

    #[test]
    fn test_corrupt_slot_fails_query() {
        let (_dir, path) = single_cell_index();
        patch(&path, 9, 0xFF);
        let index = AreaIndex::open_file(single_cell_config(), &path, true).unwrap();
        assert!(matches!(
            index.get_offsets(&sw_box(), &set(&[BUILDING])),
            Err(IndexError::Corrupt { .. })
        ));
    }

    fn level(value: u32) -> Level {
        Level::new(value).unwrap()
    }

    fn optimized_config() -> Arc<TypeConfig> {
        Arc::new(
            TypeConfig::new(vec![
                TypeInfo::new(BUILDING, "building").with_level(6),
                TypeInfo::new(WATER, "water").with_level(6),
            ])
            .unwrap(),
        )
    }

    fn optimized_index() -> TempDir {
        build(optimized_config(), |b| {
            b.add(BUILDING, 100, sw_box()).unwrap();
            b.add_optimized(BUILDING, level(2), 1100, sw_box()).unwrap();
            b.add_optimized(BUILDING, level(4), 2100, sw_box()).unwrap();
            b.add(WATER, 300, GeoBox::world()).unwrap();
        })
    }

    #[test]
    fn test_optimized_sections_per_magnification() {
        let dir = optimized_index();
        let index = AreaIndex::open(optimized_config(), dir.path(), false).unwrap();
        let types = set(&[BUILDING, WATER]);

        assert_eq!(index.indexed_types(), types);

        let base = index.get_offsets(&GeoBox::world(), &types).unwrap();
        assert_eq!(base.offsets, vec![100, 300]);
        assert_eq!(base.loaded_types, types);

        let low = index
            .get_offsets_at(&GeoBox::world(), &types, level(2))
            .unwrap();
        assert_eq!(low.offsets, vec![1100]);
        assert_eq!(low.loaded_types, set(&[BUILDING]));

        let mid = index.get_offsets_at(&sw_box(), &types, level(4)).unwrap();
        assert_eq!(mid.offsets, vec![2100]);

        // no section built for exactly this magnification
        let between = index
            .get_offsets_at(&GeoBox::world(), &types, level(3))
            .unwrap();
        assert_eq!(between, AreaOffsets::default());

        let none = index.get_offsets_at(&ne_box(), &types, level(2)).unwrap();
        assert!(none.offsets.is_empty());
        assert_eq!(none.loaded_types, set(&[BUILDING]));
    }

    #[test]
    fn test_optimization_metadata() {
        let dir = optimized_index();
        let index = AreaIndex::open(optimized_config(), dir.path(), true).unwrap();

        assert!(index.has_optimizations(level(0)));
        assert!(index.has_optimizations(level(4)));
        assert!(!index.has_optimizations(level(5)));

        assert_eq!(
            index.available_types_at(&set(&[BUILDING, WATER]), level(2)),
            set(&[BUILDING])
        );
        assert!(index
            .available_types_at(&set(&[BUILDING, WATER]), level(3))
            .is_empty());

        assert_eq!(index.type_data(BUILDING).unwrap().level(), level(6));

        let low = index.optimized_type_data(BUILDING, level(2)).unwrap();
        assert_eq!(low.opt_level(), Some(level(2)));
        // grid capped at the magnification it serves
        assert_eq!(low.level(), level(2));
        assert_eq!(low.cells(), CellRange::single(0, 0));

        let mid = index.optimized_type_data(BUILDING, level(4)).unwrap();
        assert_eq!(mid.level(), level(4));
        assert!(index.optimized_type_data(WATER, level(2)).is_none());
    }

    #[test]
    fn test_duplicate_section_rejected() {
        let config = Arc::new(
            TypeConfig::new(vec![TypeInfo::new(BUILDING, "building").with_level(6)]).unwrap(),
        );
        let dir = build(config.clone(), |b| {
            b.add_optimized(BUILDING, level(2), 1100, sw_box()).unwrap();
            b.add_optimized(BUILDING, level(4), 2100, sw_box()).unwrap();
        });
        let path = dir.path().join(AREA_INDEX_FILE);
        assert!(AreaIndex::open_file(config.clone(), &path, false).is_ok());

        // sections are base, 2, 4; turn the last one into a second level 2
        let len = fs::metadata(&path).unwrap().len() as usize;
        patch(&path, len - TYPE_HEADER_LEN as usize + 2, 2);
        let err = AreaIndex::open_file(config, &path, false).unwrap_err();
        assert!(matches!(err, IndexError::Corrupt { .. }));
    }

    /// Deterministic xorshift generator
    struct Rng(u64);

    impl Rng {
        fn next(&mut self) -> u64 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            self.0
        }

        fn range(&mut self, lo: f64, hi: f64) -> f64 {
            lo + (self.next() % 1_000_000) as f64 / 1_000_000.0 * (hi - lo)
        }

        fn bbox(&mut self, max_size: f64) -> GeoBox {
            let lon = self.range(-180.0, 180.0 - max_size);
            let lat = self.range(-90.0, 90.0 - max_size / 2.0);
            let w = self.range(0.0, max_size);
            let h = self.range(0.0, max_size / 2.0);
            GeoBox::from_lon_lat(lon, lat, lon + w, lat + h)
        }
    }

    #[test]
    fn test_matches_brute_force() {
        let config = Arc::new(
            TypeConfig::new(vec![
                TypeInfo::new(BUILDING, "building").with_level(4),
                TypeInfo::new(WATER, "water").with_level(6),
            ])
            .unwrap(),
        );

        let mut rng = Rng(0x9E37_79B9_7F4A_7C15);
        let objects: Vec<(TypeId, FileOffset, GeoBox)> = (0..400)
            .map(|i| {
                let type_id = if i % 3 == 0 { WATER } else { BUILDING };
                let offset = rng.next() % (1 << 40);
                (type_id, offset, rng.bbox(30.0))
            })
            .collect();

        let dir = build(config.clone(), |b| {
            for (type_id, offset, bbox) in &objects {
                b.add(*type_id, *offset, *bbox).unwrap();
            }
        });

        let index = AreaIndex::open(config.clone(), dir.path(), false).unwrap();
        let types = set(&[BUILDING, WATER]);

        for _ in 0..50 {
            let query = rng.bbox(60.0);

            let mut expected: Vec<FileOffset> = objects
                .iter()
                .filter(|(type_id, _, bbox)| {
                    let level = Level::new(config.get(*type_id).unwrap().level()).unwrap();
                    let object_cells = level.cells_for_box(bbox).unwrap();
                    let query_cells = level.cells_for_box(&query).unwrap();
                    object_cells.intersect(&query_cells).is_some()
                })
                .map(|(_, offset, _)| *offset)
                .collect();
            expected.sort_unstable();
            expected.dedup();

            let result = index.get_offsets(&query, &types).unwrap();
            assert_eq!(result.offsets, expected, "query {}", query);
        }
    }

    #[test]
    fn test_concurrent_queries() {
        let dir = sample_index();
        let index = AreaIndex::open(config(), dir.path(), false).unwrap();
        let types = set(&[BUILDING, WATER]);
        let boxes = [sw_box(), ne_box(), GeoBox::world()];

        let expected: Vec<AreaOffsets> = boxes
            .iter()
            .map(|b| index.get_offsets(b, &types).unwrap())
            .collect();

        let results: Vec<(usize, AreaOffsets)> = (0..256usize)
            .into_par_iter()
            .map(|i| {
                let which = i % boxes.len();
                (which, index.get_offsets(&boxes[which], &types).unwrap())
            })
            .collect();

        for (which, result) in results {
            assert_eq!(result, expected[which]);
        }
    }
}
