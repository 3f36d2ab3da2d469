//! Index build pipeline.
//!
//! Reads an object list (type, file offset, bounding box) and writes the
//! area index, the coverage index and the type configuration into the
//! output directory.

mod config;
mod objects;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use hashbrown::HashMap;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use scout_index::area_index::{AreaIndexStats, AREA_INDEX_FILE};
use scout_index::coverage_index::{CoverageStats, COVERAGE_INDEX_FILE};
use scout_index::{AreaIndexBuilder, CoverageIndexBuilder, Level as GridLevel};

use crate::config::Config;
use crate::objects::{open_objects, ObjectRecord};

/// Type configuration stored next to the index files
const TYPES_FILE: &str = "types.toml";

#[derive(Parser, Debug)]
#[command(name = "ingest")]
#[command(about = "Build area and coverage indexes from an object list")]
struct Args {
    /// Build configuration (TOML)
    #[arg(short, long)]
    config: PathBuf,

    /// Object list (CSV, optionally gzip compressed)
    #[arg(short, long)]
    objects: PathBuf,

    /// Output directory, overrides the configuration
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Default)]
struct IngestStats {
    objects: u64,
    skipped: u64,
    area: AreaIndexStats,
    coverage: CoverageStats,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Scout Index Ingest Pipeline");
    info!("Objects: {}", args.objects.display());

    let mut config = Config::load_from_file(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    if let Some(dir) = args.output_dir {
        config.global.output_dir = dir;
    }

    let start = Instant::now();
    let stats = run(&config, &args.objects)?;

    info!(
        "Indexed {} objects ({} skipped) in {:?}",
        stats.objects,
        stats.skipped,
        start.elapsed()
    );
    info!(
        "Area index: {} sections, {} cells, {} bytes",
        stats.area.sections, stats.area.filled_cells, stats.area.file_size
    );
    info!(
        "Coverage index: {}x{} cells, {} covered",
        stats.coverage.width, stats.coverage.height, stats.coverage.covered_tiles
    );

    Ok(())
}

fn run(config: &Config, objects: &Path) -> Result<IngestStats> {
    let type_config = Arc::new(config.type_config()?);
    let output_dir = &config.global.output_dir;
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let coverage_level =
        GridLevel::new(config.global.coverage_level).context("Invalid coverage level")?;
    let mut area = AreaIndexBuilder::new(type_config.clone());
    let mut coverage = CoverageIndexBuilder::new(coverage_level);

    let types_by_name: HashMap<&str, _> = type_config
        .types()
        .iter()
        .map(|t| (t.name.as_str(), t))
        .collect();

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {pos} objects ({per_sec}) {msg}")?,
    );

    let mut stats = IngestStats::default();
    let mut unknown_types: HashMap<String, u64> = HashMap::new();

    let mut reader = open_objects(objects)?;
    for result in reader.deserialize::<ObjectRecord>() {
        let record = result.context("Failed to parse object record")?;
        pb.inc(1);
        stats.objects += 1;

        let Some(type_info) = types_by_name.get(record.type_name.as_str()) else {
            *unknown_types.entry(record.type_name).or_default() += 1;
            stats.skipped += 1;
            continue;
        };

        let bbox = record.bbox();
        if !bbox.is_valid() {
            warn!("Object {} has an invalid bounding box {}", record.offset, bbox);
            stats.skipped += 1;
            continue;
        }

        coverage.add_box(&bbox)?;

        if !type_info.internal {
            if let Err(e) = area.add(type_info.id, record.offset, bbox) {
                warn!("Object {} not indexed: {}", record.offset, e);
                stats.skipped += 1;
            }
        }
    }

    pb.finish_with_message("Processing complete");

    for (name, count) in &unknown_types {
        warn!("Skipped {} objects of unknown type '{}'", count, name);
    }

    stats.area = area.write(output_dir.join(AREA_INDEX_FILE))?;
    stats.coverage = coverage.write(output_dir.join(COVERAGE_INDEX_FILE))?;
    type_config.save_to_file(output_dir.join(TYPES_FILE))?;

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_index::models::TypeConfig;
    use scout_index::{AreaIndex, CoverageIndex, GeoBox, GeoCoord, TypeInfoSet};

    #[test]
    fn test_run_builds_queryable_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let objects = dir.path().join("objects.csv");
        fs::write(
            &objects,
            "type,offset,min_lon,min_lat,max_lon,max_lat\n\
             building,100,13.37,52.51,13.38,52.52\n\
             building,200,2.29,48.85,2.30,48.86\n\
             water,300,13.0,52.3,13.8,52.7\n\
             boundary,400,5.0,47.0,15.0,55.0\n\
             unknown,500,0,0,1,1\n\
             water,600,10,10,5,5\n",
        )
        .unwrap();

        let config: Config = toml::from_str(&format!(
            r#"
            [global]
            output_dir = {:?}
            coverage_level = 10
            default_index_level = 10

            [[types]]
            id = 1
            name = "building"

            [[types]]
            id = 2
            name = "water"
            index_level = 6

            [[types]]
            id = 3
            name = "boundary"
            internal = true
            "#,
            dir.path().join("db")
        ))
        .unwrap();

        let stats = run(&config, &objects).unwrap();
        assert_eq!(stats.objects, 6);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.area.sections, 2);

        let db = dir.path().join("db");
        let type_config = Arc::new(TypeConfig::load_from_file(db.join(TYPES_FILE)).unwrap());
        assert_eq!(type_config.get(2).unwrap().level(), 6);

        let index = AreaIndex::open(type_config.clone(), &db, false).unwrap();
        let berlin = GeoBox::from_lon_lat(13.3, 52.4, 13.5, 52.6);
        let result = index
            .get_offsets(&berlin, &type_config.indexable_types())
            .unwrap();
        assert_eq!(result.offsets, vec![100, 300]);

        let boundary: TypeInfoSet = [3].into_iter().collect();
        let result = index.get_offsets(&GeoBox::world(), &boundary).unwrap();
        assert!(result.offsets.is_empty());
        assert!(result.loaded_types.is_empty());

        let coverage = CoverageIndex::open(&db).unwrap();
        assert!(coverage.is_covered(&GeoCoord::new(48.855, 2.295)));
        // internal objects still count as imported data
        assert!(coverage.is_covered(&GeoCoord::new(54.0, 6.0)));
        assert!(!coverage.is_covered(&GeoCoord::new(-33.9, 18.4)));
    }

    #[test]
    fn test_run_covers_large_objects() {
        let dir = tempfile::tempdir().unwrap();
        let objects = dir.path().join("objects.csv");
        fs::write(
            &objects,
            "type,offset,min_lon,min_lat,max_lon,max_lat
             water,100,0,0,90,89
",
        )
        .unwrap();

        let config: Config = toml::from_str(&format!(
            r#"
            [global]
            output_dir = {:?}
            coverage_level = 14

            [[types]]
            id = 1
            name = "water"
            index_level = 4
            "#,
            dir.path().join("db")
        ))
        .unwrap();

        let stats = run(&config, &objects).unwrap();
        assert_eq!(stats.skipped, 0);

        let coverage = CoverageIndex::open(dir.path().join("db")).unwrap();
        assert!(coverage.is_covered(&GeoCoord::new(45.0, 45.0)));
        assert!(!coverage.is_covered(&GeoCoord::new(-45.0, 45.0)));
    }
}
