//! Area index lookup tool.
//!
//! Opens the area index of a database directory and prints the offsets of
//! all objects of the requested types inside a bounding box. With
//! `--magnification` the sections optimized for that zoom level are used
//! where available, and the base sections for all other types.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use scout_index::models::TypeConfig;
use scout_index::{AreaIndex, AreaOffsets, FileOffset, GeoBox, Level as GridLevel, TypeInfoSet};

/// Type configuration stored next to the index files
const TYPES_FILE: &str = "types.toml";

#[derive(Parser, Debug)]
#[command(name = "query")]
#[command(about = "Look up object offsets in an area index")]
#[command(allow_negative_numbers = true)]
struct Args {
    /// Database directory holding area.idx and types.toml
    #[arg(short, long)]
    dir: PathBuf,

    /// Bounding box: "minLon,minLat,maxLon,maxLat"
    #[arg(short, long)]
    bbox: String,

    /// Type names (comma-separated), defaults to all indexed types
    #[arg(short, long, value_delimiter = ',')]
    types: Vec<String>,

    /// Zoom level to use optimized sections for
    #[arg(short, long, value_parser = parse_level)]
    magnification: Option<GridLevel>,

    /// Memory map the index file
    #[arg(long)]
    mmap: bool,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct QueryResponse<'a> {
    bbox: [f64; 4],
    types: Vec<String>,
    offsets: &'a [FileOffset],
    took_ms: u128,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let Some(bbox) = parse_bbox(&args.bbox) else {
        bail!("Invalid bounding box '{}', expected minLon,minLat,maxLon,maxLat", args.bbox);
    };

    let types_path = args.dir.join(TYPES_FILE);
    let type_config = Arc::new(
        TypeConfig::load_from_file(&types_path)
            .with_context(|| format!("Failed to load {}", types_path.display()))?,
    );

    let requested: TypeInfoSet = if args.types.is_empty() {
        type_config.indexable_types()
    } else {
        type_config.resolve_names(&args.types)?
    };

    let index = AreaIndex::open(type_config.clone(), &args.dir, args.mmap)
        .with_context(|| format!("Failed to open area index in {}", args.dir.display()))?;

    let mut available = index.available_types(&requested);
    if let Some(magnification) = args.magnification {
        available.extend(index.available_types_at(&requested, magnification).iter());
    }
    let missing = requested.difference(&available);
    if !missing.is_empty() {
        info!(
            "Types not served by this index: {}",
            missing.names(&type_config).join(", ")
        );
    }

    let start = std::time::Instant::now();
    let result = lookup(&index, &bbox, &requested, args.magnification)?;
    let took = start.elapsed();

    info!(
        "Found {} offsets for {} types in {:?}",
        result.offsets.len(),
        result.loaded_types.len(),
        took
    );

    if args.json {
        let response = QueryResponse {
            bbox: [bbox.min().lon, bbox.min().lat, bbox.max().lon, bbox.max().lat],
            types: result.loaded_types.names(&type_config),
            offsets: &result.offsets,
            took_ms: took.as_millis(),
        };
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        for offset in &result.offsets {
            println!("{}", offset);
        }
    }

    Ok(())
}

/// Query optimized sections first and the base sections for the rest.
fn lookup(
    index: &AreaIndex,
    bbox: &GeoBox,
    types: &TypeInfoSet,
    magnification: Option<GridLevel>,
) -> Result<AreaOffsets> {
    let Some(magnification) = magnification.filter(|&m| index.has_optimizations(m)) else {
        return Ok(index.get_offsets(bbox, types)?);
    };

    let optimized = index.get_offsets_at(bbox, types, magnification)?;
    let rest = types.difference(&optimized.loaded_types);
    let base = index.get_offsets(bbox, &rest)?;

    let mut offsets = optimized.offsets;
    offsets.extend(base.offsets);
    offsets.sort_unstable();
    offsets.dedup();

    let mut loaded_types = optimized.loaded_types;
    loaded_types.extend(base.loaded_types.iter());

    Ok(AreaOffsets {
        offsets,
        loaded_types,
    })
}

fn parse_level(value: &str) -> std::result::Result<GridLevel, String> {
    let level = value.parse::<u32>().map_err(|e| e.to_string())?;
    GridLevel::new(level).map_err(|e| e.to_string())
}

/// Parse "minLon,minLat,maxLon,maxLat" into a valid box.
fn parse_bbox(bbox: &str) -> Option<GeoBox> {
    let parts: Vec<f64> = bbox
        .split(',')
        .map(|p| p.trim().parse().ok())
        .collect::<Option<_>>()?;
    if parts.len() != 4 {
        return None;
    }
    let bbox = GeoBox::from_lon_lat(parts[0], parts[1], parts[2], parts[3]);
    bbox.is_valid().then_some(bbox)
}
