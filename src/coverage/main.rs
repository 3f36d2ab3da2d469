//! Coverage check tool.
//!
//! Reports for each database directory whether it holds data at a given
//! coordinate: "+ dir" when covered, "- dir" when not, "! dir" when the
//! coverage index could not be opened.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use rayon::prelude::*;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use scout_index::{CoverageIndex, GeoCoord};

#[derive(Parser, Debug)]
#[command(name = "coverage")]
#[command(about = "Check which databases cover a coordinate")]
#[command(allow_negative_numbers = true)]
struct Args {
    /// Latitude in degrees
    #[arg(value_parser = parse_lat)]
    lat: f64,

    /// Longitude in degrees
    #[arg(value_parser = parse_lon)]
    lon: f64,

    /// Database directories holding coverage.idx
    #[arg(required = true)]
    dirs: Vec<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// Outcome for one database directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Coverage {
    Covered,
    NotCovered,
    Failed,
}

impl Coverage {
    fn marker(self) -> char {
        match self {
            Coverage::Covered => '+',
            Coverage::NotCovered => '-',
            Coverage::Failed => '!',
        }
    }
}

fn parse_degrees(value: &str, limit: f64) -> Result<f64, String> {
    let degrees: f64 = value
        .parse()
        .map_err(|_| format!("'{}' is not a number", value))?;
    if !(-limit..=limit).contains(&degrees) {
        return Err(format!("{} is outside of -{}..{}", degrees, limit, limit));
    }
    Ok(degrees)
}

fn parse_lat(value: &str) -> Result<f64, String> {
    parse_degrees(value, 90.0)
}

fn parse_lon(value: &str) -> Result<f64, String> {
    parse_degrees(value, 180.0)
}

fn check(dir: &Path, coord: &GeoCoord) -> Coverage {
    match CoverageIndex::open(dir) {
        Ok(index) => {
            if index.is_covered(coord) {
                Coverage::Covered
            } else {
                Coverage::NotCovered
            }
        }
        Err(e) => {
            error!("Cannot open coverage index in {}: {}", dir.display(), e);
            Coverage::Failed
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::WARN })
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let coord = GeoCoord::new(args.lat, args.lon);

    info!("Checking {} against {} databases", coord, args.dirs.len());

    // collect keeps the argument order
    let results: Vec<Coverage> = args.dirs.par_iter().map(|dir| check(dir, &coord)).collect();

    for (dir, coverage) in args.dirs.iter().zip(results) {
        println!("{} {}", coverage.marker(), dir.display());
    }

    Ok(())
}
