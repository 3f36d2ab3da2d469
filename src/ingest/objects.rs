use anyhow::{Context, Result};
use csv::ReaderBuilder;
use flate2::read::GzDecoder;
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::info;

use scout_index::models::{FileOffset, GeoBox};

//schema

//type,offset,min_lon,min_lat,max_lon,max_lat
//building,1024,13.3701,52.5162,13.3779,52.5191

/// One object of the object list
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ObjectRecord {
    #[serde(rename = "type")]
    pub type_name: String,
    pub offset: FileOffset,
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl ObjectRecord {
    pub fn bbox(&self) -> GeoBox {
        GeoBox::from_lon_lat(self.min_lon, self.min_lat, self.max_lon, self.max_lat)
    }
}

/// Open an object list, transparently decompressing `.gz` files.
pub fn open_objects(path: &Path) -> Result<csv::Reader<Box<dyn Read>>> {
    info!("Reading objects from {}", path.display());

    let file = File::open(path).context("Failed to open object list")?;
    let reader: Box<dyn Read> = if path.extension().map_or(false, |e| e == "gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    Ok(ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const OBJECTS: &str = "type,offset,min_lon,min_lat,max_lon,max_lat\n\
                           building, 1024, 13.37, 52.51, 13.38, 52.52\n\
                           water,2048,-1.5,-2.5,1.5,2.5\n";

    fn read_all(path: &Path) -> Vec<ObjectRecord> {
        open_objects(path)
            .unwrap()
            .deserialize()
            .collect::<std::result::Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn test_plain_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("objects.csv");
        std::fs::write(&path, OBJECTS).unwrap();

        let records = read_all(&path);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].type_name, "building");
        assert_eq!(records[0].offset, 1024);
        assert_eq!(records[1].bbox(), GeoBox::from_lon_lat(-1.5, -2.5, 1.5, 2.5));
    }

    #[test]
    fn test_gzip_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("objects.csv.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(OBJECTS.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let records = read_all(&path);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].type_name, "water");
    }
}
