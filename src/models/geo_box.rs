//! Geographic coordinate and bounding box types.

use serde::{Deserialize, Serialize};

/// Smallest valid latitude.
pub const MIN_LAT: f64 = -90.0;
/// Largest valid latitude.
pub const MAX_LAT: f64 = 90.0;
/// Smallest valid longitude.
pub const MIN_LON: f64 = -180.0;
/// Largest valid longitude.
pub const MAX_LON: f64 = 180.0;

/// Geographic point (lat/lon)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoCoord {
    pub lat: f64,
    pub lon: f64,
}

impl GeoCoord {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// True if both components are finite and inside the WGS84 range
    pub fn is_valid(&self) -> bool {
        (MIN_LAT..=MAX_LAT).contains(&self.lat) && (MIN_LON..=MAX_LON).contains(&self.lon)
    }
}

impl std::fmt::Display for GeoCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6},{:.6}", self.lat, self.lon)
    }
}

impl From<geo_types::Coord<f64>> for GeoCoord {
    fn from(coord: geo_types::Coord<f64>) -> Self {
        Self {
            lat: coord.y,
            lon: coord.x,
        }
    }
}

impl From<GeoCoord> for geo_types::Coord<f64> {
    fn from(coord: GeoCoord) -> Self {
        geo_types::Coord {
            x: coord.lon,
            y: coord.lat,
        }
    }
}

/// Geographic rectangle between `min` (south-west) and `max` (north-east).
///
/// A box whose min exceeds its max on either axis, or that contains a
/// non-finite component, is invalid and covers nothing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBox {
    min: GeoCoord,
    max: GeoCoord,
}

impl GeoBox {
    /// Create a box from its south-west and north-east corners, as given.
    pub fn new(min: GeoCoord, max: GeoCoord) -> Self {
        Self { min, max }
    }

    /// Create a box spanning two arbitrary corners.
    pub fn from_corners(a: GeoCoord, b: GeoCoord) -> Self {
        Self {
            min: GeoCoord::new(a.lat.min(b.lat), a.lon.min(b.lon)),
            max: GeoCoord::new(a.lat.max(b.lat), a.lon.max(b.lon)),
        }
    }

    /// Create a box from `minLon,minLat,maxLon,maxLat` order.
    pub fn from_lon_lat(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self::new(GeoCoord::new(min_lat, min_lon), GeoCoord::new(max_lat, max_lon))
    }

    /// The explicitly invalid box.
    pub fn empty() -> Self {
        Self {
            min: GeoCoord::new(f64::NAN, f64::NAN),
            max: GeoCoord::new(f64::NAN, f64::NAN),
        }
    }

    /// The whole world.
    pub fn world() -> Self {
        Self::new(GeoCoord::new(MIN_LAT, MIN_LON), GeoCoord::new(MAX_LAT, MAX_LON))
    }

    pub fn min(&self) -> GeoCoord {
        self.min
    }

    pub fn max(&self) -> GeoCoord {
        self.max
    }

    pub fn is_valid(&self) -> bool {
        // NaN fails every comparison, so this also rejects non-finite corners
        self.min.lat <= self.max.lat
            && self.min.lon <= self.max.lon
            && self.min.lat.is_finite()
            && self.min.lon.is_finite()
            && self.max.lat.is_finite()
            && self.max.lon.is_finite()
    }

    /// Check whether `coord` lies inside the box (borders included)
    pub fn includes(&self, coord: &GeoCoord) -> bool {
        self.is_valid()
            && coord.lat >= self.min.lat
            && coord.lat <= self.max.lat
            && coord.lon >= self.min.lon
            && coord.lon <= self.max.lon
    }

    /// Check whether the two boxes share at least one point
    pub fn intersects(&self, other: &GeoBox) -> bool {
        self.is_valid()
            && other.is_valid()
            && self.min.lat <= other.max.lat
            && self.max.lat >= other.min.lat
            && self.min.lon <= other.max.lon
            && self.max.lon >= other.min.lon
    }

    /// Smallest box containing both boxes. Invalid inputs are ignored.
    pub fn union(&self, other: &GeoBox) -> GeoBox {
        match (self.is_valid(), other.is_valid()) {
            (false, false) => GeoBox::empty(),
            (true, false) => *self,
            (false, true) => *other,
            (true, true) => GeoBox::from_corners(
                GeoCoord::new(self.min.lat.min(other.min.lat), self.min.lon.min(other.min.lon)),
                GeoCoord::new(self.max.lat.max(other.max.lat), self.max.lon.max(other.max.lon)),
            ),
        }
    }

    /// Short human readable description for logs.
    pub fn display_text(&self) -> String {
        if self.is_valid() {
            format!("[{} - {}]", self.min, self.max)
        } else {
            "[invalid]".to_string()
        }
    }
}

impl std::fmt::Display for GeoBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display_text())
    }
}

impl From<geo_types::Rect<f64>> for GeoBox {
    fn from(rect: geo_types::Rect<f64>) -> Self {
        GeoBox::new(rect.min().into(), rect.max().into())
    }
}

impl From<GeoBox> for Option<geo_types::Rect<f64>> {
    fn from(bbox: GeoBox) -> Self {
        bbox.is_valid()
            .then(|| geo_types::Rect::new(bbox.min, bbox.max))
    }
}
