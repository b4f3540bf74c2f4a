//! Web-Mercator tile geocodes.
//!
//! A geocode packs a bounding box into twelve base-36 characters: the
//! top-left tile `(x, y)` at a fixed zoom and the tile span minus one along
//! each axis, three digits apiece.
//!
//! ```
//! use mapstamp_core::geo::{encode, tile_x};
//!
//! assert_eq!(tile_x(-180.0, 13), 0);
//! let code = encode(0.001, 0.002, 0.001, 0.002, 13);
//! assert_eq!(code.as_str(), "35S35R000000");
//! ```

use std::f64::consts::PI;
use std::fmt;

/// Zoom level used for filename geocodes
pub const DEFAULT_ZOOM: u32 = 13;

const BASE36_ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Digits per geocode token
const TOKEN_WIDTH: usize = 3;

/// Largest value three base-36 digits can hold (`ZZZ`)
const TOKEN_MAX: i64 = 36 * 36 * 36 - 1;

/// Microdegrees per degree
const MICRODEGREES: f64 = 1_000_000.0;

/// Bounding box in microdegrees, as stored in Mapsforge headers.
///
/// `min <= max` is expected but not checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoundingBox {
    /// Southern edge
    pub min_lat: i32,
    /// Western edge
    pub min_lon: i32,
    /// Northern edge
    pub max_lat: i32,
    /// Eastern edge
    pub max_lon: i32,
}

impl BoundingBox {
    /// Creates a box from microdegree values
    pub fn new(min_lat: i32, min_lon: i32, max_lat: i32, max_lon: i32) -> Self {
        Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        }
    }

    /// Creates a box from degree values, rounding to the nearest microdegree
    pub fn from_degrees(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Self {
        let micro = |deg: f64| (deg * MICRODEGREES).round() as i32;
        Self::new(micro(min_lat), micro(min_lon), micro(max_lat), micro(max_lon))
    }

    /// Southern edge in degrees
    pub fn min_lat_deg(&self) -> f64 {
        self.min_lat as f64 / MICRODEGREES
    }

    /// Western edge in degrees
    pub fn min_lon_deg(&self) -> f64 {
        self.min_lon as f64 / MICRODEGREES
    }

    /// Northern edge in degrees
    pub fn max_lat_deg(&self) -> f64 {
        self.max_lat as f64 / MICRODEGREES
    }

    /// Eastern edge in degrees
    pub fn max_lon_deg(&self) -> f64 {
        self.max_lon as f64 / MICRODEGREES
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}) to ({}, {})",
            self.min_lat_deg(),
            self.min_lon_deg(),
            self.max_lat_deg(),
            self.max_lon_deg()
        )
    }
}

/// Twelve uppercase base-36 characters: x, y, x span - 1, y span - 1
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GeoCode(String);

impl GeoCode {
    /// The encoded characters
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GeoCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn tiles_per_side(zoom: u32) -> f64 {
    2f64.powi(zoom as i32)
}

/// Slippy-map tile column containing `lon`
pub fn tile_x(lon: f64, zoom: u32) -> i64 {
    (((lon + 180.0) / 360.0) * tiles_per_side(zoom)).floor() as i64
}

/// Slippy-map tile row containing `lat`; rows grow southward
pub fn tile_y(lat: f64, zoom: u32) -> i64 {
    let lat_rad = lat.to_radians();
    (((1.0 - lat_rad.tan().asinh() / PI) / 2.0) * tiles_per_side(zoom)).floor() as i64
}

/// Writes `value` as three base-36 digits, clamped to `000..=ZZZ`
fn push_base36(out: &mut String, value: i64) {
    let mut value = value.clamp(0, TOKEN_MAX);
    let mut digits = [b'0'; TOKEN_WIDTH];
    for slot in digits.iter_mut().rev() {
        *slot = BASE36_ALPHABET[(value % 36) as usize];
        value /= 36;
    }
    out.extend(digits.iter().map(|&d| d as char));
}

/// Encodes a degree bounding box at `zoom`
pub fn encode(min_lon: f64, max_lon: f64, min_lat: f64, max_lat: f64, zoom: u32) -> GeoCode {
    let x_start = tile_x(min_lon, zoom);
    let y_start = tile_y(max_lat, zoom);
    let x_end = tile_x(max_lon, zoom);
    let y_end = tile_y(min_lat, zoom);

    let x_span = x_end - x_start + 1;
    let y_span = y_end - y_start + 1;

    let mut code = String::with_capacity(TOKEN_WIDTH * 4);
    for value in [x_start, y_start, x_span - 1, y_span - 1] {
        push_base36(&mut code, value);
    }
    GeoCode(code)
}

/// Encodes bounding boxes at a fixed zoom level
#[derive(Debug, Clone, Copy)]
pub struct GeoEncoder {
    zoom: u32,
}

impl Default for GeoEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_ZOOM)
    }
}

impl GeoEncoder {
    /// Creates an encoder for `zoom`
    pub fn new(zoom: u32) -> Self {
        Self { zoom }
    }

    /// Configured zoom level
    pub fn zoom(&self) -> u32 {
        self.zoom
    }

    /// Encodes a microdegree bounding box
    pub fn encode(&self, bbox: &BoundingBox) -> GeoCode {
        encode(
            bbox.min_lon_deg(),
            bbox.max_lon_deg(),
            bbox.min_lat_deg(),
            bbox.max_lat_deg(),
            self.zoom,
        )
    }
}
