use crate::error::{LocationSenseError, Result};
use geo::{HaversineDistance, Point};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Shared coordinate-validity predicate.
///
/// Callers must check positions with this before handing them to the
/// geocoding engine; `GeoPosition::new` uses it.
pub fn is_valid_coordinate(lat: f64, lon: f64) -> bool {
    lat.is_finite()
        && lon.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lon)
}

/// Validated WGS84 position (degrees)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPosition")]
pub struct GeoPosition {
    lat: f64,
    lon: f64,
}

#[derive(Deserialize)]
struct RawPosition {
    lat: f64,
    lon: f64,
}

impl TryFrom<RawPosition> for GeoPosition {
    type Error = LocationSenseError;

    fn try_from(raw: RawPosition) -> Result<Self> {
        GeoPosition::new(raw.lat, raw.lon)
    }
}

impl GeoPosition {
    pub fn new(lat: f64, lon: f64) -> Result<Self> {
        if !is_valid_coordinate(lat, lon) {
            return Err(LocationSenseError::InvalidCoordinates { lat, lon });
        }
        Ok(GeoPosition { lat, lon })
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lon(&self) -> f64 {
        self.lon
    }

    /// Great-circle distance in meters
    pub fn distance_m(&self, other: &GeoPosition) -> f64 {
        let a = Point::new(self.lon, self.lat);
        let b = Point::new(other.lon, other.lat);
        a.haversine_distance(&b)
    }
}

impl Display for GeoPosition {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{:.5}, {:.5}", self.lat, self.lon)
    }
}

/// Reverse-geocoding result.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AddressData {
    pub address: String,
    pub city: String,
    /// Set when the address is only the formatted coordinates
    #[serde(default)]
    pub fallback: bool,
}

impl AddressData {
    pub fn new(address: impl Into<String>, city: impl Into<String>) -> Self {
        AddressData {
            address: address.into(),
            city: city.into(),
            fallback: false,
        }
    }

    /// A result is usable when it carries an address or a city.
    pub fn is_usable(&self) -> bool {
        !self.address.trim().is_empty() || !self.city.trim().is_empty()
    }
}

/// Recorded GPS fix as produced by the device location API.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GpsFix {
    pub timestamp: f64,
    pub latitude: f64,
    pub longitude: f64,
    /// m/s
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub accuracy: f64,
}

impl GpsFix {
    pub fn position(&self) -> Result<GeoPosition> {
        GeoPosition::new(self.latitude, self.longitude)
    }
}
