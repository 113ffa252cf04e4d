use serde::{Deserialize, Serialize};

use crate::constants::{ARC_COS_EPSILON, EARTH_RADIUS_KM, WORLD_LAT_MAX, WORLD_LON_MAX};
use crate::error::{HuntError, Result};

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPoint", into = "RawPoint")]
pub struct GeoPoint {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RawPoint {
    latitude: f64,
    longitude: f64,
}

impl TryFrom<RawPoint> for GeoPoint {
    type Error = HuntError;

    fn try_from(raw: RawPoint) -> Result<Self> {
        GeoPoint::new(raw.latitude, raw.longitude)
    }
}

impl From<GeoPoint> for RawPoint {
    fn from(p: GeoPoint) -> Self {
        RawPoint {
            latitude: p.lat,
            longitude: p.lon,
        }
    }
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Result<Self> {
        let in_range = lat.is_finite()
            && lon.is_finite()
            && lat.abs() <= WORLD_LAT_MAX
            && lon.abs() <= WORLD_LON_MAX;
        if !in_range {
            return Err(HuntError::InvalidCoordinate { lat, lon });
        }
        Ok(Self { lat, lon })
    }

    pub fn latitude(&self) -> f64 {
        self.lat
    }

    pub fn longitude(&self) -> f64 {
        self.lon
    }

    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        distance_km(self, other)
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.4}, {:.4})", self.lat, self.lon)
    }
}

/// Great-circle distance by the spherical law of cosines.
pub fn distance_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    // co-latitude
    let phi1 = (90.0 - a.lat).to_radians();
    let phi2 = (90.0 - b.lat).to_radians();
    let theta1 = a.lon.to_radians();
    let theta2 = b.lon.to_radians();

    let cos = phi1.sin() * phi2.sin() * (theta1 - theta2).cos() + phi1.cos() * phi2.cos();
    let arc = if (cos - 1.0).abs() < ARC_COS_EPSILON {
        0.0
    } else {
        cos.clamp(-1.0, 1.0).acos()
    };
    arc * EARTH_RADIUS_KM
}

/// Spherical mean of a point set. `None` for an empty set or when the unit
/// vectors cancel out.
pub fn centroid<'a, I>(points: I) -> Option<GeoPoint>
where
    I: IntoIterator<Item = &'a GeoPoint>,
{
    let (mut x, mut y, mut z) = (0.0, 0.0, 0.0);
    let mut n = 0usize;
    for p in points {
        let lat = p.lat.to_radians();
        let lon = p.lon.to_radians();
        x += lat.cos() * lon.cos();
        y += lat.cos() * lon.sin();
        z += lat.sin();
        n += 1;
    }
    if n == 0 {
        return None;
    }
    let norm = (x * x + y * y + z * z).sqrt();
    if norm < 1e-12 {
        return None;
    }
    let lat = (z / norm).asin().to_degrees();
    let lon = y.atan2(x).to_degrees();
    GeoPoint::new(lat, lon).ok()
}
