//! Reference locations and the test of which of them fit inside the discs.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::disc::DiscSet;
use crate::error::{HuntError, Result};
use crate::geo::{distance_km, GeoPoint};

/// An airport (or city) with its coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub code: String,
    #[serde(default)]
    pub name: String,
    pub city: String,
    pub country_code: String,
    #[serde(flatten)]
    pub point: GeoPoint,
}

/// Read-only list of reference locations, loaded once per process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gazetteer {
    locations: Vec<Location>,
}

#[derive(Debug, Deserialize)]
struct AirportRow {
    #[serde(rename = "#IATA")]
    code: String,
    #[serde(default)]
    name: String,
    city: String,
    country_code: String,
    #[serde(rename = "lat long")]
    lat_long: String,
}

impl Gazetteer {
    pub fn new(locations: Vec<Location>) -> Self {
        Self { locations }
    }

    /// Loads a JSON array of locations, or the tab-separated airports dataset
    /// when the file does not end in `.json`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let gazetteer = if path.extension().is_some_and(|e| e == "json") {
            Self::new(serde_json::from_reader(file)?)
        } else {
            Self::from_tsv(file)?
        };
        info!(path = %path.display(), locations = gazetteer.len(), "gazetteer loaded");
        Ok(gazetteer)
    }

    pub fn from_tsv<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .from_reader(reader);
        let mut locations = Vec::new();
        for row in rdr.deserialize::<AirportRow>() {
            let row = match row {
                Ok(r) => r,
                Err(err) => {
                    warn!("skipping gazetteer row: {err}");
                    continue;
                }
            };
            match parse_lat_long(&row.lat_long) {
                Ok(point) => locations.push(Location {
                    code: row.code,
                    name: row.name,
                    city: row.city,
                    country_code: row.country_code,
                    point,
                }),
                Err(err) => warn!(code = %row.code, "skipping gazetteer row: {err}"),
            }
        }
        Ok(Self::new(locations))
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn by_code(&self, code: &str) -> Option<&Location> {
        let code = code.trim();
        self.locations
            .iter()
            .find(|l| l.code.eq_ignore_ascii_case(code))
    }

    pub fn nearest(&self, point: &GeoPoint) -> Option<&Location> {
        self.locations.iter().min_by(|a, b| {
            distance_km(point, &a.point).total_cmp(&distance_km(point, &b.point))
        })
    }
}

fn parse_lat_long(s: &str) -> Result<GeoPoint> {
    let mut parts = s.split_whitespace();
    let (Some(lat), Some(lon)) = (parts.next(), parts.next()) else {
        return Err(HuntError::malformed(format!("lat long '{s}'")));
    };
    let lat: f64 = lat
        .parse()
        .map_err(|_| HuntError::malformed(format!("latitude '{lat}'")))?;
    let lon: f64 = lon
        .parse()
        .map_err(|_| HuntError::malformed(format!("longitude '{lon}'")))?;
    GeoPoint::new(lat, lon)
}

/// Locations compatible with every valid disc of a hunt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidates {
    pub cities: Vec<String>,
    pub countries: Vec<String>,
    pub locations: Vec<Location>,
}

impl Candidates {
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

/// Keeps the locations strictly inside every valid disc. Nothing fits when
/// there is no valid disc.
pub fn resolve_candidates(gazetteer: &Gazetteer, discs: &DiscSet) -> Candidates {
    let mut out = Candidates::default();
    if !discs.has_valid() {
        return out;
    }
    for loc in gazetteer.locations() {
        if !discs.contains(&loc.point) {
            continue;
        }
        if !out.cities.contains(&loc.city) {
            out.cities.push(loc.city.clone());
        }
        if !out.countries.contains(&loc.country_code) {
            out.countries.push(loc.country_code.clone());
        }
        out.locations.push(loc.clone());
    }
    info!(
        cities = ?out.cities,
        countries = ?out.countries,
        "candidate locations resolved"
    );
    out
}
