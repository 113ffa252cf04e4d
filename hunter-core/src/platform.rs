//! Collaborator interfaces: the measurement platform, the IP geolocation
//! service and the vantage point directory.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::geo::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementKind {
    Traceroute,
    Ping,
}

impl std::fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Traceroute => f.write_str("traceroute"),
            Self::Ping => f.write_str("ping"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementRequest {
    pub target: IpAddr,
    pub kind: MeasurementKind,
    pub vantage_point_ids: Vec<u64>,
    pub packets: u32,
}

pub type JobId = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    /// The platform has not scheduled any vantage point yet.
    NotScheduled,
    Progress {
        scheduled: usize,
        results: Vec<Value>,
    },
}

pub trait MeasurementPlatform {
    fn submit(&self, request: &MeasurementRequest) -> Result<JobId>;
    fn poll(&self, job: JobId) -> Result<PollStatus>;
}

pub trait IpGeolocator {
    /// Fails with `GeolocationUnavailable` when the address has no location.
    fn locate(&self, addr: IpAddr) -> Result<GeoPoint>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VantagePoint {
    pub id: u64,
    pub location: GeoPoint,
    pub address: Option<IpAddr>,
}

pub trait VantageDirectory {
    /// Connected vantage points within `radius_km` of `center`.
    fn connected_within(&self, center: &GeoPoint, radius_km: f64) -> Result<Vec<VantagePoint>>;
    fn probe(&self, id: u64) -> Result<Option<VantagePoint>>;
}
