//! Error taxonomy for a hunt and its collaborators.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HuntError {
    /// Platform refused or failed a measurement submission.
    #[error("measurement submission failed: {0}")]
    MeasurementSubmissionFailed(String),

    /// Polling gave up before every scheduled vantage point answered.
    #[error("measurement {job} timed out after {attempts} polls ({received}/{scheduled} results)")]
    MeasurementTimeout {
        job: u64,
        attempts: u32,
        received: usize,
        scheduled: usize,
    },

    #[error("no valid last hop in a traceroute of {hops} hops")]
    NoValidLastHop { hops: usize },

    #[error("geolocation unavailable for {0}")]
    GeolocationUnavailable(String),

    #[error("insufficient vantage points: {found}/{required} within {radius_km:.0} km")]
    InsufficientVantagePoints {
        required: usize,
        found: usize,
        radius_km: f64,
    },

    #[error("malformed measurement sample: {0}")]
    MalformedMeasurementSample(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid coordinate: lat={lat} lon={lon}")]
    InvalidCoordinate { lat: f64, lon: f64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl HuntError {
    pub fn submission(msg: impl Into<String>) -> Self {
        Self::MeasurementSubmissionFailed(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedMeasurementSample(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn kind(&self) -> IssueKind {
        match self {
            Self::MeasurementSubmissionFailed(_) => IssueKind::MeasurementSubmissionFailed,
            Self::MeasurementTimeout { .. } => IssueKind::MeasurementTimeout,
            Self::NoValidLastHop { .. } => IssueKind::NoValidLastHop,
            Self::GeolocationUnavailable(_) => IssueKind::GeolocationUnavailable,
            Self::InsufficientVantagePoints { .. } => IssueKind::InsufficientVantagePoints,
            Self::MalformedMeasurementSample(_) => IssueKind::MalformedMeasurementSample,
            _ => IssueKind::Internal,
        }
    }

    /// Whether the hunt has to stop at this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::MeasurementTimeout { .. }
                | Self::GeolocationUnavailable(_)
                | Self::MalformedMeasurementSample(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, HuntError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    MeasurementSubmissionFailed,
    MeasurementTimeout,
    NoValidLastHop,
    GeolocationUnavailable,
    InsufficientVantagePoints,
    MalformedMeasurementSample,
    Internal,
}

/// Serializable trace of an error, stored in the hunt result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HuntIssue {
    pub kind: IssueKind,
    pub message: String,
}

impl From<&HuntError> for HuntIssue {
    fn from(err: &HuntError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
