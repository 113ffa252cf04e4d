//! Verdict of a hunt against ground truth.

use serde::{Deserialize, Serialize};

use crate::gazetteer::{Gazetteer, Location};
use crate::hunt::HuntResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundTruthInfo {
    pub city: String,
    pub country_code: String,
}

impl GroundTruthInfo {
    /// Ground truth of the airport with the given code.
    pub fn from_code(gazetteer: &Gazetteer, code: &str) -> Option<Self> {
        gazetteer.by_code(code).map(|loc| Self {
            city: loc.city.clone(),
            country_code: loc.country_code.clone(),
        })
    }

    fn value(&self, g: Granularity) -> &str {
        match g {
            Granularity::City => &self.city,
            Granularity::Country => &self.country_code,
        }
    }
}

/// Airport code carried by a `cf-ray` response header (`<ray id>-<IATA>`).
pub fn parse_cf_ray(header: &str) -> Option<String> {
    let (_, code) = header.trim().rsplit_once('-')?;
    if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    Some(code.to_ascii_uppercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    City,
    Country,
}

impl Granularity {
    fn of(self, loc: &Location) -> &str {
        match self {
            Self::City => &loc.city,
            Self::Country => &loc.country_code,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OutcomeLabel {
    Indeterminate,
    Negative,
    Positive,
}

impl std::fmt::Display for OutcomeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Positive => "Positive",
            Self::Negative => "Negative",
            Self::Indeterminate => "Indeterminate",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Reason {
    #[serde(rename = "Multiples IP on target hop")]
    AmbiguousTargetHop,
    #[serde(rename = "Target hop do not respond")]
    UnresponsiveTargetHop,
    #[serde(rename = "Same result airport")]
    SameResult,
    #[serde(rename = "Different result airport")]
    DifferentResult,
    #[serde(rename = "Last hop not valid")]
    LastHopNotValid,
    #[serde(rename = "Last hop not geolocated")]
    LastHopNotGeolocated,
    #[serde(rename = "Ping discs no intersection")]
    NoIntersection,
    #[serde(rename = "Centroid not found")]
    CentroidNotFound,
    #[serde(rename = "Same result in nearest airport")]
    SameNearest,
    #[serde(rename = "Different result in nearest airport")]
    DifferentNearest,
    #[serde(rename = "Too many results")]
    TooManyResults,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AmbiguousTargetHop => "Multiples IP on target hop",
            Self::UnresponsiveTargetHop => "Target hop do not respond",
            Self::SameResult => "Same result airport",
            Self::DifferentResult => "Different result airport",
            Self::LastHopNotValid => "Last hop not valid",
            Self::LastHopNotGeolocated => "Last hop not geolocated",
            Self::NoIntersection => "Ping discs no intersection",
            Self::CentroidNotFound => "Centroid not found",
            Self::SameNearest => "Same result in nearest airport",
            Self::DifferentNearest => "Different result in nearest airport",
            Self::TooManyResults => "Too many results",
        }
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub label: OutcomeLabel,
    pub reason: Reason,
}

impl Outcome {
    fn new(label: OutcomeLabel, reason: Reason) -> Self {
        Self { label, reason }
    }

    fn indeterminate(reason: Reason) -> Self {
        Self::new(OutcomeLabel::Indeterminate, reason)
    }

    fn compare(expected: &str, got: &str, same: Reason, different: Reason) -> Self {
        if same_place(expected, got) {
            Self::new(OutcomeLabel::Positive, same)
        } else {
            Self::new(OutcomeLabel::Negative, different)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcomes {
    pub country: Outcome,
    pub city: Outcome,
}

fn same_place(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

pub struct OutcomeClassifier<'a> {
    gazetteer: &'a Gazetteer,
    validate_target_hop: bool,
}

impl<'a> OutcomeClassifier<'a> {
    pub fn new(gazetteer: &'a Gazetteer, validate_target_hop: bool) -> Self {
        Self {
            gazetteer,
            validate_target_hop,
        }
    }

    pub fn classify(&self, result: &HuntResult, gt: &GroundTruthInfo, g: Granularity) -> Outcome {
        if self.validate_target_hop {
            if let Some(target_hop) = result.traceroute.last() {
                if target_hop.is_ambiguous() {
                    return Outcome::indeterminate(Reason::AmbiguousTargetHop);
                }
                if target_hop.is_unresponsive() {
                    return Outcome::indeterminate(Reason::UnresponsiveTargetHop);
                }
            }
        }

        let found = match g {
            Granularity::City => &result.candidates.cities,
            Granularity::Country => &result.candidates.countries,
        };
        match found.as_slice() {
            [only] => Outcome::compare(
                gt.value(g),
                only,
                Reason::SameResult,
                Reason::DifferentResult,
            ),
            [] => self.classify_without_candidates(result, gt, g),
            _ => Outcome::indeterminate(Reason::TooManyResults),
        }
    }

    fn classify_without_candidates(
        &self,
        result: &HuntResult,
        gt: &GroundTruthInfo,
        g: Granularity,
    ) -> Outcome {
        let Some(last_hop) = &result.last_hop else {
            return Outcome::indeterminate(Reason::LastHopNotValid);
        };
        if last_hop.geolocation.is_none() {
            return Outcome::indeterminate(Reason::LastHopNotGeolocated);
        }
        if !result.discs_intersect {
            return Outcome::indeterminate(Reason::NoIntersection);
        }
        let nearest = result
            .centroid
            .as_ref()
            .and_then(|c| self.gazetteer.nearest(c));
        match nearest {
            Some(loc) => Outcome::compare(
                gt.value(g),
                g.of(loc),
                Reason::SameNearest,
                Reason::DifferentNearest,
            ),
            None => Outcome::indeterminate(Reason::CentroidNotFound),
        }
    }

    pub fn classify_all(&self, result: &HuntResult, gt: &GroundTruthInfo) -> Outcomes {
        Outcomes {
            country: self.classify(result, gt, Granularity::Country),
            city: self.classify(result, gt, Granularity::City),
        }
    }
}
