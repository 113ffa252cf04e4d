use std::fmt;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::disc::Propagation;
use crate::error::{HuntError, Result};

/// How the ping discs of a hunt are judged consistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IntersectionMode {
    /// Every pair of valid discs overlaps.
    #[default]
    Pairwise,
    /// Some point lies inside every valid disc.
    CommonPoint,
}

/// Named refractive factors. `Fiber` is the physical index of glass; the
/// others are empirical factors for targets within the given distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RefractivePreset {
    Fiber,
    Km500,
    Km1000,
    Km2000,
    Km3000,
    Km5000,
}

impl RefractivePreset {
    pub const ALL: [RefractivePreset; 6] = [
        Self::Fiber,
        Self::Km500,
        Self::Km1000,
        Self::Km2000,
        Self::Km3000,
        Self::Km5000,
    ];

    pub fn factor(self) -> f64 {
        match self {
            Self::Fiber => FIBER_REFRACTIVE_INDEX,
            Self::Km500 => FACTOR_500_KM,
            Self::Km1000 => FACTOR_1000_KM,
            Self::Km2000 => FACTOR_2000_KM,
            Self::Km3000 => FACTOR_3000_KM,
            Self::Km5000 => FACTOR_5000_KM,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Fiber => "fiber",
            Self::Km500 => "km500",
            Self::Km1000 => "km1000",
            Self::Km2000 => "km2000",
            Self::Km3000 => "km3000",
            Self::Km5000 => "km5000",
        }
    }
}

impl fmt::Display for RefractivePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RefractivePreset {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|p| p.name()).collect();
                format!("unknown refractive preset '{s}', expected one of {}", names.join(", "))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HuntConfig {
    pub refractive_factor: f64,
    /// Overrides `refractive_factor` when set.
    pub refractive_preset: Option<RefractivePreset>,
    pub speed_of_light_km_s: f64,
    pub initial_radius_km: f64,
    pub radius_step_km: f64,
    pub max_radius_km: f64,
    pub traceroute_vantage_points: usize,
    pub ping_vantage_points: usize,
    pub packets: u32,
    pub submission_retries: u32,
    pub poll_first_delay_ms: u64,
    pub poll_delay_ms: u64,
    pub poll_max_attempts: u32,
    pub intersection_mode: IntersectionMode,
    pub region_grid_deg: f64,
    pub validate_target_hop: bool,
    /// Addresses treated as anycast when picking the last hop.
    pub anycast_addresses: Vec<IpAddr>,
    pub gazetteer_path: Option<String>,
    pub output_dir: String,
}

impl Default for HuntConfig {
    fn default() -> Self {
        Self {
            refractive_factor: DEFAULT_REFRACTIVE_FACTOR,
            refractive_preset: None,
            speed_of_light_km_s: SPEED_OF_LIGHT_KM_S,
            initial_radius_km: DEFAULT_INITIAL_RADIUS_KM,
            radius_step_km: DEFAULT_RADIUS_STEP_KM,
            max_radius_km: DEFAULT_MAX_RADIUS_KM,
            traceroute_vantage_points: DEFAULT_TRACEROUTE_VANTAGE_POINTS,
            ping_vantage_points: DEFAULT_PING_VANTAGE_POINTS,
            packets: DEFAULT_PACKETS,
            submission_retries: DEFAULT_SUBMISSION_RETRIES,
            poll_first_delay_ms: DEFAULT_POLL_FIRST_DELAY_MS,
            poll_delay_ms: DEFAULT_POLL_DELAY_MS,
            poll_max_attempts: DEFAULT_POLL_MAX_ATTEMPTS,
            intersection_mode: IntersectionMode::default(),
            region_grid_deg: DEFAULT_REGION_GRID_DEG,
            validate_target_hop: true,
            anycast_addresses: Vec::new(),
            gazetteer_path: None,
            output_dir: DEFAULT_OUTPUT_DIR.to_string(),
        }
    }
}

impl HuntConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read(path)?;
        let cfg: HuntConfig = serde_json::from_slice(&data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.propagation().validate()?;
        if self.traceroute_vantage_points == 0 || self.ping_vantage_points == 0 {
            return Err(HuntError::config(
                "tracerouteVantagePoints and pingVantagePoints must be > 0",
            ));
        }
        if self.packets == 0 {
            return Err(HuntError::config("packets must be > 0"));
        }
        if !(self.initial_radius_km > 0.0 && self.radius_step_km > 0.0) {
            return Err(HuntError::config(
                "initialRadiusKm and radiusStepKm must be > 0",
            ));
        }
        if !(self.initial_radius_km.is_finite() && self.radius_step_km.is_finite()) {
            return Err(HuntError::config(
                "initialRadiusKm and radiusStepKm must be finite",
            ));
        }
        if !(self.max_radius_km >= self.initial_radius_km
            && self.max_radius_km <= MAX_SEARCH_RADIUS_KM)
        {
            return Err(HuntError::config(format!(
                "maxRadiusKm must be between initialRadiusKm and {MAX_SEARCH_RADIUS_KM:.0}, got {}",
                self.max_radius_km
            )));
        }
        if self.poll_max_attempts == 0 {
            return Err(HuntError::config("pollMaxAttempts must be > 0"));
        }
        if !(self.region_grid_deg > 0.0) {
            return Err(HuntError::config("regionGridDeg must be > 0"));
        }
        Ok(())
    }

    pub fn propagation(&self) -> Propagation {
        Propagation {
            refractive_factor: self
                .refractive_preset
                .map_or(self.refractive_factor, RefractivePreset::factor),
            speed_of_light_km_s: self.speed_of_light_km_s,
        }
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            first_delay: Duration::from_millis(self.poll_first_delay_ms),
            delay: Duration::from_millis(self.poll_delay_ms),
            max_attempts: self.poll_max_attempts,
        }
    }
}

/// Bounded polling schedule: one short wait, then fixed waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub first_delay: Duration,
    pub delay: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    /// Wait before poll number `attempt` (0-based).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            self.first_delay
        } else {
            self.delay
        }
    }
}
