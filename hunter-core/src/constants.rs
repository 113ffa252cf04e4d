pub const EARTH_RADIUS_KM: f64 = 6371.0;
pub const SPEED_OF_LIGHT_KM_S: f64 = 299_792.458;
pub const MS_PER_SEC: f64 = 1000.0;
pub const RTT_FACTOR: f64 = 2.0;

/// Radius carried by a disc built from a sample without a usable RTT.
pub const SENTINEL_RADIUS_KM: f64 = -1.0;

/// Below this distance from 1.0 the cosine of the arc is treated as exactly 1.
pub const ARC_COS_EPSILON: f64 = 1e-15;

/// Half the Earth's circumference: no two points are further apart.
pub const MAX_SEARCH_RADIUS_KM: f64 = std::f64::consts::PI * EARTH_RADIUS_KM;

/// Refractive factors, named by the distance range they were fitted on.
pub const FIBER_REFRACTIVE_INDEX: f64 = 1.0 / 1.52;
pub const FACTOR_500_KM: f64 = 0.18;
pub const FACTOR_1000_KM: f64 = 0.25;
pub const FACTOR_2000_KM: f64 = 0.30;
pub const FACTOR_3000_KM: f64 = 0.35;
pub const FACTOR_5000_KM: f64 = 0.40;

pub const DEFAULT_REFRACTIVE_FACTOR: f64 = FACTOR_500_KM;
pub const DEFAULT_INITIAL_RADIUS_KM: f64 = 20.0;
pub const DEFAULT_RADIUS_STEP_KM: f64 = 10.0;
pub const DEFAULT_MAX_RADIUS_KM: f64 = 20_000.0;
pub const DEFAULT_TRACEROUTE_VANTAGE_POINTS: usize = 1;
pub const DEFAULT_PING_VANTAGE_POINTS: usize = 7;
pub const DEFAULT_PACKETS: u32 = 3;
pub const DEFAULT_SUBMISSION_RETRIES: u32 = 3;
pub const DEFAULT_POLL_FIRST_DELAY_MS: u64 = 5_000;
pub const DEFAULT_POLL_DELAY_MS: u64 = 15_000;
pub const DEFAULT_POLL_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_REGION_GRID_DEG: f64 = 0.1;
pub const DEFAULT_OUTPUT_DIR: &str = "datasets/hunter_measurements";

pub const WORLD_LAT_MAX: f64 = 90.0;
pub const WORLD_LON_MAX: f64 = 180.0;
