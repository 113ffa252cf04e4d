pub mod config;
pub mod constants;
pub mod disc;
pub mod error;
pub mod gazetteer;
pub mod geo;
pub mod hunt;
pub mod measurement;
pub mod outcome;
pub mod platform;
pub mod record;
pub mod replay;
pub mod stats;
pub mod traceroute;
pub mod vantage;

use std::time::{SystemTime, UNIX_EPOCH};

pub use config::{HuntConfig, IntersectionMode, PollPolicy, RefractivePreset};
pub use disc::{Disc, DiscSet, Propagation};
pub use error::{HuntError, HuntIssue, IssueKind, Result};
pub use gazetteer::{resolve_candidates, Candidates, Gazetteer, Location};
pub use geo::{distance_km, GeoPoint};
pub use hunt::{Collaborators, HuntController, HuntPhase, HuntResult, TracerouteSource};
pub use outcome::{
    parse_cf_ray, GroundTruthInfo, Granularity, Outcome, OutcomeClassifier, OutcomeLabel, Outcomes,
    Reason,
};
pub use record::HuntRecord;
pub use replay::{Replay, ReplayFixture};
pub use traceroute::{parse_host_traceroute, Hop, LastHop};
pub use vantage::VantageSelector;

pub fn now_unix_ms() -> i64 {
    let dur = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (dur.as_secs() as i64) * 1000 + (dur.subsec_millis() as i64)
}
