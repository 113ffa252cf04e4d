//! Offline collaborators answering from recorded measurements.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{HuntError, Result};
use crate::geo::{distance_km, GeoPoint};
use crate::hunt::Collaborators;
use crate::platform::{
    IpGeolocator, JobId, MeasurementKind, MeasurementPlatform, MeasurementRequest, PollStatus,
    VantageDirectory, VantagePoint,
};

fn connected() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayProbe {
    pub id: u64,
    #[serde(flatten)]
    pub location: GeoPoint,
    #[serde(rename = "addressV4", alias = "address", default)]
    pub address: Option<IpAddr>,
    #[serde(default = "connected")]
    pub connected: bool,
}

impl ReplayProbe {
    fn vantage_point(&self) -> VantagePoint {
        VantagePoint {
            id: self.id,
            location: self.location,
            address: self.address,
        }
    }
}

/// Everything one recorded hunt needs to be played back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReplayFixture {
    pub probes: Vec<ReplayProbe>,
    /// Router address to location.
    pub geolocation: HashMap<IpAddr, GeoPoint>,
    /// Raw platform traceroute results.
    pub traceroute: Vec<Value>,
    /// Raw platform ping results.
    pub ping: Vec<Value>,
    /// Polls answered with "not scheduled" before results show up.
    pub pending_polls: u32,
}

impl ReplayFixture {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let fixture: Self = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        info!(
            path = %path.display(),
            probes = fixture.probes.len(),
            traceroutes = fixture.traceroute.len(),
            pings = fixture.ping.len(),
            "replay fixture loaded"
        );
        Ok(fixture)
    }
}

/// Plays a [`ReplayFixture`] back as platform, geolocator and directory.
/// Job ids are handed out sequentially from 1.
#[derive(Debug)]
pub struct Replay {
    fixture: ReplayFixture,
    next_job: Cell<JobId>,
    jobs: RefCell<HashMap<JobId, (MeasurementKind, u32)>>,
}

impl Replay {
    pub fn new(fixture: ReplayFixture) -> Self {
        Self {
            fixture,
            next_job: Cell::new(1),
            jobs: RefCell::new(HashMap::new()),
        }
    }

    pub fn fixture(&self) -> &ReplayFixture {
        &self.fixture
    }

    pub fn collaborators(&self) -> Collaborators<'_> {
        Collaborators {
            platform: self,
            geolocator: self,
            directory: self,
        }
    }

    fn recorded(&self, kind: MeasurementKind) -> &[Value] {
        match kind {
            MeasurementKind::Traceroute => &self.fixture.traceroute,
            MeasurementKind::Ping => &self.fixture.ping,
        }
    }
}

impl MeasurementPlatform for Replay {
    fn submit(&self, request: &MeasurementRequest) -> Result<JobId> {
        if request.vantage_point_ids.is_empty() {
            return Err(HuntError::submission("no vantage points requested"));
        }
        let job = self.next_job.get();
        self.next_job.set(job + 1);
        self.jobs
            .borrow_mut()
            .insert(job, (request.kind, self.fixture.pending_polls));
        debug!(job, kind = %request.kind, "replay job created");
        Ok(job)
    }

    fn poll(&self, job: JobId) -> Result<PollStatus> {
        let mut jobs = self.jobs.borrow_mut();
        let Some((kind, pending)) = jobs.get_mut(&job) else {
            return Err(HuntError::submission(format!("unknown job {job}")));
        };
        if *pending > 0 {
            *pending -= 1;
            return Ok(PollStatus::NotScheduled);
        }
        let results = self.recorded(*kind).to_vec();
        Ok(PollStatus::Progress {
            scheduled: results.len(),
            results,
        })
    }
}

impl IpGeolocator for Replay {
    fn locate(&self, addr: IpAddr) -> Result<GeoPoint> {
        self.fixture
            .geolocation
            .get(&addr)
            .copied()
            .ok_or_else(|| HuntError::GeolocationUnavailable(addr.to_string()))
    }
}

impl VantageDirectory for Replay {
    fn connected_within(&self, center: &GeoPoint, radius_km: f64) -> Result<Vec<VantagePoint>> {
        Ok(self
            .fixture
            .probes
            .iter()
            .filter(|p| p.connected && distance_km(center, &p.location) <= radius_km)
            .map(ReplayProbe::vantage_point)
            .collect())
    }

    fn probe(&self, id: u64) -> Result<Option<VantagePoint>> {
        Ok(self
            .fixture
            .probes
            .iter()
            .find(|p| p.id == id)
            .map(ReplayProbe::vantage_point))
    }
}
