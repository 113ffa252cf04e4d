//! The hunt state machine.
//!
//! A hunt walks a fixed sequence of phases. Each phase computes a
//! [`PhaseDelta`] from what earlier phases produced; the controller merges
//! the deltas into a [`HuntResultBuilder`] and advances the phase. Errors
//! stop at the hunt boundary: fatal ones move the hunt to
//! [`HuntPhase::Failed`], the rest are recorded as issues, and every run ends
//! in [`HuntPhase::Done`] with a complete [`HuntResult`].

use std::collections::HashMap;
use std::net::IpAddr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{HuntConfig, IntersectionMode};
use crate::disc::{Disc, DiscSet};
use crate::error::{HuntError, HuntIssue, Result};
use crate::gazetteer::{resolve_candidates, Candidates, Gazetteer};
use crate::geo::GeoPoint;
use crate::measurement::{collect_results, decode_pings, submit_with_retry, PingSample};
use crate::platform::{
    IpGeolocator, JobId, MeasurementKind, MeasurementPlatform, MeasurementRequest,
    VantageDirectory, VantagePoint,
};
use crate::traceroute::{decode_platform_traceroute, select_last_hop, AnycastCheck, AnycastList, Hop, LastHop};
use crate::vantage::VantageSelector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HuntPhase {
    Init,
    TracerouteIssued,
    LastHopResolved,
    LastHopGeolocated,
    PingsIssued,
    DiscsBuilt,
    IntersectionEvaluated,
    CandidatesResolved,
    Failed,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HuntResult {
    pub target: IpAddr,
    pub origin: Option<GeoPoint>,
    pub traceroute_from_host: bool,
    pub traceroute_job: Option<JobId>,
    pub traceroute: Vec<Hop>,
    pub last_hop: Option<LastHop>,
    pub ping_job: Option<JobId>,
    pub pings: Vec<PingSample>,
    pub discs: DiscSet,
    pub discs_intersect: bool,
    /// Centroid of the area covered by every valid disc.
    pub centroid: Option<GeoPoint>,
    pub candidates: Candidates,
    pub phases: Vec<HuntPhase>,
    pub failure: Option<HuntIssue>,
    pub issues: Vec<HuntIssue>,
    pub started_unix_ms: i64,
    pub finished_unix_ms: Option<i64>,
}

impl HuntResult {
    pub fn new(target: IpAddr, origin: Option<GeoPoint>) -> Self {
        Self {
            target,
            origin,
            traceroute_from_host: false,
            traceroute_job: None,
            traceroute: Vec::new(),
            last_hop: None,
            ping_job: None,
            pings: Vec::new(),
            discs: DiscSet::new(),
            discs_intersect: false,
            centroid: None,
            candidates: Candidates::default(),
            phases: vec![HuntPhase::Init],
            failure: None,
            issues: Vec::new(),
            started_unix_ms: crate::now_unix_ms(),
            finished_unix_ms: None,
        }
    }

    pub fn phase(&self) -> HuntPhase {
        self.phases.last().copied().unwrap_or(HuntPhase::Init)
    }

    pub fn reached(&self, phase: HuntPhase) -> bool {
        self.phases.contains(&phase)
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }
}

/// What one phase contributes to the result.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseDelta {
    Traceroute {
        job: Option<JobId>,
        hops: Vec<Hop>,
    },
    LastHop(LastHop),
    LastHopLocation(GeoPoint),
    Pings {
        job: JobId,
        samples: Vec<PingSample>,
    },
    Discs(DiscSet),
    Intersection {
        intersect: bool,
        centroid: Option<GeoPoint>,
    },
    Candidates(Candidates),
    Issue(HuntIssue),
}

#[derive(Debug)]
pub struct HuntResultBuilder {
    result: HuntResult,
}

impl HuntResultBuilder {
    pub fn new(target: IpAddr, origin: Option<GeoPoint>, from_host: bool) -> Self {
        let mut result = HuntResult::new(target, origin);
        result.traceroute_from_host = from_host;
        Self { result }
    }

    pub fn result(&self) -> &HuntResult {
        &self.result
    }

    /// Moves to `phase`; phases only ever advance.
    pub fn enter(&mut self, phase: HuntPhase) {
        let current = self.result.phase();
        debug_assert!(phase > current, "hunt cannot move from {current:?} to {phase:?}");
        if phase <= current {
            warn!(?current, ?phase, "ignoring backward phase transition");
            return;
        }
        info!(target = %self.result.target, ?phase, "hunt phase");
        self.result.phases.push(phase);
    }

    pub fn apply(&mut self, delta: PhaseDelta) {
        let r = &mut self.result;
        match delta {
            PhaseDelta::Traceroute { job, hops } => {
                r.traceroute_job = job;
                r.traceroute = hops;
            }
            PhaseDelta::LastHop(hop) => r.last_hop = Some(hop),
            PhaseDelta::LastHopLocation(point) => {
                if let Some(hop) = r.last_hop.as_mut() {
                    hop.geolocation = Some(point);
                }
            }
            PhaseDelta::Pings { job, samples } => {
                r.ping_job = Some(job);
                r.pings = samples;
            }
            PhaseDelta::Discs(discs) => r.discs = discs,
            PhaseDelta::Intersection {
                intersect,
                centroid,
            } => {
                r.discs_intersect = intersect;
                r.centroid = centroid;
            }
            PhaseDelta::Candidates(c) => r.candidates = c,
            PhaseDelta::Issue(issue) => r.issues.push(issue),
        }
    }

    pub fn note(&mut self, err: &HuntError) {
        self.apply(PhaseDelta::Issue(HuntIssue::from(err)));
    }

    pub fn fail(&mut self, err: &HuntError) {
        warn!(target = %self.result.target, "hunt failed: {err}");
        self.result.failure = Some(HuntIssue::from(err));
        self.enter(HuntPhase::Failed);
    }

    pub fn finish(mut self) -> HuntResult {
        self.enter(HuntPhase::Done);
        self.result.finished_unix_ms = Some(crate::now_unix_ms());
        self.result
    }
}

/// Where the hop list of a hunt comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum TracerouteSource {
    /// Run a traceroute on the platform from a vantage point near `origin`.
    Platform { origin: GeoPoint },
    /// Hops of a traceroute already run from this host.
    Host(Vec<Hop>),
}

#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub platform: &'a dyn MeasurementPlatform,
    pub geolocator: &'a dyn IpGeolocator,
    pub directory: &'a dyn VantageDirectory,
}

pub struct HuntController<'a, R: Rng> {
    config: &'a HuntConfig,
    gazetteer: &'a Gazetteer,
    collaborators: Collaborators<'a>,
    anycast: Box<dyn AnycastCheck + 'a>,
    rng: R,
}

impl<'a, R: Rng> HuntController<'a, R> {
    pub fn new(
        config: &'a HuntConfig,
        gazetteer: &'a Gazetteer,
        collaborators: Collaborators<'a>,
        rng: R,
    ) -> Self {
        Self {
            config,
            gazetteer,
            collaborators,
            anycast: Box::new(AnycastList::new(config.anycast_addresses.iter().copied())),
            rng,
        }
    }

    pub fn with_anycast(mut self, anycast: Box<dyn AnycastCheck + 'a>) -> Self {
        self.anycast = anycast;
        self
    }

    /// Runs a complete hunt. Never fails: errors end up in the result.
    pub fn run(&mut self, target: IpAddr, source: TracerouteSource) -> HuntResult {
        let (origin, from_host) = match &source {
            TracerouteSource::Platform { origin } => (Some(*origin), false),
            TracerouteSource::Host(_) => (None, true),
        };
        let mut b = HuntResultBuilder::new(target, origin, from_host);
        info!(%target, from_host, "hunt started");
        if let Err(err) = self.hunt(&mut b, target, source) {
            b.fail(&err);
        }
        let result = b.finish();
        info!(
            %target,
            intersect = result.discs_intersect,
            countries = ?result.candidates.countries,
            failed = result.is_failed(),
            "hunt done"
        );
        result
    }

    fn hunt(&mut self, b: &mut HuntResultBuilder, target: IpAddr, source: TracerouteSource) -> Result<()> {
        let delta = self.traceroute(b, target, source)?;
        b.apply(delta);
        b.enter(HuntPhase::TracerouteIssued);

        let last_hop = select_last_hop(&b.result().traceroute, target, self.anycast.as_ref())?;
        info!(address = %last_hop.address, index = last_hop.index, "last hop selected");
        let address = last_hop.address;
        b.apply(PhaseDelta::LastHop(last_hop));
        b.enter(HuntPhase::LastHopResolved);

        let location = match self.collaborators.geolocator.locate(address) {
            Ok(p) => p,
            Err(err) if !err.is_fatal() => {
                warn!(%address, "{err}");
                b.note(&err);
                b.apply(self.evaluate_intersection(&DiscSet::new()));
                b.enter(HuntPhase::IntersectionEvaluated);
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        b.apply(PhaseDelta::LastHopLocation(location));
        b.enter(HuntPhase::LastHopGeolocated);

        let (delta, selected) = self.pings(b, target, &location)?;
        b.apply(delta);
        b.enter(HuntPhase::PingsIssued);

        let discs = self.build_discs(b, &selected);
        b.apply(PhaseDelta::Discs(discs));
        b.enter(HuntPhase::DiscsBuilt);

        let delta = self.evaluate_intersection(&b.result().discs);
        b.apply(delta);
        b.enter(HuntPhase::IntersectionEvaluated);

        if b.result().discs_intersect {
            let candidates = resolve_candidates(self.gazetteer, &b.result().discs);
            b.apply(PhaseDelta::Candidates(candidates));
            b.enter(HuntPhase::CandidatesResolved);
        } else {
            info!(%target, "ping discs do not intersect");
        }
        Ok(())
    }

    fn traceroute(
        &mut self,
        b: &mut HuntResultBuilder,
        target: IpAddr,
        source: TracerouteSource,
    ) -> Result<PhaseDelta> {
        let origin = match source {
            TracerouteSource::Host(hops) => return Ok(PhaseDelta::Traceroute { job: None, hops }),
            TracerouteSource::Platform { origin } => origin,
        };
        let selector = VantageSelector::from_config(self.config);
        let probes = selector.select(
            self.collaborators.directory,
            &origin,
            self.config.traceroute_vantage_points,
            target,
            &mut self.rng,
        )?;
        let request = MeasurementRequest {
            target,
            kind: MeasurementKind::Traceroute,
            vantage_point_ids: probes.iter().map(|p| p.id).collect(),
            packets: self.config.packets,
        };
        let job = submit_with_retry(
            self.collaborators.platform,
            &request,
            self.config.submission_retries,
        )?;
        let collected = collect_results(self.collaborators.platform, job, &self.config.poll_policy());
        if let Some(err) = &collected.timeout {
            b.note(err);
        }
        let hops = match decode_platform_traceroute(&collected.results) {
            Ok(hops) => hops,
            Err(err) => {
                b.note(&err);
                Vec::new()
            }
        };
        Ok(PhaseDelta::Traceroute {
            job: Some(job),
            hops,
        })
    }

    fn pings(
        &mut self,
        b: &mut HuntResultBuilder,
        target: IpAddr,
        near: &GeoPoint,
    ) -> Result<(PhaseDelta, Vec<VantagePoint>)> {
        let selector = VantageSelector::from_config(self.config);
        let probes = selector.select(
            self.collaborators.directory,
            near,
            self.config.ping_vantage_points,
            target,
            &mut self.rng,
        )?;
        let request = MeasurementRequest {
            target,
            kind: MeasurementKind::Ping,
            vantage_point_ids: probes.iter().map(|p| p.id).collect(),
            packets: self.config.packets,
        };
        let job = submit_with_retry(
            self.collaborators.platform,
            &request,
            self.config.submission_retries,
        )?;
        let collected = collect_results(self.collaborators.platform, job, &self.config.poll_policy());
        if let Some(err) = &collected.timeout {
            b.note(err);
        }
        let (samples, skipped) = decode_pings(&collected.results);
        for err in &skipped {
            b.note(err);
        }
        Ok((PhaseDelta::Pings { job, samples }, probes))
    }

    /// One disc per ping sample, centered on the vantage point that sent it.
    fn build_discs(&self, b: &mut HuntResultBuilder, selected: &[VantagePoint]) -> DiscSet {
        let propagation = self.config.propagation();
        let known: HashMap<u64, GeoPoint> = selected.iter().map(|v| (v.id, v.location)).collect();
        let mut discs = DiscSet::new();
        let mut issues = Vec::new();
        for sample in &b.result().pings {
            let center = match known.get(&sample.probe_id) {
                Some(p) => Some(*p),
                None => match self.collaborators.directory.probe(sample.probe_id) {
                    Ok(vp) => vp.map(|v| v.location),
                    Err(err) => {
                        warn!(probe = sample.probe_id, "probe lookup failed: {err}");
                        None
                    }
                },
            };
            let Some(center) = center else {
                let err = HuntError::malformed(format!("probe {} has no location", sample.probe_id));
                warn!("{err}");
                issues.push(err);
                continue;
            };
            let disc = Disc::from_rtt(sample.probe_id, center, sample.min_rtt_ms, &propagation);
            debug!(
                probe = sample.probe_id,
                rtt_ms = ?sample.min_rtt_ms,
                radius_km = disc.radius_km(),
                "disc built"
            );
            discs.add(disc);
        }
        for err in &issues {
            b.note(err);
        }
        discs
    }

    fn evaluate_intersection(&self, discs: &DiscSet) -> PhaseDelta {
        if !discs.has_valid() {
            return PhaseDelta::Intersection {
                intersect: false,
                centroid: None,
            };
        }
        let pairwise = discs.pairwise_consistent();
        let region = if pairwise {
            discs.common_region(self.config.region_grid_deg)
        } else {
            None
        };
        let intersect = match self.config.intersection_mode {
            IntersectionMode::Pairwise => pairwise,
            IntersectionMode::CommonPoint => region.is_some(),
        };
        debug!(pairwise, region_samples = region.map(|r| r.samples), intersect, "intersection evaluated");
        PhaseDelta::Intersection {
            intersect,
            centroid: region.map(|r| r.centroid),
        }
    }
}
