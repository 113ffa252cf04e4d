//! Distance constraints derived from RTT samples.
//!
//! A [`Disc`] bounds where a target can be given the minimum RTT seen from one
//! vantage point: light in fiber cannot travel further than half the RTT
//! allows. A [`DiscSet`] groups the discs of one hunt by radius so the
//! tightest constraint is always at hand.

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_REFRACTIVE_FACTOR, EARTH_RADIUS_KM, MS_PER_SEC, RTT_FACTOR, SENTINEL_RADIUS_KM,
    SPEED_OF_LIGHT_KM_S, WORLD_LAT_MAX, WORLD_LON_MAX,
};
use crate::error::{HuntError, Result};
use crate::geo::{centroid, distance_km, GeoPoint};

/// Upper bound on grid cells per axis for the region search.
const MAX_GRID_CELLS_PER_AXIS: f64 = 1000.0;
/// Lower bound on grid cells between the anchor center and its edge.
const MIN_CELLS_PER_RADIUS: f64 = 4.0;

/// Propagation model turning an RTT into a maximum distance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Propagation {
    /// Fraction of vacuum light speed achieved over real paths, in (0, 1].
    pub refractive_factor: f64,
    pub speed_of_light_km_s: f64,
}

impl Default for Propagation {
    fn default() -> Self {
        Self {
            refractive_factor: DEFAULT_REFRACTIVE_FACTOR,
            speed_of_light_km_s: SPEED_OF_LIGHT_KM_S,
        }
    }
}

impl Propagation {
    pub fn new(refractive_factor: f64) -> Result<Self> {
        let p = Self {
            refractive_factor,
            ..Self::default()
        };
        p.validate()?;
        Ok(p)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.refractive_factor > 0.0 && self.refractive_factor <= 1.0) {
            return Err(HuntError::config(format!(
                "refractiveFactor must be in (0, 1], got {}",
                self.refractive_factor
            )));
        }
        if !(self.speed_of_light_km_s.is_finite() && self.speed_of_light_km_s > 0.0) {
            return Err(HuntError::config("speedOfLightKmS must be > 0"));
        }
        Ok(())
    }

    /// One-way distance reachable within `rtt_ms`.
    pub fn radius_from_rtt(&self, rtt_ms: f64) -> f64 {
        (rtt_ms / RTT_FACTOR) / MS_PER_SEC * (self.refractive_factor * self.speed_of_light_km_s)
    }

    /// Like [`Propagation::radius_from_rtt`] but maps a missing or unusable
    /// sample to the sentinel radius.
    pub fn radius_for(&self, rtt_ms: Option<f64>) -> f64 {
        match rtt_ms {
            Some(v) if v.is_finite() && v > 0.0 => self.radius_from_rtt(v),
            _ => SENTINEL_RADIUS_KM,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawDisc", into = "RawDisc")]
pub struct Disc {
    center: GeoPoint,
    radius_km: f64,
    probe_id: u64,
    rtt_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDisc {
    center: GeoPoint,
    radius_km: f64,
    probe_id: u64,
    #[serde(default)]
    rtt_ms: Option<f64>,
}

impl From<RawDisc> for Disc {
    fn from(raw: RawDisc) -> Self {
        Disc::new(raw.probe_id, raw.center, raw.radius_km, raw.rtt_ms)
    }
}

impl From<Disc> for RawDisc {
    fn from(d: Disc) -> Self {
        RawDisc {
            center: d.center,
            radius_km: d.radius_km,
            probe_id: d.probe_id,
            rtt_ms: d.rtt_ms,
        }
    }
}

impl Disc {
    pub fn new(probe_id: u64, center: GeoPoint, radius_km: f64, rtt_ms: Option<f64>) -> Self {
        let radius_km = if radius_km.is_finite() && radius_km >= 0.0 {
            radius_km
        } else {
            SENTINEL_RADIUS_KM
        };
        Self {
            center,
            radius_km,
            probe_id,
            rtt_ms: if radius_km < 0.0 { None } else { rtt_ms },
        }
    }

    pub fn from_rtt(
        probe_id: u64,
        center: GeoPoint,
        rtt_ms: Option<f64>,
        propagation: &Propagation,
    ) -> Self {
        Self::new(probe_id, center, propagation.radius_for(rtt_ms), rtt_ms)
    }

    pub fn center(&self) -> &GeoPoint {
        &self.center
    }

    pub fn radius_km(&self) -> f64 {
        self.radius_km
    }

    pub fn probe_id(&self) -> u64 {
        self.probe_id
    }

    pub fn rtt_ms(&self) -> Option<f64> {
        self.rtt_ms
    }

    pub fn is_usable(&self) -> bool {
        self.radius_km >= 0.0
    }

    /// Two discs overlap when their centers are no further apart than the sum
    /// of their radii. Sentinel discs overlap nothing.
    pub fn overlaps(&self, other: &Disc) -> bool {
        if !self.is_usable() || !other.is_usable() {
            return false;
        }
        distance_km(&self.center, &other.center) <= self.radius_km + other.radius_km
    }

    /// Strict containment: a point on the boundary is outside.
    pub fn contains(&self, point: &GeoPoint) -> bool {
        self.is_usable() && distance_km(point, &self.center) < self.radius_km
    }
}

/// All discs of one radius.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscBucket {
    radius_km: f64,
    discs: Vec<(Disc, bool)>,
}

impl DiscBucket {
    pub fn radius_km(&self) -> f64 {
        self.radius_km
    }

    /// `(disc, valid)` pairs.
    pub fn entries(&self) -> &[(Disc, bool)] {
        &self.discs
    }
}

/// Points sampled inside every valid disc.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub samples: usize,
    pub centroid: GeoPoint,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Disc>", into = "Vec<Disc>")]
pub struct DiscSet {
    buckets: Vec<DiscBucket>,
}

impl From<Vec<Disc>> for DiscSet {
    fn from(discs: Vec<Disc>) -> Self {
        let mut set = DiscSet::new();
        for d in discs {
            set.add(d);
        }
        set
    }
}

impl From<DiscSet> for Vec<Disc> {
    fn from(set: DiscSet) -> Self {
        set.buckets
            .into_iter()
            .flat_map(|b| b.discs.into_iter().map(|(d, _)| d))
            .collect()
    }
}

impl DiscSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, disc: Disc) {
        let valid = disc.is_usable();
        let r = disc.radius_km;
        match self
            .buckets
            .binary_search_by(|b| b.radius_km.total_cmp(&r))
        {
            Ok(i) => self.buckets[i].discs.push((disc, valid)),
            Err(i) => self.buckets.insert(
                i,
                DiscBucket {
                    radius_km: r,
                    discs: vec![(disc, valid)],
                },
            ),
        }
    }

    /// Removes one occurrence of `disc`; empty buckets are dropped.
    pub fn remove(&mut self, disc: &Disc) -> bool {
        let r = disc.radius_km;
        let Ok(i) = self
            .buckets
            .binary_search_by(|b| b.radius_km.total_cmp(&r))
        else {
            return false;
        };
        let bucket = &mut self.buckets[i];
        let Some(pos) = bucket.discs.iter().position(|(d, _)| d == disc) else {
            return false;
        };
        bucket.discs.remove(pos);
        if bucket.discs.is_empty() {
            self.buckets.remove(i);
        }
        true
    }

    /// Buckets in ascending radius order, sentinel bucket first if present.
    pub fn ordered(&self) -> impl Iterator<Item = &DiscBucket> {
        self.buckets.iter()
    }

    /// The tightest usable constraint.
    pub fn smallest(&self) -> Option<&DiscBucket> {
        self.buckets.iter().find(|b| b.radius_km >= 0.0)
    }

    pub fn valid(&self) -> impl Iterator<Item = &Disc> {
        self.buckets
            .iter()
            .flat_map(|b| b.discs.iter())
            .filter(|(_, valid)| *valid)
            .map(|(d, _)| d)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Disc> {
        self.buckets.iter().flat_map(|b| b.discs.iter().map(|(d, _)| d))
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.discs.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn has_valid(&self) -> bool {
        self.smallest().is_some()
    }

    pub fn any_overlaps(&self, probe: &Disc) -> bool {
        self.iter().any(|d| d.overlaps(probe))
    }

    /// Every pair of valid discs overlaps. False when no disc is valid.
    pub fn pairwise_consistent(&self) -> bool {
        let valid: Vec<&Disc> = self.valid().collect();
        if valid.is_empty() {
            return false;
        }
        for (i, a) in valid.iter().enumerate() {
            for b in &valid[i + 1..] {
                if !a.overlaps(b) {
                    return false;
                }
            }
        }
        true
    }

    /// Whether `point` lies strictly inside every valid disc. False when no
    /// disc is valid.
    pub fn contains(&self, point: &GeoPoint) -> bool {
        let mut any = false;
        for d in self.valid() {
            if !d.contains(point) {
                return false;
            }
            any = true;
        }
        any
    }

    /// Grid search for points inside every valid disc. The grid is centered
    /// on the smallest valid disc and covers its bounding box; the step is
    /// at most `step_deg` and never coarser than a quarter of that disc's
    /// radius.
    pub fn common_region(&self, step_deg: f64) -> Option<Region> {
        if !(step_deg > 0.0) {
            return None;
        }
        let anchor = self.smallest()?.discs.first().map(|(d, _)| d)?;
        let (dlat, dlon) = half_extents(anchor);
        let (lat_step, lat_cells) = axis(step_deg, dlat)?;
        let (lon_step, lon_cells) = axis(step_deg, dlon)?;
        let c = anchor.center();

        let mut inside = Vec::new();
        for i in -lat_cells..=lat_cells {
            let lat = c.latitude() + i as f64 * lat_step;
            for j in -lon_cells..=lon_cells {
                let lon = wrap_lon(c.longitude() + j as f64 * lon_step);
                if let Ok(p) = GeoPoint::new(lat, lon) {
                    if self.contains(&p) {
                        inside.push(p);
                    }
                }
            }
        }
        let c = centroid(inside.iter())?;
        Some(Region {
            samples: inside.len(),
            centroid: c,
        })
    }
}

/// Half the latitude and longitude span of a disc's bounding box, in degrees.
fn half_extents(disc: &Disc) -> (f64, f64) {
    let km_per_deg = EARTH_RADIUS_KM.to_radians();
    let dlat = disc.radius_km() / km_per_deg;
    let widest = disc.center().latitude().abs() + dlat;
    if widest >= WORLD_LAT_MAX {
        return (dlat, WORLD_LON_MAX);
    }
    (dlat, (dlat / widest.to_radians().cos()).min(WORLD_LON_MAX))
}

/// Step and cell count on each side of the center for one grid axis.
fn axis(step_deg: f64, half_deg: f64) -> Option<(f64, i64)> {
    if !(half_deg > 0.0) {
        return None;
    }
    let step = step_deg
        .min(half_deg / MIN_CELLS_PER_RADIUS)
        .max(2.0 * half_deg / MAX_GRID_CELLS_PER_AXIS);
    Some((step, (half_deg / step).floor() as i64))
}

fn wrap_lon(lon: f64) -> f64 {
    if lon > WORLD_LON_MAX {
        lon - 2.0 * WORLD_LON_MAX
    } else if lon < -WORLD_LON_MAX {
        lon + 2.0 * WORLD_LON_MAX
    } else {
        lon
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    const TEST_FACTOR: f64 = 0.18;
    /// Roughly 100 km of longitude at the equator.
    const TEST_LON_100_KM: f64 = 0.899_322;
    const TEST_MADRID: (f64, f64) = (40.4168, -3.7038);

    fn point(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint::new(lat, lon).unwrap()
    }

    fn disc(id: u64, lat: f64, lon: f64, radius_km: f64) -> Disc {
        Disc::new(id, point(lat, lon), radius_km, Some(1.0))
    }

    fn sentinel(id: u64) -> Disc {
        Disc::from_rtt(id, point(0.0, 0.0), None, &Propagation::default())
    }

    #[test]
    fn radius_for_ten_ms_at_factor_018() {
        let p = Propagation::new(TEST_FACTOR).unwrap();
        assert_abs_diff_eq!(p.radius_from_rtt(10.0), 269.813_212_2, epsilon = 1e-6);
    }

    #[test]
    fn unusable_rtt_maps_to_sentinel() {
        let p = Propagation::default();
        assert_eq!(p.radius_for(None), SENTINEL_RADIUS_KM);
        assert_eq!(p.radius_for(Some(-1.0)), SENTINEL_RADIUS_KM);
        assert_eq!(p.radius_for(Some(f64::NAN)), SENTINEL_RADIUS_KM);
        let d = sentinel(3);
        assert!(!d.is_usable());
        assert_eq!(d.rtt_ms(), None);
    }

    #[test]
    fn refractive_factor_must_be_a_fraction() {
        assert!(Propagation::new(0.0).is_err());
        assert!(Propagation::new(1.2).is_err());
        assert!(Propagation::new(1.0).is_ok());
    }

    #[test]
    fn discs_100_km_apart() {
        let a = disc(1, 0.0, 0.0, 60.0);
        let b = disc(2, 0.0, TEST_LON_100_KM, 50.0);
        assert_abs_diff_eq!(distance_km(a.center(), b.center()), 100.0, epsilon = 0.01);
        assert!(a.overlaps(&b));

        let c = disc(3, 0.0, 0.0, 30.0);
        let d = disc(4, 0.0, TEST_LON_100_KM, 20.0);
        assert!(!c.overlaps(&d));
    }

    #[test]
    fn sentinel_overlaps_nothing() {
        let s = sentinel(1);
        assert!(!s.overlaps(&s));
        assert!(!s.overlaps(&disc(2, 0.0, 0.0, 10_000.0)));
        assert!(!disc(2, 0.0, 0.0, 10_000.0).overlaps(&s));
    }

    #[test]
    fn containment_excludes_boundary() {
        let d = disc(1, 0.0, 0.0, 100.0);
        let on_edge_km = distance_km(d.center(), &point(0.0, TEST_LON_100_KM));
        let exact = Disc::new(2, point(0.0, 0.0), on_edge_km, Some(1.0));
        assert!(!exact.contains(&point(0.0, TEST_LON_100_KM)));
        assert!(d.contains(&point(0.0, 0.5)));
    }

    #[test]
    fn ordered_and_smallest() {
        let mut set = DiscSet::new();
        set.add(disc(1, 0.0, 0.0, 300.0));
        set.add(sentinel(2));
        set.add(disc(3, 1.0, 1.0, 120.0));
        set.add(disc(4, 2.0, 2.0, 300.0));

        let radii: Vec<f64> = set.ordered().map(|b| b.radius_km()).collect();
        assert_eq!(radii, vec![SENTINEL_RADIUS_KM, 120.0, 300.0]);
        assert_eq!(set.smallest().unwrap().radius_km(), 120.0);
        assert_eq!(set.len(), 4);
        assert_eq!(set.valid().count(), 3);
        assert!(!set.ordered().next().unwrap().entries()[0].1);
    }

    #[test]
    fn remove_drops_empty_buckets() {
        let mut set = DiscSet::new();
        let a = disc(1, 0.0, 0.0, 50.0);
        set.add(a.clone());
        set.add(disc(2, 0.0, 0.0, 80.0));
        assert!(set.remove(&a));
        assert!(!set.remove(&a));
        assert_eq!(set.smallest().unwrap().radius_km(), 80.0);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn any_overlaps_checks_incoming_disc() {
        let mut set = DiscSet::new();
        set.add(disc(1, 0.0, 0.0, 60.0));
        assert!(set.any_overlaps(&disc(2, 0.0, TEST_LON_100_KM, 50.0)));
        assert!(!set.any_overlaps(&disc(3, 0.0, TEST_LON_100_KM, 20.0)));
        assert!(!set.any_overlaps(&sentinel(4)));
    }

    #[test]
    fn pairwise_consistency_ignores_sentinels() {
        let mut set = DiscSet::new();
        assert!(!set.pairwise_consistent());
        set.add(sentinel(1));
        assert!(!set.pairwise_consistent());
        set.add(disc(2, 0.0, 0.0, 60.0));
        assert!(set.pairwise_consistent());
        set.add(disc(3, 0.0, TEST_LON_100_KM, 50.0));
        assert!(set.pairwise_consistent());
        set.add(disc(4, 0.0, 2.0 * TEST_LON_100_KM, 20.0));
        assert!(!set.pairwise_consistent());
    }

    #[test]
    fn common_region_finds_the_lens() {
        let mut set = DiscSet::new();
        set.add(disc(1, 0.0, 0.0, 80.0));
        set.add(disc(2, 0.0, TEST_LON_100_KM, 80.0));
        let region = set.common_region(0.05).unwrap();
        assert!(region.samples > 0);
        assert_abs_diff_eq!(region.centroid.longitude(), TEST_LON_100_KM / 2.0, epsilon = 0.05);
        assert_abs_diff_eq!(region.centroid.latitude(), 0.0, epsilon = 0.05);
    }

    #[test]
    fn common_region_samples_a_disc_smaller_than_the_step() {
        let mut set = DiscSet::new();
        set.add(disc(1, TEST_MADRID.0, TEST_MADRID.1, 5.0));
        assert!(set.contains(&point(TEST_MADRID.0, TEST_MADRID.1)));
        let region = set.common_region(0.1).unwrap();
        assert!(region.samples > 1);
        assert_abs_diff_eq!(region.centroid.latitude(), TEST_MADRID.0, epsilon = 1e-3);
        assert_abs_diff_eq!(region.centroid.longitude(), TEST_MADRID.1, epsilon = 1e-3);
    }

    #[test]
    fn zero_radius_disc_has_no_region() {
        let mut set = DiscSet::new();
        set.add(disc(1, 10.0, 10.0, 0.0));
        assert!(set.common_region(0.1).is_none());
    }

    #[test]
    fn deserializing_normalizes_negative_radius() {
        let json = r#"{"center":{"latitude":1.0,"longitude":2.0},"radiusKm":-5.0,"probeId":7,"rttMs":3.5}"#;
        let d: Disc = serde_json::from_str(json).unwrap();
        assert_eq!(d.radius_km(), SENTINEL_RADIUS_KM);
        assert_eq!(d.rtt_ms(), None);
        assert!(!d.is_usable());

        let kept: Disc = serde_json::from_str(
            r#"{"center":{"latitude":1.0,"longitude":2.0},"radiusKm":12.0,"probeId":7}"#,
        )
        .unwrap();
        assert_eq!(kept, Disc::new(7, point(1.0, 2.0), 12.0, None));
    }

    #[test]
    fn pairwise_overlap_without_common_point() {
        // Three discs around a triangle that each touch their neighbours but
        // leave the middle uncovered.
        let mut set = DiscSet::new();
        set.add(disc(1, 0.0, 0.0, 52.0));
        set.add(disc(2, 0.0, TEST_LON_100_KM, 52.0));
        set.add(disc(3, 0.78, TEST_LON_100_KM / 2.0, 52.0));
        assert!(set.pairwise_consistent());
        assert!(set.common_region(0.01).is_none());
    }

    #[test]
    fn serializes_as_flat_list() {
        let mut set = DiscSet::new();
        set.add(disc(1, 0.0, 0.0, 80.0));
        set.add(sentinel(2));
        let json = serde_json::to_string(&set).unwrap();
        let back: DiscSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
        assert!(json.starts_with('['));
    }

    proptest! {
        #[test]
        fn overlap_is_symmetric(
            lat1 in -89.0f64..89.0, lon1 in -179.0f64..179.0, r1 in -1.0f64..5000.0,
            lat2 in -89.0f64..89.0, lon2 in -179.0f64..179.0, r2 in -1.0f64..5000.0,
        ) {
            let a = Disc::new(1, point(lat1, lon1), r1, None);
            let b = Disc::new(2, point(lat2, lon2), r2, None);
            prop_assert_eq!(a.overlaps(&b), b.overlaps(&a));
        }

        #[test]
        fn single_disc_region_lies_inside_it(
            lat in -80.0f64..80.0, lon in -170.0f64..170.0,
            r in 0.5f64..200.0, step in 0.05f64..1.0,
        ) {
            let d = Disc::new(1, point(lat, lon), r, None);
            let mut set = DiscSet::new();
            set.add(d.clone());
            let region = set.common_region(step);
            prop_assert!(region.is_some());
            let region = region.unwrap();
            prop_assert!(distance_km(&region.centroid, d.center()) < r);
        }

        #[test]
        fn radius_strictly_increases_with_rtt(rtt in 0.001f64..1000.0, delta in 0.001f64..100.0) {
            let p = Propagation::default();
            prop_assert!(p.radius_from_rtt(rtt + delta) > p.radius_from_rtt(rtt));
        }

        #[test]
        fn ordered_radii_never_decrease(radii in proptest::collection::vec(-1.0f64..5000.0, 0..20)) {
            let mut set = DiscSet::new();
            for (i, r) in radii.iter().enumerate() {
                set.add(Disc::new(i as u64, point(0.0, 0.0), *r, None));
            }
            let ordered: Vec<f64> = set.ordered().map(|b| b.radius_km()).collect();
            prop_assert!(ordered.windows(2).all(|w| w[0] <= w[1]));
            if let Some(s) = set.smallest() {
                prop_assert!(set.valid().all(|d| d.radius_km() >= s.radius_km()));
            }
        }
    }
}
