//! Picking vantage points around a point of interest.

use std::collections::HashSet;
use std::net::IpAddr;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info};

use crate::config::HuntConfig;
use crate::error::{HuntError, Result};
use crate::geo::GeoPoint;
use crate::platform::{VantageDirectory, VantagePoint};

/// Cap on directory queries for one search.
const MAX_SEARCH_STEPS: f64 = 100_000.0;

/// Expanding-radius search over the vantage point directory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VantageSelector {
    pub initial_radius_km: f64,
    pub step_km: f64,
    pub max_radius_km: f64,
}

impl VantageSelector {
    pub fn from_config(cfg: &HuntConfig) -> Self {
        Self {
            initial_radius_km: cfg.initial_radius_km,
            step_km: cfg.radius_step_km,
            max_radius_km: cfg.max_radius_km,
        }
    }

    /// Returns `min_count` distinct vantage points near `center`, never one
    /// that answers from the target's own address.
    pub fn select<R: Rng + ?Sized>(
        &self,
        directory: &dyn VantageDirectory,
        center: &GeoPoint,
        min_count: usize,
        target: IpAddr,
        rng: &mut R,
    ) -> Result<Vec<VantagePoint>> {
        if min_count == 0 {
            return Err(HuntError::config("vantage point count must be > 0"));
        }
        if !(self.step_km > 0.0 && self.step_km.is_finite()) {
            return Err(HuntError::config("radius step must be finite and > 0"));
        }
        if !(self.initial_radius_km.is_finite() && self.max_radius_km.is_finite()) {
            return Err(HuntError::config("search radii must be finite"));
        }
        let steps = ((self.max_radius_km - self.initial_radius_km) / self.step_km)
            .floor()
            .clamp(0.0, MAX_SEARCH_STEPS) as u64;
        let mut found = 0;
        for i in 0..=steps {
            let radius = self.initial_radius_km + i as f64 * self.step_km;
            if radius > self.max_radius_km {
                break;
            }
            let usable = usable_points(directory.connected_within(center, radius)?, target);
            found = usable.len();
            if found >= min_count {
                let picked: Vec<VantagePoint> =
                    usable.choose_multiple(rng, min_count).cloned().collect();
                info!(
                    radius_km = radius,
                    candidates = found,
                    picked = ?picked.iter().map(|v| v.id).collect::<Vec<_>>(),
                    "vantage points selected"
                );
                return Ok(picked);
            }
            debug!(radius_km = radius, found, min_count, "too few vantage points, widening");
        }
        Err(HuntError::InsufficientVantagePoints {
            required: min_count,
            found,
            radius_km: self.max_radius_km,
        })
    }
}

fn usable_points(points: Vec<VantagePoint>, target: IpAddr) -> Vec<VantagePoint> {
    let mut seen = HashSet::new();
    points
        .into_iter()
        .filter(|vp| vp.address != Some(target))
        .filter(|vp| seen.insert(vp.id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::distance_km;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::cell::Cell;

    const TEST_TARGET: &str = "192.5.5.241";
    const TEST_SEED: u64 = 7;

    struct Ring {
        points: Vec<VantagePoint>,
        queries: Cell<usize>,
    }

    impl VantageDirectory for Ring {
        fn connected_within(&self, center: &GeoPoint, radius_km: f64) -> Result<Vec<VantagePoint>> {
            self.queries.set(self.queries.get() + 1);
            Ok(self
                .points
                .iter()
                .filter(|vp| distance_km(center, &vp.location) <= radius_km)
                .cloned()
                .collect())
        }

        fn probe(&self, id: u64) -> Result<Option<VantagePoint>> {
            Ok(self.points.iter().find(|vp| vp.id == id).cloned())
        }
    }

    /// Vantage points spaced one degree of longitude apart along the equator.
    fn ring(n: u64) -> Ring {
        Ring {
            points: (1..=n)
                .map(|i| VantagePoint {
                    id: i,
                    location: GeoPoint::new(0.0, i as f64).unwrap(),
                    address: Some(format!("10.0.0.{i}").parse().unwrap()),
                })
                .collect(),
            queries: Cell::new(0),
        }
    }

    fn selector(max_radius_km: f64) -> VantageSelector {
        VantageSelector {
            initial_radius_km: 20.0,
            step_km: 10.0,
            max_radius_km,
        }
    }

    fn origin() -> GeoPoint {
        GeoPoint::new(0.0, 0.0).unwrap()
    }

    #[test]
    fn widens_until_enough_points() {
        let dir = ring(10);
        let mut rng = StdRng::seed_from_u64(TEST_SEED);
        let picked = selector(2000.0)
            .select(&dir, &origin(), 3, TEST_TARGET.parse().unwrap(), &mut rng)
            .unwrap();
        assert_eq!(picked.len(), 3);
        let ids: HashSet<u64> = picked.iter().map(|v| v.id).collect();
        assert_eq!(ids, HashSet::from([1, 2, 3]));
        assert!(dir.queries.get() > 1);
    }

    #[test]
    fn never_picks_the_target() {
        let dir = ring(3);
        let mut rng = StdRng::seed_from_u64(TEST_SEED);
        let target: IpAddr = "10.0.0.2".parse().unwrap();
        let picked = selector(2000.0)
            .select(&dir, &origin(), 2, target, &mut rng)
            .unwrap();
        assert!(picked.iter().all(|vp| vp.address != Some(target)));
        assert_eq!(picked.len(), 2);
    }

    #[test]
    fn gives_up_at_the_radius_ceiling() {
        let dir = ring(2);
        let mut rng = StdRng::seed_from_u64(TEST_SEED);
        let err = selector(500.0)
            .select(&dir, &origin(), 5, TEST_TARGET.parse().unwrap(), &mut rng)
            .unwrap_err();
        match err {
            HuntError::InsufficientVantagePoints { required, found, .. } => {
                assert_eq!(required, 5);
                assert_eq!(found, 2);
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(dir.queries.get(), 49);
    }

    #[test]
    fn huge_radii_still_terminate() {
        let dir = ring(0);
        let mut rng = StdRng::seed_from_u64(TEST_SEED);
        let huge = VantageSelector {
            initial_radius_km: 1e17,
            step_km: 10.0,
            max_radius_km: 1e18,
        };
        let err = huge
            .select(&dir, &origin(), 1, TEST_TARGET.parse().unwrap(), &mut rng)
            .unwrap_err();
        assert!(matches!(err, HuntError::InsufficientVantagePoints { found: 0, .. }));
        assert_eq!(dir.queries.get(), MAX_SEARCH_STEPS as usize + 1);
    }

    #[test]
    fn non_finite_radii_are_rejected() {
        let dir = ring(2);
        let mut rng = StdRng::seed_from_u64(TEST_SEED);
        for max_radius_km in [f64::NAN, f64::INFINITY] {
            let err = selector(max_radius_km)
                .select(&dir, &origin(), 1, TEST_TARGET.parse().unwrap(), &mut rng)
                .unwrap_err();
            assert!(matches!(err, HuntError::InvalidConfig(_)), "{err}");
        }
        assert_eq!(dir.queries.get(), 0);
    }

    #[test]
    fn zero_count_is_rejected() {
        let dir = ring(2);
        let mut rng = StdRng::seed_from_u64(TEST_SEED);
        assert!(selector(100.0)
            .select(&dir, &origin(), 0, TEST_TARGET.parse().unwrap(), &mut rng)
            .is_err());
    }
}
