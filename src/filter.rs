//! Geographic and constellation filtering.
//!
//! Stage 2 narrows the catalog to candidates that can plausibly serve
//! the observer: an inclination gate (no overpass without inclination
//! exceeding the site latitude), a RAAN/longitude relevance band, a
//! weighted 0-100 fit score against the constellation profile, and a
//! closed set of selection strategies. Constellations are a hard
//! partition; an empty per-constellation result is a valid outcome.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::{ConstellationProfile, Observer};
use crate::propagate::{EARTH_RADIUS_KM, Track};
use crate::tle::ElementSet;

/// Filtering aggressiveness. A closed set on purpose: strategies differ
/// only in their score threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterStrategy {
    Relaxed,
    Standard,
    Strict,
}

impl FilterStrategy {
    pub fn score_threshold(self) -> f64 {
        match self {
            FilterStrategy::Relaxed => 40.0,
            FilterStrategy::Standard => 60.0,
            FilterStrategy::Strict => 75.0,
        }
    }
}

/// A stage-2 survivor: element set, fit score and the propagated
/// trajectory over the run grid.
#[derive(Debug)]
pub struct FilteredCandidate {
    pub element: ElementSet,
    pub score: f64,
    pub track: Track,
}

/// Keeps satellites that can geometrically pass over the observer and
/// whose orbital plane is longitude-relevant. Pure predicate, so
/// re-filtering a filtered set with the same parameters is a no-op.
pub fn filter_by_geography(
    sets: Vec<ElementSet>,
    observer: &Observer,
    raan_band_deg: f64,
) -> Vec<ElementSet> {
    let before = sets.len();
    let kept: Vec<ElementSet> = sets
        .into_iter()
        .filter(|s| {
            s.inclination_deg > observer.latitude_deg.abs()
                && raan_within_band(s, observer, raan_band_deg)
        })
        .collect();
    debug!("geographic filter kept {}/{before}", kept.len());
    kept
}

/// RAAN vs. observer longitude, checked against both the ascending and
/// descending node and widened by the earth rotation accumulated over
/// one orbital period. Loose by construction: this gate only discards
/// clearly irrelevant planes.
fn raan_within_band(set: &ElementSet, observer: &Observer, band_deg: f64) -> bool {
    let lon = observer.longitude_deg.rem_euclid(360.0);
    let ascending = circular_distance_deg(set.raan_deg, lon);
    let descending = circular_distance_deg(set.raan_deg + 180.0, lon);
    let smear = 360.0 * set.period_minutes() / 1440.0;
    ascending.min(descending) <= band_deg + smear
}

fn circular_distance_deg(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    d.min(360.0 - d)
}

/// Weighted fit score in [0, 100]: inclination fit, altitude fit, orbit
/// shape (eccentricity) fit and expected pass frequency, weighted per
/// constellation profile.
pub fn score_candidate(set: &ElementSet, profile: &ConstellationProfile) -> f64 {
    let w = &profile.score_weights;

    let inclination = (100.0
        - (set.inclination_deg - profile.target_inclination_deg).abs() * 2.0)
        .max(0.0);
    let altitude = (100.0
        - (set.mean_altitude_km() - profile.target_altitude_km).abs() * 0.1)
        .max(0.0);
    // near-circular orbits score full marks; e >= 0.02 scores zero
    let shape = (1.0 - (set.eccentricity / 0.02).min(1.0)) * 100.0;
    // LEO mean motions run up to ~16 rev/day; more revolutions mean
    // more passes over the site per day
    let pass_frequency = (set.mean_motion_rev_day / 16.0).clamp(0.0, 1.0) * 100.0;

    (w.inclination * inclination
        + w.altitude * altitude
        + w.shape * shape
        + w.pass_frequency * pass_frequency)
        .clamp(0.0, 100.0)
}

/// Expected number of simultaneously visible satellites, from the
/// spherical-cap fraction of the orbital shell above the observer's
/// elevation mask.
pub fn expected_simultaneous_visible(
    candidate_count: usize,
    altitude_km: f64,
    elevation_threshold_deg: f64,
) -> f64 {
    let r = EARTH_RADIUS_KM + altitude_km;
    let e = elevation_threshold_deg.to_radians();
    let beta = ((EARTH_RADIUS_KM / r) * e.cos()).acos() - e;
    let cap_fraction = (1.0 - beta.cos()) / 2.0;
    candidate_count as f64 * cap_fraction
}

/// Picks the strategy from the expected simultaneous visibility against
/// the target band: plenty of headroom allows a strict cut, a starved
/// constellation gets the relaxed one.
pub fn choose_strategy(expected_visible: f64, band: (usize, usize)) -> FilterStrategy {
    let upper = band.1 as f64;
    if expected_visible >= upper * 2.0 {
        FilterStrategy::Strict
    } else if expected_visible >= upper {
        FilterStrategy::Standard
    } else {
        FilterStrategy::Relaxed
    }
}

/// Applies the strategy threshold to scored candidates, guaranteeing at
/// least `floor` survivors whenever any candidates exist. Returns the
/// survivors sorted by descending score.
pub fn select_by_strategy<T>(
    mut scored: Vec<(T, f64)>,
    strategy: FilterStrategy,
    floor: usize,
) -> Vec<(T, f64)> {
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let threshold = strategy.score_threshold();
    let passing = scored.iter().filter(|(_, s)| *s >= threshold).count();
    let keep = passing.max(floor).min(scored.len());
    info!(
        "strategy {strategy:?}: {passing} above threshold {threshold}, keeping {keep} of {}",
        scored.len()
    );
    scored.truncate(keep);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tle::{load, CatalogBlock, DataSource};

    fn iss_set() -> ElementSet {
        let text = "ISS (ZARYA)\n\
            1 25544U 98067A   25278.49802050  .00011384  00000+0  20935-3 0  9990\n\
            2 25544  51.6327 120.3420 0000884 206.2421 153.8523 15.49697304532279\n";
        let blocks = [CatalogBlock {
            constellation: None,
            text,
        }];
        let mut catalog = load(&blocks, DataSource::Live).unwrap();
        catalog
            .constellations
            .remove("other")
            .unwrap()
            .into_iter()
            .next()
            .unwrap()
    }

    #[test]
    fn inclination_gate_excludes_high_latitude_sites() {
        let set = iss_set();
        let tromso = Observer {
            latitude_deg: 69.6,
            longitude_deg: 18.9,
            altitude_m: 0.0,
        };
        let kept = filter_by_geography(vec![set], &tromso, 120.0);
        assert!(kept.is_empty());
    }

    #[test]
    fn filtering_is_idempotent() {
        let set = iss_set();
        let observer = Observer::NTPU;
        let once = filter_by_geography(vec![set], &observer, 120.0);
        let ids: Vec<u64> = once.iter().map(|s| s.satellite_id).collect();
        let twice = filter_by_geography(once, &observer, 120.0);
        let ids_again: Vec<u64> = twice.iter().map(|s| s.satellite_id).collect();
        assert_eq!(ids, ids_again);
    }

    #[test]
    fn score_is_bounded_and_rewards_profile_fit() {
        let set = iss_set();
        let mut profile = ConstellationProfile::starlink();
        let score = score_candidate(&set, &profile);
        assert!((0.0..=100.0).contains(&score));

        // a profile matching the ISS orbit exactly must score higher
        profile.target_inclination_deg = set.inclination_deg;
        profile.target_altitude_km = set.mean_altitude_km();
        let matched = score_candidate(&set, &profile);
        assert!(matched > score);
        assert!(matched <= 100.0);
    }

    #[test]
    fn strategy_tracks_expected_visibility() {
        let band = (10, 15);
        assert_eq!(choose_strategy(40.0, band), FilterStrategy::Strict);
        assert_eq!(choose_strategy(16.0, band), FilterStrategy::Standard);
        assert_eq!(choose_strategy(4.0, band), FilterStrategy::Relaxed);
    }

    #[test]
    fn selection_guarantees_floor() {
        let scored = vec![("a", 90.0), ("b", 30.0), ("c", 20.0)];
        let kept = select_by_strategy(scored, FilterStrategy::Strict, 2);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].0, "a");
        assert_eq!(kept[1].0, "b");
    }

    #[test]
    fn selection_of_empty_set_stays_empty() {
        let kept: Vec<((), f64)> =
            select_by_strategy(Vec::new(), FilterStrategy::Relaxed, 5);
        assert!(kept.is_empty());
    }

    #[test]
    fn cap_fraction_grows_with_altitude() {
        let low = expected_simultaneous_visible(100, 550.0, 5.0);
        let high = expected_simultaneous_visible(100, 1200.0, 5.0);
        assert!(high > low);
        assert!(low > 0.0);
    }
}
