//! Run configuration, threaded explicitly through every stage.
//!
//! There is no ambient global state in this crate: the pipeline receives
//! one `RunConfig` and passes the relevant pieces down. Structurally
//! invalid configuration aborts the run before any stage executes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::signal::EventKind;

/// Fixed ground observer (geodetic, WGS-84).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observer {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_m: f64,
}

impl Observer {
    /// NTPU campus reference site used throughout the measurement runs.
    pub const NTPU: Observer = Observer {
        latitude_deg: 24.944_166_7,
        longitude_deg: 121.371_388_9,
        altitude_m: 24.0,
    };
}

/// Weights for the candidate score's four fit terms. Each term is in
/// [0, 100]; weights should sum to roughly 1 so the total stays there.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub inclination: f64,
    pub altitude: f64,
    pub shape: f64,
    pub pass_frequency: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            inclination: 0.35,
            altitude: 0.25,
            shape: 0.15,
            pass_frequency: 0.25,
        }
    }
}

/// Per-constellation targets and link-budget parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstellationProfile {
    /// Lowercase constellation tag; the hard partition key through every
    /// stage.
    pub name: String,
    pub target_inclination_deg: f64,
    pub target_altitude_km: f64,
    pub elevation_threshold_deg: f64,
    /// (min, max) simultaneously visible satellites the pool must hold.
    pub target_visible_band: (usize, usize),
    pub score_weights: ScoreWeights,
    pub tx_power_dbm: f64,
    pub frequency_ghz: f64,
    pub max_antenna_gain_db: f64,
}

impl ConstellationProfile {
    pub fn starlink() -> Self {
        Self {
            name: "starlink".to_string(),
            target_inclination_deg: 53.0,
            target_altitude_km: 550.0,
            elevation_threshold_deg: 5.0,
            target_visible_band: (10, 15),
            score_weights: ScoreWeights::default(),
            tx_power_dbm: 43.0,
            frequency_ghz: 12.0,
            max_antenna_gain_db: 15.0,
        }
    }

    pub fn oneweb() -> Self {
        Self {
            name: "oneweb".to_string(),
            target_inclination_deg: 87.4,
            target_altitude_km: 1200.0,
            elevation_threshold_deg: 10.0,
            target_visible_band: (3, 6),
            score_weights: ScoreWeights::default(),
            tx_power_dbm: 40.0,
            frequency_ghz: 12.25,
            max_antenna_gain_db: 18.0,
        }
    }
}

/// Measurement-event thresholds (3GPP TS 38.331 style).
///
/// Hysteresis is always applied so that crossing a threshold becomes
/// harder, never easier: a satellite sitting exactly on a boundary does
/// not flicker between triggered and untriggered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RsrpThresholds {
    /// A4: candidate RSRP + offset - hysteresis must exceed this.
    pub a4_threshold_dbm: f64,
    /// A5 condition 1: serving RSRP + hysteresis must fall below this.
    pub a5_threshold1_dbm: f64,
    /// A5 condition 2: candidate RSRP + offset - hysteresis must exceed this.
    pub a5_threshold2_dbm: f64,
    /// D2: serving distance - hysteresis must exceed this.
    pub d2_serving_distance_km: f64,
    /// D2: candidate distance + hysteresis must fall below this.
    pub d2_candidate_distance_km: f64,
    pub hysteresis_db: f64,
    pub distance_hysteresis_km: f64,
    /// Measurement offset added to candidate RSRP (A4/A5).
    pub offset_db: f64,
    /// Consumption priority, most urgent first. A5 > A4 > D2 per the
    /// source documentation, but this is a policy knob, not a hard law.
    pub event_priority: [EventKind; 3],
}

impl Default for RsrpThresholds {
    fn default() -> Self {
        Self {
            a4_threshold_dbm: -110.0,
            a5_threshold1_dbm: -120.0,
            a5_threshold2_dbm: -110.0,
            d2_serving_distance_km: 1500.0,
            d2_candidate_distance_km: 1200.0,
            hysteresis_db: 3.0,
            distance_hysteresis_km: 50.0,
            offset_db: 0.0,
            event_priority: [EventKind::A5, EventKind::A4, EventKind::D2],
        }
    }
}

/// Simulated-annealing schedule and budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerParams {
    pub initial_temperature: f64,
    /// Geometric cooling factor, strictly inside (0, 1).
    pub cooling_rate: f64,
    /// Temperature floor; dropping below it means convergence.
    pub min_temperature: f64,
    pub max_iterations: u32,
    /// Iterations without best-cost improvement before convergence.
    pub stagnation_limit: u32,
    /// Fixed seed for reproducible runs; `None` seeds from entropy.
    pub random_seed: Option<u64>,
    /// Minimum orbital phase separation between any two pool members.
    pub min_phase_separation_deg: f64,
}

impl Default for OptimizerParams {
    fn default() -> Self {
        Self {
            initial_temperature: 1000.0,
            cooling_rate: 0.995,
            min_temperature: 0.1,
            max_iterations: 10_000,
            stagnation_limit: 1_000,
            random_seed: None,
            min_phase_separation_deg: 15.0,
        }
    }
}

/// Complete configuration for one pipeline invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub observer: Observer,
    /// Start of the sampling window; defaults to the newest element
    /// epoch in the catalog when absent.
    pub start_time: Option<DateTime<Utc>>,
    pub sampling_interval_s: u32,
    pub run_duration_s: u32,
    /// Half-width of the RAAN/longitude relevance band for the
    /// geographic pre-filter.
    pub raan_band_deg: f64,
    pub constellations: Vec<ConstellationProfile>,
    pub rsrp: RsrpThresholds,
    pub optimizer: OptimizerParams,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            observer: Observer::NTPU,
            start_time: None,
            sampling_interval_s: 30,
            run_duration_s: 2 * 3600,
            raan_band_deg: 120.0,
            constellations: vec![
                ConstellationProfile::starlink(),
                ConstellationProfile::oneweb(),
            ],
            rsrp: RsrpThresholds::default(),
            optimizer: OptimizerParams::default(),
        }
    }
}

impl RunConfig {
    /// Structural validation, run once before any stage executes.
    pub fn validate(&self) -> Result<()> {
        let obs = &self.observer;
        if !obs.latitude_deg.is_finite()
            || !obs.longitude_deg.is_finite()
            || !obs.altitude_m.is_finite()
        {
            return Err(Error::InvalidConfig(
                "observer coordinates must be finite".to_string(),
            ));
        }
        if obs.latitude_deg.abs() > 90.0 {
            return Err(Error::InvalidConfig(format!(
                "observer latitude out of range: {}",
                obs.latitude_deg
            )));
        }
        if obs.longitude_deg.abs() > 180.0 {
            return Err(Error::InvalidConfig(format!(
                "observer longitude out of range: {}",
                obs.longitude_deg
            )));
        }
        if self.sampling_interval_s == 0 {
            return Err(Error::InvalidConfig(
                "sampling interval must be positive".to_string(),
            ));
        }
        if !(self.raan_band_deg > 0.0 && self.raan_band_deg <= 180.0) {
            return Err(Error::InvalidConfig(format!(
                "raan band must be in (0, 180]: {}",
                self.raan_band_deg
            )));
        }
        if self.constellations.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one constellation profile is required".to_string(),
            ));
        }
        for profile in &self.constellations {
            if profile.name.is_empty() {
                return Err(Error::InvalidConfig(
                    "constellation name must not be empty".to_string(),
                ));
            }
            let (lo, hi) = profile.target_visible_band;
            if lo == 0 || lo > hi {
                return Err(Error::InvalidConfig(format!(
                    "constellation {}: visible band ({}, {}) is degenerate",
                    profile.name, lo, hi
                )));
            }
            if profile.elevation_threshold_deg < 0.0
                || profile.elevation_threshold_deg >= 90.0
            {
                return Err(Error::InvalidConfig(format!(
                    "constellation {}: elevation threshold out of range: {}",
                    profile.name, profile.elevation_threshold_deg
                )));
            }
        }
        let opt = &self.optimizer;
        if !(opt.cooling_rate > 0.0 && opt.cooling_rate < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "cooling rate must be in (0, 1): {}",
                opt.cooling_rate
            )));
        }
        if opt.initial_temperature <= 0.0 || opt.min_temperature <= 0.0 {
            return Err(Error::InvalidConfig(
                "temperatures must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(RunConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_interval_rejected() {
        let mut cfg = RunConfig::default();
        cfg.sampling_interval_s = 0;
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn bad_observer_rejected() {
        let mut cfg = RunConfig::default();
        cfg.observer.latitude_deg = f64::NAN;
        assert!(cfg.validate().is_err());

        cfg.observer.latitude_deg = 91.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn inverted_band_rejected() {
        let mut cfg = RunConfig::default();
        cfg.constellations[0].target_visible_band = (15, 10);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn degenerate_cooling_rejected() {
        let mut cfg = RunConfig::default();
        cfg.optimizer.cooling_rate = 1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = RunConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: RunConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.sampling_interval_s, cfg.sampling_interval_s);
        assert_eq!(back.constellations.len(), cfg.constellations.len());
    }
}
