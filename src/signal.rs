//! Signal modeling and 3GPP-style measurement events.
//!
//! RSRP is free-space path loss plus an elevation-dependent antenna
//! gain; events are evaluated per grid tick between the serving trace
//! and every candidate trace. Hysteresis always biases toward keeping
//! the current state: a measurement sitting exactly on a threshold
//! never triggers.

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::{ConstellationProfile, RsrpThresholds};
use crate::error::{Error, Result};
use crate::propagate::{SampleGrid, Track};

/// 3GPP-style measurement-report trigger families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Neighbor becomes better than an absolute threshold.
    A4,
    /// Serving becomes worse than threshold1 while a neighbor exceeds
    /// threshold2; both conditions must hold at the same instant.
    A5,
    /// Serving moves beyond an upper distance bound while a candidate
    /// comes inside a lower one.
    D2,
}

/// One signal measurement on the shared grid.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SignalSample {
    pub satellite_id: u64,
    pub timestamp: DateTime<Utc>,
    pub rsrp_dbm: f64,
    pub elevation_deg: f64,
    pub distance_km: f64,
}

/// Grid-aligned trace; `None` where the satellite is below the horizon
/// and no measurement exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalTrace {
    pub satellite_id: u64,
    pub samples: Vec<Option<SignalSample>>,
}

impl SignalTrace {
    /// Mean RSRP over measured ticks; a trace with no measurements
    /// reports the noise floor.
    pub fn mean_rsrp_dbm(&self) -> f64 {
        let measured: Vec<f64> = self
            .samples
            .iter()
            .flatten()
            .map(|s| s.rsrp_dbm)
            .collect();
        if measured.is_empty() {
            return -140.0;
        }
        measured.iter().sum::<f64>() / measured.len() as f64
    }
}

/// A detected trigger at one grid tick. Lower `priority` is consumed
/// first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoverEvent {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub serving_satellite_id: u64,
    pub candidate_satellite_id: u64,
    pub serving_rsrp_dbm: f64,
    pub candidate_rsrp_dbm: f64,
    pub serving_distance_km: f64,
    pub candidate_distance_km: f64,
    pub priority: u8,
}

/// RSRP in dBm. FSPL uses the `32.45` constant with distance in km and
/// frequency in GHz (the formula the system under measurement uses);
/// antenna gain rises monotonically with the sine of the elevation from
/// 0 at the horizon to `max_antenna_gain_db` at zenith.
///
/// A non-positive range is a contract violation, not a data condition.
pub fn compute_rsrp(
    range_km: f64,
    elevation_deg: f64,
    frequency_ghz: f64,
    tx_power_dbm: f64,
    max_antenna_gain_db: f64,
) -> Result<f64> {
    if !(range_km > 0.0) {
        return Err(Error::InvalidGeometry(format!(
            "non-positive range: {range_km} km"
        )));
    }
    if !(frequency_ghz > 0.0) {
        return Err(Error::InvalidGeometry(format!(
            "non-positive frequency: {frequency_ghz} GHz"
        )));
    }
    let fspl_db = 20.0 * range_km.log10() + 20.0 * frequency_ghz.log10() + 32.45;
    let gain_db =
        max_antenna_gain_db * elevation_deg.clamp(0.0, 90.0).to_radians().sin();
    Ok(tx_power_dbm + gain_db - fspl_db)
}

/// Builds the grid-aligned signal trace for one track using the
/// constellation's link-budget parameters. Below-horizon ticks carry no
/// measurement.
pub fn signal_trace(track: &Track, profile: &ConstellationProfile) -> Result<SignalTrace> {
    let mut samples = Vec::with_capacity(track.samples.len());
    for s in &track.samples {
        if s.elevation_deg <= 0.0 {
            samples.push(None);
            continue;
        }
        let rsrp_dbm = compute_rsrp(
            s.range_km,
            s.elevation_deg,
            profile.frequency_ghz,
            profile.tx_power_dbm,
            profile.max_antenna_gain_db,
        )?;
        samples.push(Some(SignalSample {
            satellite_id: s.satellite_id,
            timestamp: s.timestamp,
            rsrp_dbm,
            elevation_deg: s.elevation_deg,
            distance_km: s.range_km,
        }));
    }
    Ok(SignalTrace {
        satellite_id: track.satellite_id,
        samples,
    })
}

/// Evaluates the three trigger families at every common tick. Ticks
/// where the serving satellite has no measurement are skipped, not
/// errors. Multiple events may fire per tick (one per qualifying
/// candidate); the result is ordered by timestamp, then priority.
pub fn detect_events(
    serving: &SignalTrace,
    candidates: &[SignalTrace],
    grid: &SampleGrid,
    thresholds: &RsrpThresholds,
) -> Vec<HandoverEvent> {
    let priority_of = |kind: EventKind| -> u8 {
        thresholds
            .event_priority
            .iter()
            .position(|k| *k == kind)
            .unwrap_or(thresholds.event_priority.len()) as u8
    };
    let mut events = Vec::new();

    for index in 0..grid.len {
        let Some(sv) = serving.samples.get(index).copied().flatten() else {
            continue;
        };
        let serving_bad =
            sv.rsrp_dbm + thresholds.hysteresis_db < thresholds.a5_threshold1_dbm;
        let serving_far = sv.distance_km - thresholds.distance_hysteresis_km
            > thresholds.d2_serving_distance_km;

        for trace in candidates {
            if trace.satellite_id == serving.satellite_id {
                continue;
            }
            let Some(cs) = trace.samples.get(index).copied().flatten() else {
                continue;
            };
            let adjusted =
                cs.rsrp_dbm + thresholds.offset_db - thresholds.hysteresis_db;
            let candidate_good_a4 = adjusted > thresholds.a4_threshold_dbm;
            let candidate_good_a5 = adjusted > thresholds.a5_threshold2_dbm;
            let candidate_near = cs.distance_km + thresholds.distance_hysteresis_km
                < thresholds.d2_candidate_distance_km;

            let mut push = |kind: EventKind| {
                events.push(HandoverEvent {
                    kind,
                    timestamp: sv.timestamp,
                    serving_satellite_id: sv.satellite_id,
                    candidate_satellite_id: cs.satellite_id,
                    serving_rsrp_dbm: sv.rsrp_dbm,
                    candidate_rsrp_dbm: cs.rsrp_dbm,
                    serving_distance_km: sv.distance_km,
                    candidate_distance_km: cs.distance_km,
                    priority: priority_of(kind),
                });
            };
            if serving_bad && candidate_good_a5 {
                push(EventKind::A5);
            }
            if candidate_good_a4 {
                push(EventKind::A4);
            }
            if serving_far && candidate_near {
                push(EventKind::D2);
            }
        }
    }

    events.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then(a.priority.cmp(&b.priority))
            .then(a.candidate_satellite_id.cmp(&b.candidate_satellite_id))
    });
    debug!(
        "detected {} events from {} candidate traces",
        events.len(),
        candidates.len()
    );
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn grid(len: usize) -> SampleGrid {
        SampleGrid {
            start: Utc.with_ymd_and_hms(2025, 4, 10, 0, 0, 0).unwrap(),
            interval_s: 30,
            len,
        }
    }

    fn trace(id: u64, g: &SampleGrid, rsrp: &[Option<f64>], distance_km: f64) -> SignalTrace {
        let samples = rsrp
            .iter()
            .enumerate()
            .map(|(i, r)| {
                r.map(|rsrp_dbm| SignalSample {
                    satellite_id: id,
                    timestamp: g.timestamp(i),
                    rsrp_dbm,
                    elevation_deg: 45.0,
                    distance_km,
                })
            })
            .collect();
        SignalTrace { satellite_id: id, samples }
    }

    #[test]
    fn rsrp_reference_value() {
        // 43 dBm tx, 12 GHz, 550 km, zenith, 15 dB peak gain:
        // FSPL = 20 log10(550) + 20 log10(12) + 32.45 = 108.84 dB
        let rsrp = compute_rsrp(550.0, 90.0, 12.0, 43.0, 15.0).unwrap();
        assert!((rsrp - (-50.840_878_710_837_37)).abs() < 1e-9, "rsrp {rsrp}");
        // bit-for-bit reproducible
        let again = compute_rsrp(550.0, 90.0, 12.0, 43.0, 15.0).unwrap();
        assert_eq!(rsrp.to_bits(), again.to_bits());
    }

    #[test]
    fn gain_rises_monotonically_with_elevation() {
        let mut last = f64::NEG_INFINITY;
        for elevation in [0.0, 15.0, 30.0, 45.0, 60.0, 75.0, 90.0] {
            let rsrp = compute_rsrp(550.0, elevation, 12.0, 43.0, 15.0).unwrap();
            assert!(rsrp > last);
            last = rsrp;
        }
    }

    #[test]
    fn non_positive_range_is_contract_violation() {
        assert!(matches!(
            compute_rsrp(0.0, 45.0, 12.0, 43.0, 15.0),
            Err(Error::InvalidGeometry(_))
        ));
        assert!(matches!(
            compute_rsrp(-10.0, 45.0, 12.0, 43.0, 15.0),
            Err(Error::InvalidGeometry(_))
        ));
    }

    #[test]
    fn a4_fires_only_above_threshold_plus_hysteresis() {
        let g = grid(1);
        let th = RsrpThresholds::default(); // A4 -110 dBm, 3 dB hysteresis
        let serving = trace(1, &g, &[Some(-100.0)], 800.0);

        // exactly on the boundary: -107 + 0 - 3 = -110, not > -110
        let boundary = trace(2, &g, &[Some(-107.0)], 800.0);
        assert!(detect_events(&serving, &[boundary], &g, &th).is_empty());

        let above = trace(2, &g, &[Some(-106.9)], 800.0);
        let events = detect_events(&serving, &[above], &g, &th);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::A4);
        assert_eq!(events[0].candidate_satellite_id, 2);
    }

    #[test]
    fn a5_requires_both_conditions_simultaneously() {
        let g = grid(1);
        let th = RsrpThresholds::default();

        // serving bad only: no A5
        let serving = trace(1, &g, &[Some(-125.0)], 800.0);
        let weak_candidate = trace(2, &g, &[Some(-115.0)], 800.0);
        let events = detect_events(&serving, &[weak_candidate], &g, &th);
        assert!(events.iter().all(|e| e.kind != EventKind::A5));

        // both: A5 fires, and the emitted event satisfies both conditions
        let strong_candidate = trace(2, &g, &[Some(-100.0)], 800.0);
        let events = detect_events(&serving, &[strong_candidate], &g, &th);
        let a5: Vec<_> = events.iter().filter(|e| e.kind == EventKind::A5).collect();
        assert_eq!(a5.len(), 1);
        let e = a5[0];
        assert!(e.serving_rsrp_dbm + th.hysteresis_db < th.a5_threshold1_dbm);
        assert!(
            e.candidate_rsrp_dbm + th.offset_db - th.hysteresis_db
                > th.a5_threshold2_dbm
        );
    }

    #[test]
    fn d2_uses_distance_hysteresis_toward_stability() {
        let g = grid(1);
        let th = RsrpThresholds::default(); // 1500/1200 km, 50 km hysteresis
        let candidate_rsrp = Some(-130.0); // too weak for A4/A5

        // serving at exactly threshold + hysteresis does not trigger
        let serving = trace(1, &g, &[Some(-130.0)], 1550.0);
        let near = trace(2, &g, &[candidate_rsrp], 1100.0);
        assert!(detect_events(&serving, std::slice::from_ref(&near), &g, &th).is_empty());

        let serving = trace(1, &g, &[Some(-130.0)], 1551.0);
        let events = detect_events(&serving, std::slice::from_ref(&near), &g, &th);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::D2);
    }

    #[test]
    fn invisible_serving_tick_is_skipped() {
        let g = grid(3);
        let th = RsrpThresholds::default();
        let serving = trace(1, &g, &[None, Some(-100.0), None], 800.0);
        let candidate = trace(2, &g, &[Some(-90.0), Some(-90.0), Some(-90.0)], 800.0);
        let events = detect_events(&serving, &[candidate], &g, &th);
        // only the middle tick is evaluated
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timestamp, g.timestamp(1));
    }

    #[test]
    fn priority_order_is_configurable() {
        let g = grid(1);
        let mut th = RsrpThresholds::default();
        // conditions that fire A5 and A4 together
        let serving = trace(1, &g, &[Some(-125.0)], 800.0);
        let candidate = trace(2, &g, &[Some(-100.0)], 800.0);
        let events = detect_events(&serving, std::slice::from_ref(&candidate), &g, &th);
        assert_eq!(events[0].kind, EventKind::A5);

        th.event_priority = [EventKind::A4, EventKind::A5, EventKind::D2];
        let events = detect_events(&serving, std::slice::from_ref(&candidate), &g, &th);
        assert_eq!(events[0].kind, EventKind::A4);
    }

    #[test]
    fn events_stay_inside_the_sampled_window() {
        let g = grid(4);
        let th = RsrpThresholds::default();
        let serving = trace(1, &g, &[Some(-125.0); 4], 800.0);
        let candidate = trace(2, &g, &[Some(-100.0); 4], 800.0);
        for e in detect_events(&serving, &[candidate], &g, &th) {
            assert!(g.contains(e.timestamp));
        }
    }
}
