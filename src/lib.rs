//! Satellite pool planning for a fixed ground observer.
//!
//! Given TLE catalogs for one or more LEO constellations, the pipeline
//! decides which compact subset of each constellation is worth actively
//! tracking and handing off between over a rolling time window:
//!
//! 1. load and propagate orbital element sets (SGP4, via the `sgp4`
//!    crate) over a shared sampling grid;
//! 2. narrow the catalog to geographically plausible candidates per
//!    constellation and score them against the constellation profile;
//! 3. model per-sample RSRP and detect 3GPP-style A4/A5/D2 measurement
//!    events against the serving satellite;
//! 4. select a coverage-compliant, phase-dispersed pool per
//!    constellation with a simulated-annealing optimizer.
//!
//! Stages run strictly in that order; each constellation is processed
//! independently (no cross-constellation handover is modeled). The
//! result is one serializable [`report::RunReport`].

use std::sync::Once;

use chrono::{DateTime, Utc};
use log::{info, warn};

pub mod config;
pub mod error;
pub mod filter;
pub mod pool;
pub mod propagate;
pub mod report;
pub mod signal;
pub mod tle;

pub use config::{ConstellationProfile, Observer, OptimizerParams, RsrpThresholds, RunConfig};
pub use error::{Error, Result};
pub use filter::{FilterStrategy, FilteredCandidate};
pub use pool::{AnnealPhase, Annealer, ComplianceReport, PoolCandidate, PoolSolution};
pub use propagate::{SampleGrid, StateSample, Track};
pub use report::{ConstellationReport, RunDiagnostics, RunReport};
pub use signal::{EventKind, HandoverEvent, SignalSample, SignalTrace};
pub use tle::{Catalog, CatalogBlock, DataSource, ElementSet};

static INIT_LOGGER: Once = Once::new();

/// One-shot `env_logger` initialization for binaries and tests; the
/// library itself only emits through the `log` facade.
pub fn init_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::Builder::from_default_env().try_init();
    });
}

/// Runs the full pipeline over the given catalog blocks.
///
/// Per-record and per-satellite failures are isolated into the report's
/// diagnostics; only structurally invalid configuration (or a catalog
/// with zero valid records) aborts before any stage executes.
pub fn run(
    run_config: &RunConfig,
    blocks: &[CatalogBlock<'_>],
    source: DataSource,
) -> Result<RunReport> {
    run_config.validate()?;
    let mut catalog = tle::load(blocks, source)?;
    if let DataSource::Cached { as_of } = catalog.source {
        warn!("running from cached catalog data as of {as_of}");
    }

    let start = run_config.start_time.unwrap_or_else(|| newest_epoch(&catalog));
    let grid = SampleGrid::new(start, run_config.run_duration_s, run_config.sampling_interval_s);
    info!(
        "run window: {} .. {} ({} samples at {} s)",
        grid.start,
        grid.end(),
        grid.len,
        grid.interval_s
    );

    let mut diagnostics = RunDiagnostics {
        parse_failures: std::mem::take(&mut catalog.parse_failures),
        ..RunDiagnostics::default()
    };
    let mut constellations = Vec::with_capacity(run_config.constellations.len());

    for profile in &run_config.constellations {
        let sets = catalog
            .constellations
            .remove(&profile.name)
            .unwrap_or_default();
        info!(
            "constellation {}: {} catalog satellites",
            profile.name,
            sets.len()
        );

        // stage 2a: geographic narrowing on raw elements
        let kept =
            filter::filter_by_geography(sets, &run_config.observer, run_config.raan_band_deg);

        // stage 1b: propagate survivors; divergent orbits are dropped,
        // not fatal
        let mut scored: Vec<(FilteredCandidate, f64)> = Vec::with_capacity(kept.len());
        for set in kept {
            match propagate::propagate(
                &set,
                &run_config.observer,
                &grid,
                profile.elevation_threshold_deg,
            ) {
                Ok(track) => {
                    let score = filter::score_candidate(&set, profile);
                    scored.push((
                        FilteredCandidate {
                            element: set,
                            score,
                            track,
                        },
                        score,
                    ));
                }
                Err(err) => {
                    warn!("dropping satellite: {err}");
                    diagnostics.dropped_satellites.push(report::DroppedSatellite {
                        satellite_id: set.satellite_id,
                        name: set.name.clone(),
                        constellation: profile.name.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        // stage 2b: score-threshold selection
        let expected = filter::expected_simultaneous_visible(
            scored.len(),
            profile.target_altitude_km,
            profile.elevation_threshold_deg,
        );
        let strategy = filter::choose_strategy(expected, profile.target_visible_band);
        let selected = filter::select_by_strategy(scored, strategy, profile.target_visible_band.1);
        let candidates: Vec<FilteredCandidate> =
            selected.into_iter().map(|(c, _)| c).collect();
        if candidates.is_empty() {
            diagnostics.empty_constellations.push(profile.name.clone());
        }

        // stage 3: signal traces and measurement events; serving is the
        // highest-scored candidate
        let mut traces: Vec<SignalTrace> = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            traces.push(signal::signal_trace(&candidate.track, profile)?);
        }
        let events = match traces.first() {
            Some(serving) => signal::detect_events(serving, &traces, &grid, &run_config.rsrp),
            None => Vec::new(),
        };

        // stage 4: pool optimization and independent compliance check
        let pool_candidates: Vec<PoolCandidate> = candidates
            .iter()
            .zip(&traces)
            .map(|(c, t)| PoolCandidate::from_parts(c, t))
            .collect();
        let solution = pool::plan(
            &profile.name,
            &pool_candidates,
            profile.target_visible_band,
            &run_config.optimizer,
            grid.len,
        );
        let compliance = pool::verify_coverage(
            &solution,
            &pool_candidates,
            profile.target_visible_band,
            &grid,
        );

        constellations.push(ConstellationReport {
            constellation: profile.name.clone(),
            candidate_count: candidates.len(),
            strategy,
            visible_counts: solution.visible_counts.clone(),
            events,
            compliance,
            solution,
        });
    }

    for leftover in catalog.constellations.keys() {
        diagnostics.unconfigured_constellations.push(leftover.clone());
    }

    Ok(RunReport {
        generated_at: Utc::now(),
        observer: run_config.observer,
        data_source: catalog.source,
        start_time: grid.start,
        sampling_interval_s: grid.interval_s,
        sample_count: grid.len,
        constellations,
        diagnostics,
    })
}

/// Newest element epoch across the catalog; the default window start
/// when the configuration does not pin one.
fn newest_epoch(catalog: &Catalog) -> DateTime<Utc> {
    let newest = catalog
        .constellations
        .values()
        .flatten()
        .map(|set| set.epoch)
        .max()
        .unwrap_or_default();
    DateTime::from_naive_utc_and_offset(newest, Utc)
}
