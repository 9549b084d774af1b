//! The serializable output bundle: the sole contract with external
//! consumers (rendering, network decision layer, persistence).
//!
//! Output always carries a diagnostics section enumerating dropped
//! satellites and parse failures, so a consumer can tell "degraded but
//! complete" apart from "nothing happened".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Observer;
use crate::error::Result;
use crate::filter::FilterStrategy;
use crate::pool::{ComplianceReport, PoolSolution};
use crate::signal::HandoverEvent;
use crate::tle::{DataSource, ParseFailure};

/// A satellite dropped mid-run, with the reason it was dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DroppedSatellite {
    pub satellite_id: u64,
    pub name: String,
    pub constellation: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunDiagnostics {
    pub parse_failures: Vec<ParseFailure>,
    pub dropped_satellites: Vec<DroppedSatellite>,
    /// Constellations whose candidate set came out empty; a valid
    /// low-quality outcome, not an error.
    pub empty_constellations: Vec<String>,
    /// Catalog constellations with no configured profile.
    pub unconfigured_constellations: Vec<String>,
}

/// Everything produced for one constellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstellationReport {
    pub constellation: String,
    pub candidate_count: usize,
    pub strategy: FilterStrategy,
    pub solution: PoolSolution,
    /// The achieved per-tick visible-count series (mirrors
    /// `solution.visible_counts` for consumers that only read this).
    pub visible_counts: Vec<usize>,
    pub events: Vec<HandoverEvent>,
    pub compliance: ComplianceReport,
}

/// The full run output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    pub observer: Observer,
    pub data_source: DataSource,
    pub start_time: DateTime<Utc>,
    pub sampling_interval_s: u32,
    pub sample_count: usize,
    pub constellations: Vec<ConstellationReport>,
    pub diagnostics: RunDiagnostics,
}

impl RunReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
