//! TLE catalog loading.
//!
//! A catalog is one or more text blocks of two-line element sets, each
//! optionally preceded by a name line. Malformed records are collected
//! as diagnostics and never abort the batch; only a catalog with zero
//! valid records overall is an error.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::propagate::{EARTH_RADIUS_KM, MU_EARTH_KM3_S2};

/// Where the element data came from. Cached fallback is surfaced in the
/// output bundle, never substituted silently.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DataSource {
    Live,
    Cached { as_of: DateTime<Utc> },
}

/// One input text block, optionally pre-tagged with its constellation.
/// Untagged blocks fall back to name-prefix classification.
#[derive(Debug, Clone, Copy)]
pub struct CatalogBlock<'a> {
    pub constellation: Option<&'a str>,
    pub text: &'a str,
}

/// A parsed element set. Immutable once parsed; refreshes replace the
/// whole catalog, they never mutate records in place.
#[derive(Debug)]
pub struct ElementSet {
    pub satellite_id: u64,
    pub name: String,
    pub constellation: String,
    pub epoch: NaiveDateTime,
    pub inclination_deg: f64,
    pub raan_deg: f64,
    pub eccentricity: f64,
    pub argument_of_perigee_deg: f64,
    pub mean_anomaly_deg: f64,
    pub mean_motion_rev_day: f64,
    pub drag_term: f64,
    pub(crate) elements: sgp4::Elements,
}

impl ElementSet {
    pub fn semi_major_axis_km(&self) -> f64 {
        let n_rad_s = self.mean_motion_rev_day * std::f64::consts::TAU / 86_400.0;
        (MU_EARTH_KM3_S2 / (n_rad_s * n_rad_s)).cbrt()
    }

    pub fn mean_altitude_km(&self) -> f64 {
        self.semi_major_axis_km() - EARTH_RADIUS_KM
    }

    pub fn period_minutes(&self) -> f64 {
        1440.0 / self.mean_motion_rev_day
    }

    /// Orbital phase angle used for pool dispersion: argument of
    /// perigee plus mean anomaly at epoch, wrapped to [0, 360).
    pub fn phase_deg(&self) -> f64 {
        (self.argument_of_perigee_deg + self.mean_anomaly_deg).rem_euclid(360.0)
    }
}

/// A record that failed to parse; kept for the diagnostics section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseFailure {
    /// First line of the offending record, truncated.
    pub record: String,
    pub message: String,
}

/// Parsed catalog partitioned by constellation tag.
#[derive(Debug)]
pub struct Catalog {
    pub constellations: BTreeMap<String, Vec<ElementSet>>,
    pub source: DataSource,
    pub parse_failures: Vec<ParseFailure>,
}

impl Catalog {
    pub fn total_satellites(&self) -> usize {
        self.constellations.values().map(Vec::len).sum()
    }
}

/// Parses all blocks into a catalog. Per-record failures land in
/// `parse_failures`; zero valid records overall is `EmptyCatalog`.
pub fn load(blocks: &[CatalogBlock<'_>], source: DataSource) -> Result<Catalog> {
    let mut constellations: BTreeMap<String, Vec<ElementSet>> = BTreeMap::new();
    let mut parse_failures = Vec::new();

    for block in blocks {
        for record in records(block.text) {
            match parse_record(&record) {
                Ok(mut set) => {
                    if let Some(tag) = block.constellation {
                        set.constellation = tag.to_ascii_lowercase();
                    }
                    debug!(
                        "loaded {} ({}) into constellation {}",
                        set.satellite_id, set.name, set.constellation
                    );
                    constellations
                        .entry(set.constellation.clone())
                        .or_default()
                        .push(set);
                }
                Err(err) => {
                    warn!("dropping malformed record: {err}");
                    let mut snippet = if record.line1.is_empty() {
                        record.name.clone().unwrap_or_default()
                    } else {
                        record.line1.clone()
                    };
                    snippet.truncate(32);
                    parse_failures.push(ParseFailure {
                        record: snippet,
                        message: err.to_string(),
                    });
                }
            }
        }
    }

    if constellations.is_empty() {
        return Err(Error::EmptyCatalog);
    }
    Ok(Catalog {
        constellations,
        source,
        parse_failures,
    })
}

struct RawRecord {
    name: Option<String>,
    line1: String,
    line2: String,
}

/// Splits a text block into raw records: a `1 `/`2 ` line pair with an
/// optional preceding name line. Stray lines become records with an
/// empty pair so the failure is reported rather than skipped silently.
fn records(text: &str) -> Vec<RawRecord> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .collect();
    let mut out = Vec::new();
    let mut pending_name: Option<String> = None;
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if line.starts_with("1 ") {
            if i + 1 < lines.len() && lines[i + 1].starts_with("2 ") {
                out.push(RawRecord {
                    name: pending_name.take(),
                    line1: line.to_string(),
                    line2: lines[i + 1].to_string(),
                });
                i += 2;
                continue;
            }
            out.push(RawRecord {
                name: pending_name.take(),
                line1: line.to_string(),
                line2: String::new(),
            });
            i += 1;
            continue;
        }
        if line.starts_with("2 ") {
            // orphan second line
            out.push(RawRecord {
                name: pending_name.take(),
                line1: String::new(),
                line2: line.to_string(),
            });
            i += 1;
            continue;
        }
        // a second name line in a row means the previous one never got
        // its element pair
        if let Some(orphan) = pending_name.replace(line.trim().to_string()) {
            out.push(RawRecord {
                name: Some(orphan),
                line1: String::new(),
                line2: String::new(),
            });
        }
        i += 1;
    }
    if let Some(orphan) = pending_name {
        out.push(RawRecord {
            name: Some(orphan),
            line1: String::new(),
            line2: String::new(),
        });
    }
    out
}

fn parse_record(record: &RawRecord) -> Result<ElementSet> {
    let context = record
        .name
        .clone()
        .unwrap_or_else(|| record.line1.chars().take(18).collect());
    if record.line1.is_empty() || record.line2.is_empty() {
        return Err(Error::Parse {
            context,
            message: "incomplete two-line pair".to_string(),
        });
    }
    let elements = sgp4::Elements::from_tle(
        record.name.clone(),
        record.line1.as_bytes(),
        record.line2.as_bytes(),
    )
    .map_err(|e| Error::Parse {
        context: context.clone(),
        message: e.to_string(),
    })?;

    let name = elements
        .object_name
        .clone()
        .unwrap_or_else(|| format!("SAT-{}", elements.norad_id));
    Ok(ElementSet {
        satellite_id: elements.norad_id,
        constellation: classify(&name),
        epoch: elements.datetime,
        inclination_deg: elements.inclination,
        raan_deg: elements.right_ascension,
        eccentricity: elements.eccentricity,
        argument_of_perigee_deg: elements.argument_of_perigee,
        mean_anomaly_deg: elements.mean_anomaly,
        mean_motion_rev_day: elements.mean_motion,
        drag_term: elements.drag_term,
        name,
        elements,
    })
}

/// Constellation tag from the catalog name. Unknown operators share the
/// "other" bucket; a satellite belongs to exactly one constellation.
fn classify(name: &str) -> String {
    let upper = name.to_ascii_uppercase();
    if upper.starts_with("STARLINK") {
        "starlink".to_string()
    } else if upper.starts_with("ONEWEB") {
        "oneweb".to_string()
    } else if upper.starts_with("KUIPER") {
        "kuiper".to_string()
    } else {
        "other".to_string()
    }
}
