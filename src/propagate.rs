//! SGP4 propagation and the topocentric transform.
//!
//! Positions come out of the `sgp4` crate in TEME (km), are rotated into
//! ECEF through GMST, and reduced against the observer to elevation,
//! azimuth and slant range. All satellites in a run share one sampling
//! grid so their samples are comparable at the same instant.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::Observer;
use crate::error::{Error, Result};
use crate::tle::ElementSet;

pub(crate) const EARTH_RADIUS_KM: f64 = 6378.137; // WGS-84 equatorial
pub(crate) const EARTH_FLATTENING: f64 = 1.0 / 298.257_223_563; // WGS-84
pub(crate) const MU_EARTH_KM3_S2: f64 = 398_600.4418;

/// The run's shared sampling grid. `len` samples at `interval_s`
/// spacing, starting at `start`; a zero-duration window is one sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleGrid {
    pub start: DateTime<Utc>,
    pub interval_s: u32,
    pub len: usize,
}

impl SampleGrid {
    pub fn new(start: DateTime<Utc>, duration_s: u32, interval_s: u32) -> Self {
        debug_assert!(interval_s > 0);
        Self {
            start,
            interval_s,
            len: (duration_s / interval_s) as usize + 1,
        }
    }

    pub fn timestamp(&self, index: usize) -> DateTime<Utc> {
        self.start + Duration::seconds(index as i64 * self.interval_s as i64)
    }

    pub fn timestamps(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        (0..self.len).map(|i| self.timestamp(i))
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.timestamp(self.len - 1)
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t <= self.end()
    }
}

/// One propagated state, reduced to the observer's sky.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StateSample {
    pub satellite_id: u64,
    pub timestamp: DateTime<Utc>,
    pub position_eci_km: [f64; 3],
    pub velocity_eci_km_s: [f64; 3],
    pub elevation_deg: f64,
    pub azimuth_deg: f64,
    pub range_km: f64,
    pub is_visible: bool,
}

/// Per-satellite trajectory over the run grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub satellite_id: u64,
    pub name: String,
    pub constellation: String,
    pub samples: Vec<StateSample>,
}

impl Track {
    pub fn visible_fraction(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let visible = self.samples.iter().filter(|s| s.is_visible).count();
        visible as f64 / self.samples.len() as f64
    }

    pub fn max_elevation_deg(&self) -> f64 {
        self.samples
            .iter()
            .map(|s| s.elevation_deg)
            .fold(-90.0, f64::max)
    }
}

/// Propagates one element set over the grid. Any non-finite or otherwise
/// degenerate model output (decayed orbit, out-of-range eccentricity)
/// maps to `PropagationDiverged`; the caller drops the satellite and the
/// batch continues.
pub fn propagate(
    set: &ElementSet,
    observer: &Observer,
    grid: &SampleGrid,
    elevation_threshold_deg: f64,
) -> Result<Track> {
    let diverged = |reason: String| Error::PropagationDiverged {
        satellite_id: set.satellite_id,
        reason,
    };
    let constants =
        sgp4::Constants::from_elements(&set.elements).map_err(|e| diverged(e.to_string()))?;
    let obs_ecef = observer_ecef(observer);

    let mut samples = Vec::with_capacity(grid.len);
    for t in grid.timestamps() {
        let minutes = set
            .elements
            .datetime_to_minutes_since_epoch(&t.naive_utc())
            .map_err(|e| diverged(e.to_string()))?;
        let prediction = constants
            .propagate(minutes)
            .map_err(|e| diverged(e.to_string()))?;
        let finite = prediction.position.iter().all(|v| v.is_finite())
            && prediction.velocity.iter().all(|v| v.is_finite());
        if !finite {
            return Err(diverged(format!("non-finite state at {t}")));
        }
        let (elevation_deg, azimuth_deg, range_km) =
            topocentric(observer, obs_ecef, prediction.position, t);
        samples.push(StateSample {
            satellite_id: set.satellite_id,
            timestamp: t,
            position_eci_km: prediction.position,
            velocity_eci_km_s: prediction.velocity,
            elevation_deg,
            azimuth_deg,
            range_km,
            is_visible: elevation_deg >= elevation_threshold_deg,
        });
    }
    debug!(
        "propagated {}: {} samples, max elevation {:.1}",
        set.satellite_id,
        samples.len(),
        samples
            .iter()
            .map(|s| s.elevation_deg)
            .fold(-90.0, f64::max)
    );
    Ok(Track {
        satellite_id: set.satellite_id,
        name: set.name.clone(),
        constellation: set.constellation.clone(),
        samples,
    })
}

/// Topocentric reduction of a TEME position: elevation is in [-90, 90],
/// azimuth in [0, 360). Numerically stable at zenith (the horizontal
/// component vanishes there and azimuth falls back to 0).
pub fn elevation_azimuth_range(
    observer: &Observer,
    position_eci_km: [f64; 3],
    t: DateTime<Utc>,
) -> (f64, f64, f64) {
    topocentric(observer, observer_ecef(observer), position_eci_km, t)
}

fn topocentric(
    observer: &Observer,
    obs_ecef: (f64, f64, f64),
    r_teme: [f64; 3],
    t: DateTime<Utc>,
) -> (f64, f64, f64) {
    let theta = gmst_deg(t).to_radians();
    let (ct, st) = (theta.cos(), theta.sin());

    // TEME (≈ECI) → ECEF
    let x_ecef = ct * r_teme[0] + st * r_teme[1];
    let y_ecef = -st * r_teme[0] + ct * r_teme[1];
    let z_ecef = r_teme[2];

    let (ox, oy, oz) = obs_ecef;
    let rx = x_ecef - ox;
    let ry = y_ecef - oy;
    let rz = z_ecef - oz;
    let range = (rx * rx + ry * ry + rz * rz).sqrt();

    let lat = observer.latitude_deg.to_radians();
    let lon = observer.longitude_deg.to_radians();
    let (sin_lat, cos_lat) = (lat.sin(), lat.cos());
    let (sin_lon, cos_lon) = (lon.sin(), lon.cos());

    // ECEF → local ENU
    let east = -sin_lon * rx + cos_lon * ry;
    let north = -sin_lat * cos_lon * rx - sin_lat * sin_lon * ry + cos_lat * rz;
    let up = cos_lat * cos_lon * rx + cos_lat * sin_lon * ry + sin_lat * rz;

    let elevation = (up / range).clamp(-1.0, 1.0).asin().to_degrees();
    let horizontal = (east * east + north * north).sqrt();
    let azimuth = if horizontal < 1e-9 {
        0.0
    } else {
        unwind_deg(east.atan2(north).to_degrees())
    };
    (elevation, azimuth, range)
}

pub(crate) fn observer_ecef(observer: &Observer) -> (f64, f64, f64) {
    // WGS-84
    let a = EARTH_RADIUS_KM;
    let f = EARTH_FLATTENING;
    let e2 = f * (2.0 - f);

    let lat = observer.latitude_deg.to_radians();
    let lon = observer.longitude_deg.to_radians();

    let sin_lat = lat.sin();
    let cos_lat = lat.cos();

    let n = a / (1.0 - e2 * sin_lat * sin_lat).sqrt();
    let alt_km = observer.altitude_m / 1000.0;

    let x = (n + alt_km) * cos_lat * lon.cos();
    let y = (n + alt_km) * cos_lat * lon.sin();
    let z = (n * (1.0 - e2) + alt_km) * sin_lat;

    (x, y, z)
}

/// GMST in degrees. The JDN term is noon-based, hence the -0.5 before
/// adding the day fraction.
pub(crate) fn gmst_deg(t: DateTime<Utc>) -> f64 {
    let (year, month, day) = (t.year(), t.month(), t.day());
    let second =
        t.second() as f64 + (t.timestamp_subsec_micros() as f64) / 1.0e6;

    let a = ((14 - month as i32) / 12) as i32;
    let y = year + 4800 - a;
    let m = month as i32 + 12 * a - 3;
    let jdn =
        day as i32 + (153 * m + 2) / 5 + 365 * y + y / 4 - y / 100 + y / 400 - 32045;
    let dayfrac =
        (t.hour() as f64 + (t.minute() as f64) / 60.0 + second / 3600.0) / 24.0;
    let jd = jdn as f64 - 0.5 + dayfrac;
    let d = jd - 2451545.0;
    let tc = d / 36525.0;
    let gmst =
        280.46061837 + 360.98564736629 * d + 0.000387933 * tc * tc - tc * tc * tc / 38710000.0;
    unwind_deg(gmst)
}

pub(crate) fn unwind_deg(mut x: f64) -> f64 {
    x %= 360.0;
    if x < 0.0 {
        x += 360.0;
    }
    x
}
