//! Geographic query points.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

/// A WGS84 point in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Check the point is usable for a lookup.
    ///
    /// Latitude must lie in [-90, 90]; longitude in [-180, 360) so that both
    /// the -180..180 and 0..360 conventions are accepted.
    pub fn validate(&self) -> Result<(), CatalogError> {
        if !self.lat.is_finite() || !self.lon.is_finite() {
            return Err(CatalogError::InvalidPoint(format!(
                "non-finite coordinate ({}, {})",
                self.lat, self.lon
            )));
        }
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(CatalogError::InvalidPoint(format!(
                "latitude {} outside [-90, 90]",
                self.lat
            )));
        }
        if !(-180.0..360.0).contains(&self.lon) {
            return Err(CatalogError::InvalidPoint(format!(
                "longitude {} outside [-180, 360)",
                self.lon
            )));
        }
        Ok(())
    }

    /// Same point with longitude folded into [-180, 180).
    pub fn normalized(&self) -> Self {
        let mut lon = (self.lon + 180.0).rem_euclid(360.0) - 180.0;
        if lon >= 180.0 {
            lon -= 360.0;
        }
        Self { lat: self.lat, lon }
    }
}

/// A point along a route, optionally pinned to its own valid time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimedPoint {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

impl TimedPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon, time: None }
    }

    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }
}

impl From<GeoPoint> for TimedPoint {
    fn from(point: GeoPoint) -> Self {
        Self::new(point.lat, point.lon)
    }
}

impl From<(f64, f64)> for GeoPoint {
    fn from((lat, lon): (f64, f64)) -> Self {
        Self { lat, lon }
    }
}
