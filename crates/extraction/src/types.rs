//! Extraction results.

use std::fmt;

use chrono::{DateTime, Utc};
use icon_common::{GeoPoint, Level, ModelRun};
use serde::Serialize;

use crate::interpolation::{InterpolationMethod, PointValue};

/// Outcome for a single query point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PointStatus {
    Ok,
    PointOutsideGrid,
    ParameterUnavailableForRun,
}

impl PointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PointStatus::Ok => "ok",
            PointStatus::PointOutsideGrid => "point-outside-grid",
            PointStatus::ParameterUnavailableForRun => "parameter-unavailable-for-run",
        }
    }
}

impl fmt::Display for PointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One (point, value, status) triple.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointResult {
    pub point: GeoPoint,
    pub value: Option<f32>,
    pub status: PointStatus,
}

impl PointResult {
    pub(crate) fn from_value(point: GeoPoint, value: PointValue) -> Self {
        match value {
            PointValue::Value(v) => Self {
                point,
                value: Some(v),
                status: PointStatus::Ok,
            },
            PointValue::OutOfDomain => Self {
                point,
                value: None,
                status: PointStatus::PointOutsideGrid,
            },
        }
    }

    pub(crate) fn unavailable(point: GeoPoint) -> Self {
        Self {
            point,
            value: None,
            status: PointStatus::ParameterUnavailableForRun,
        }
    }
}

/// Result of one field query over a list of points.
///
/// `points` has exactly one entry per requested point, in request order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionResult {
    pub run: ModelRun,
    pub parameter: String,
    pub level: Level,
    pub units: String,
    pub interpolation: InterpolationMethod,
    pub points: Vec<PointResult>,
}

impl ExtractionResult {
    /// Values in point order; `None` where the point has no value.
    pub fn values(&self) -> Vec<Option<f32>> {
        self.points.iter().map(|p| p.value).collect()
    }

    /// Number of points with status `ok`.
    pub fn ok_count(&self) -> usize {
        self.points
            .iter()
            .filter(|p| p.status == PointStatus::Ok)
            .count()
    }
}

/// One point of a route, extracted at its own step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutePointResult {
    pub point: GeoPoint,
    pub step: u32,
    pub valid_time: DateTime<Utc>,
    pub value: Option<f32>,
    pub status: PointStatus,
}

/// Result of extracting one field along a route of timed points.
///
/// Every point comes from the same run; `points` keeps request order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteResult {
    pub model: String,
    pub reference_time: DateTime<Utc>,
    /// Step of points without their own time.
    pub step: u32,
    pub parameter: String,
    pub level: Level,
    pub units: String,
    pub interpolation: InterpolationMethod,
    pub points: Vec<RoutePointResult>,
}

impl RouteResult {
    pub fn values(&self) -> Vec<Option<f32>> {
        self.points.iter().map(|p| p.value).collect()
    }

    /// Distinct steps the route touched, ascending.
    pub fn steps(&self) -> Vec<u32> {
        let mut steps: Vec<u32> = self.points.iter().map(|p| p.step).collect();
        steps.sort_unstable();
        steps.dedup();
        steps
    }
}
