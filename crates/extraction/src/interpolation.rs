//! Point interpolation over a [`GridIndex`].

use std::fmt;

use icon_common::GeoPoint;
use serde::{Deserialize, Serialize};

use crate::grid_index::GridIndex;

/// How a value is derived from the surrounding grid points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationMethod {
    /// Value of the single nearest grid point.
    Nearest,
    /// Inverse-distance weighting over the k nearest grid points.
    #[serde(rename = "idw", alias = "inverse_distance")]
    InverseDistance,
}

impl InterpolationMethod {
    /// Parse from string (case-insensitive). Unknown names fall back to
    /// inverse-distance weighting.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "nearest" | "nn" => Self::Nearest,
            _ => Self::InverseDistance,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nearest => "nearest",
            Self::InverseDistance => "idw",
        }
    }
}

impl fmt::Display for InterpolationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Upper bound on the IDW neighbour count accepted from configuration or a
/// request.
pub const MAX_NEIGHBOURS: usize = 64;

/// Interpolation settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InterpolationConfig {
    pub method: InterpolationMethod,
    /// k for inverse-distance weighting (ignored for nearest).
    pub neighbours: usize,
    /// Distance exponent: weight = 1 / distance^power.
    pub power: f64,
    /// Points whose nearest grid point is farther than this are out of domain.
    pub max_distance_km: f64,
    /// Distance under which a query point counts as sitting on a grid point.
    pub epsilon_km: f64,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            method: InterpolationMethod::InverseDistance,
            neighbours: 4,
            power: 2.0,
            max_distance_km: 25.0,
            epsilon_km: 1e-6,
        }
    }
}

impl InterpolationConfig {
    pub fn nearest() -> Self {
        Self {
            method: InterpolationMethod::Nearest,
            neighbours: 1,
            ..Self::default()
        }
    }

    pub fn inverse_distance(neighbours: usize) -> Self {
        Self {
            method: InterpolationMethod::InverseDistance,
            neighbours,
            ..Self::default()
        }
    }

    pub fn with_max_distance_km(mut self, max_distance_km: f64) -> Self {
        self.max_distance_km = max_distance_km;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(1..=MAX_NEIGHBOURS).contains(&self.neighbours) {
            return Err(format!(
                "neighbours must be between 1 and {}, got {}",
                MAX_NEIGHBOURS, self.neighbours
            ));
        }
        if !(self.power.is_finite() && self.power > 0.0) {
            return Err("power must be a positive number".to_string());
        }
        if !(self.max_distance_km.is_finite() && self.max_distance_km > 0.0) {
            return Err("max_distance_km must be a positive number".to_string());
        }
        if !(self.epsilon_km.is_finite() && self.epsilon_km >= 0.0) {
            return Err("epsilon_km must be >= 0".to_string());
        }
        Ok(())
    }

    fn k(&self) -> usize {
        match self.method {
            InterpolationMethod::Nearest => 1,
            InterpolationMethod::InverseDistance => self.neighbours.max(1),
        }
    }
}

/// Interpolated value at one point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointValue {
    Value(f32),
    /// Too far from the grid, or touching an undefined source value.
    OutOfDomain,
}

impl PointValue {
    pub fn value(&self) -> Option<f32> {
        match self {
            PointValue::Value(v) => Some(*v),
            PointValue::OutOfDomain => None,
        }
    }
}

/// Stateless interpolator; cheap to copy per request.
#[derive(Debug, Clone, Copy, Default)]
pub struct Interpolator {
    config: InterpolationConfig,
}

impl Interpolator {
    pub fn new(config: InterpolationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &InterpolationConfig {
        &self.config
    }

    /// Value of the field `values` (index-aligned with `grid`) at `point`.
    pub fn interpolate(&self, values: &[f32], grid: &GridIndex, point: GeoPoint) -> PointValue {
        let neighbours = grid.nearest(point, self.config.k());
        let Some(nearest) = neighbours.first() else {
            return PointValue::OutOfDomain;
        };

        if nearest.distance_km > self.config.max_distance_km {
            return PointValue::OutOfDomain;
        }

        if self.config.method == InterpolationMethod::Nearest
            || nearest.distance_km <= self.config.epsilon_km
        {
            return defined(values, nearest.index);
        }

        let mut weighted_sum = 0.0f64;
        let mut weight_total = 0.0f64;
        for neighbour in &neighbours {
            let value = match defined(values, neighbour.index) {
                PointValue::Value(v) => v as f64,
                PointValue::OutOfDomain => return PointValue::OutOfDomain,
            };
            let weight = 1.0 / neighbour.distance_km.powf(self.config.power);
            weighted_sum += weight * value;
            weight_total += weight;
        }

        if weight_total > 0.0 && weight_total.is_finite() {
            PointValue::Value((weighted_sum / weight_total) as f32)
        } else {
            defined(values, nearest.index)
        }
    }

    /// [`Interpolator::interpolate`] for a list of points, order preserved.
    pub fn interpolate_many(
        &self,
        values: &[f32],
        grid: &GridIndex,
        points: &[GeoPoint],
    ) -> Vec<PointValue> {
        points
            .iter()
            .map(|point| self.interpolate(values, grid, *point))
            .collect()
    }
}

fn defined(values: &[f32], index: usize) -> PointValue {
    match values.get(index) {
        Some(v) if v.is_finite() => PointValue::Value(*v),
        _ => PointValue::OutOfDomain,
    }
}
