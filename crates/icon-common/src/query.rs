//! Field queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::level::Level;

/// Which model run a query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunSelector {
    /// Newest run the fetch source reports as published.
    #[default]
    Latest,
    /// An explicit reference time.
    At(DateTime<Utc>),
}

/// A request for one named field of a model run.
///
/// The parameter short-name is checked against the model catalog before any
/// fetch or decode; `level` falls back to the parameter's default level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldQuery {
    pub parameter: String,
    #[serde(default)]
    pub level: Option<Level>,
    #[serde(default)]
    pub run: RunSelector,
    /// Forecast step in hours; `None` means the analysis step 0.
    #[serde(default)]
    pub step: Option<u32>,
    /// Valid time to extract at. The step becomes the valid time minus the
    /// run's reference time and must lie on the model's step grid.
    #[serde(default)]
    pub valid_time: Option<DateTime<Utc>>,
}

impl FieldQuery {
    pub fn new(parameter: impl Into<String>) -> Self {
        Self {
            parameter: parameter.into(),
            level: None,
            run: RunSelector::Latest,
            step: None,
            valid_time: None,
        }
    }

    pub fn at_level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }

    pub fn at_run(mut self, reference_time: DateTime<Utc>) -> Self {
        self.run = RunSelector::At(reference_time);
        self
    }

    pub fn latest(mut self) -> Self {
        self.run = RunSelector::Latest;
        self
    }

    pub fn at_step(mut self, step: u32) -> Self {
        self.step = Some(step);
        self
    }

    pub fn valid_at(mut self, valid_time: DateTime<Utc>) -> Self {
        self.valid_time = Some(valid_time);
        self
    }

    /// Same query at another step, dropping any valid time.
    pub fn with_step(&self, step: u32) -> Self {
        Self {
            step: Some(step),
            valid_time: None,
            ..self.clone()
        }
    }

    pub fn step_or_default(&self) -> u32 {
        self.step.unwrap_or(0)
    }
}
