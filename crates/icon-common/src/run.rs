//! Model run identity and the run publication schedule.

use std::fmt;

use chrono::{DateTime, Duration, DurationRound, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

/// One forecast step of one model run.
///
/// Immutable once built: the reference time is checked to be hour-aligned
/// and the value is used as the run cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ModelRun {
    model: String,
    reference_time: DateTime<Utc>,
    step: u32,
}

impl ModelRun {
    /// Create a run identifier. `step` is in hours for every ICON model.
    pub fn new(
        model: impl Into<String>,
        reference_time: DateTime<Utc>,
        step: u32,
    ) -> Result<Self, CatalogError> {
        if reference_time.minute() != 0
            || reference_time.second() != 0
            || reference_time.nanosecond() != 0
        {
            return Err(CatalogError::InvalidRun(format!(
                "reference time {} is not hour-aligned",
                reference_time.to_rfc3339()
            )));
        }

        let model = model.into();
        if model.is_empty() {
            return Err(CatalogError::InvalidRun("empty model name".to_string()));
        }

        Ok(Self {
            model,
            reference_time,
            step,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn reference_time(&self) -> DateTime<Utc> {
        self.reference_time
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    /// Time the forecast step is valid for.
    pub fn valid_time(&self) -> DateTime<Utc> {
        self.reference_time + Duration::hours(self.step as i64)
    }

    /// Compact run id as used in DWD file names, e.g. `2024050212`.
    pub fn run_id(&self) -> String {
        self.reference_time.format("%Y%m%d%H").to_string()
    }

    /// Run hour as a two-digit string (`00`, `03`, ...).
    pub fn run_hour(&self) -> String {
        self.reference_time.format("%H").to_string()
    }

    /// Same run at a different forecast step.
    pub fn with_step(&self, step: u32) -> Self {
        Self {
            model: self.model.clone(),
            reference_time: self.reference_time,
            step,
        }
    }
}

impl fmt::Display for ModelRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}+{:03}", self.model, self.run_id(), self.step)
    }
}

/// When runs of a model start and when they become complete upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSchedule {
    /// Hours between consecutive runs (3 for ICON-EU/D2, 6 for global).
    pub cadence_hours: u32,
    /// Hours after the reference time at which a run is fully published.
    pub publication_delay_hours: u32,
}

impl RunSchedule {
    pub fn new(cadence_hours: u32, publication_delay_hours: u32) -> Self {
        Self {
            cadence_hours: cadence_hours.max(1),
            publication_delay_hours,
        }
    }

    /// Newest reference time that is fully published at `now`.
    ///
    /// For ICON-D2 (3-hourly, ~2 h delay) this gives 00 from 02 UTC, 03 from
    /// 05 UTC, ..., 21 from 23 UTC, and the previous day's 21 run between
    /// 00 and 02 UTC.
    pub fn latest_published_run(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let available = now - Duration::hours(self.publication_delay_hours as i64);
        let hour_start = available
            .duration_trunc(Duration::hours(1))
            .unwrap_or(available);
        let over = hour_start.hour() % self.cadence_hours.max(1);
        hour_start - Duration::hours(over as i64)
    }

    /// Reference time one cadence before `reference_time`.
    pub fn previous_run(&self, reference_time: DateTime<Utc>) -> DateTime<Utc> {
        reference_time - Duration::hours(self.cadence_hours.max(1) as i64)
    }

    /// The `count` newest published reference times, newest first.
    pub fn candidate_runs(&self, now: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut runs = Vec::with_capacity(count);
        let mut current = self.latest_published_run(now);
        for _ in 0..count {
            runs.push(current);
            current = self.previous_run(current);
        }
        runs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_model_run_requires_hour_alignment() {
        assert!(ModelRun::new("icon-eu", at(2024, 5, 2, 12, 0), 6).is_ok());
        assert!(ModelRun::new("icon-eu", at(2024, 5, 2, 12, 30), 6).is_err());
        assert!(ModelRun::new("", at(2024, 5, 2, 12, 0), 6).is_err());
    }

    #[test]
    fn test_model_run_formatting() {
        let run = ModelRun::new("icon-eu", at(2024, 5, 2, 12, 0), 6).unwrap();
        assert_eq!(run.run_id(), "2024050212");
        assert_eq!(run.run_hour(), "12");
        assert_eq!(run.to_string(), "icon-eu/2024050212+006");
        assert_eq!(run.valid_time(), at(2024, 5, 2, 18, 0));
    }

    #[test]
    fn test_with_step_keeps_run() {
        let run = ModelRun::new("icon-d2", at(2024, 5, 2, 3, 0), 0).unwrap();
        let later = run.with_step(12);
        assert_eq!(later.reference_time(), run.reference_time());
        assert_eq!(later.step(), 12);
        assert_ne!(later, run);
    }

    #[test]
    fn test_latest_published_run_three_hourly() {
        let schedule = RunSchedule::new(3, 2);

        assert_eq!(schedule.latest_published_run(at(2024, 5, 2, 2, 0)), at(2024, 5, 2, 0, 0));
        assert_eq!(schedule.latest_published_run(at(2024, 5, 2, 4, 59)), at(2024, 5, 2, 0, 0));
        assert_eq!(schedule.latest_published_run(at(2024, 5, 2, 5, 0)), at(2024, 5, 2, 3, 0));
        assert_eq!(schedule.latest_published_run(at(2024, 5, 2, 23, 10)), at(2024, 5, 2, 21, 0));
        // Before 02 UTC the previous day's last run is the newest complete one.
        assert_eq!(schedule.latest_published_run(at(2024, 5, 2, 1, 0)), at(2024, 5, 1, 21, 0));
    }

    #[test]
    fn test_latest_published_run_six_hourly() {
        let schedule = RunSchedule::new(6, 4);
        assert_eq!(schedule.latest_published_run(at(2024, 5, 2, 11, 0)), at(2024, 5, 2, 6, 0));
        assert_eq!(schedule.latest_published_run(at(2024, 5, 2, 9, 59)), at(2024, 5, 2, 0, 0));
    }

    #[test]
    fn test_candidate_runs_newest_first() {
        let schedule = RunSchedule::new(3, 2);
        let runs = schedule.candidate_runs(at(2024, 5, 2, 8, 0), 3);
        assert_eq!(
            runs,
            vec![at(2024, 5, 2, 6, 0), at(2024, 5, 2, 3, 0), at(2024, 5, 2, 0, 0)]
        );
    }
}
