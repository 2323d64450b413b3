//! Picks the message for a resolved field out of a decoded run file.

use grib_decoder::MessageMetadata;
use icon_common::{Level, ModelRun, ResolvedField};

use crate::error::{ExtractError, Result};

/// Message selection by parameter short-name, level and forecast step.
///
/// Matching is exact. If a malformed file carries the same field twice the
/// first occurrence wins, so repeated queries always read the same message.
pub struct MessageSelector;

impl MessageSelector {
    /// Index (into `messages`) of the message holding `field` for `run`.
    ///
    /// Messages whose step is known and differs from the run's step are
    /// ignored. Messages without a decodable step are accepted, since a
    /// per-step fetch only ever contains that one step.
    pub fn select(
        messages: &[MessageMetadata],
        field: &ResolvedField,
        run: &ModelRun,
    ) -> Result<usize> {
        let short_name = field.parameter.short_name.as_str();
        let step = run.step();

        let mut candidates = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_parameter(short_name))
            .filter(|(_, m)| m.step.map_or(true, |s| s == step))
            .peekable();

        if candidates.peek().is_none() {
            return Err(ExtractError::ParameterUnavailable {
                parameter: short_name.to_string(),
                run: run.to_string(),
            });
        }

        let mut available: Vec<Level> = Vec::new();
        for (position, message) in candidates {
            match message.level {
                Some(level) if level == field.level => return Ok(position),
                Some(level) => {
                    if !available.contains(&level) {
                        available.push(level);
                    }
                }
                None => {}
            }
        }

        Err(ExtractError::LevelUnavailable {
            parameter: short_name.to_string(),
            level: field.level.to_string(),
            run: run.to_string(),
            available: if available.is_empty() {
                "none".to_string()
            } else {
                available
                    .iter()
                    .map(Level::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            },
        })
    }
}
