//! GRIB2 decoding backed by the `grib` crate.

use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use icon_common::{GribIdentity, Level, ModelDefinition};
use tracing::{debug, warn};

use crate::decoder::{DecodedFile, GribDecoder};
use crate::error::{DecodeError, DecodeResult};
use crate::message::{normalize_missing, MessageMetadata};

/// Decoder for real ICON GRIB2 files.
///
/// `open` walks every submessage header once. Values and coordinates are
/// decoded lazily, one message at a time, by re-reading the retained
/// immutable byte buffer.
///
/// ICON global files use the unstructured icosahedral grid (template 101),
/// whose coordinates are not stored in the GRIB file itself. Supply them
/// with [`GribCrateDecoder::with_grid_override`] (cell centres from the DWD
/// grid file, in message point order).
#[derive(Debug, Clone, Default)]
pub struct GribCrateDecoder {
    model: Option<ModelDefinition>,
    grid_override: Option<Arc<Vec<(f64, f64)>>>,
}

impl GribCrateDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder that names messages with `model`'s parameter table.
    pub fn for_model(model: ModelDefinition) -> Self {
        Self {
            model: Some(model),
            grid_override: None,
        }
    }

    /// Coordinates to use when a message's grid template carries none.
    pub fn with_grid_override(mut self, grid: Arc<Vec<(f64, f64)>>) -> Self {
        self.grid_override = Some(grid);
        self
    }
}

impl GribDecoder for GribCrateDecoder {
    fn open(&self, data: Bytes) -> DecodeResult<Arc<dyn DecodedFile>> {
        let grib2 = grib::from_reader(Cursor::new(data.clone()))
            .map_err(|e| DecodeError::Parse(e.to_string()))?;

        let mut messages = Vec::new();
        for (index, (_, submessage)) in grib2.iter().enumerate() {
            let prod_def = submessage.prod_def();
            let (category, number) = match (prod_def.parameter_category(), prod_def.parameter_number()) {
                (Some(category), Some(number)) => (category, number),
                _ => {
                    return Err(DecodeError::Parse(format!(
                        "message {} has no parameter category/number",
                        index
                    )))
                }
            };
            let grib = GribIdentity::new(submessage.indicator().discipline, category, number);

            let level = prod_def.fixed_surfaces().and_then(|(first, _)| {
                Level::from_grib_surface(
                    first.surface_type,
                    scaled_surface_value(first.scale_factor, first.scaled_value),
                )
            });

            let step = step_hours(prod_def);
            if step.is_none() {
                debug!(index, template = prod_def.prod_tmpl_num(), "GRIB message has no whole-hour step");
            }

            let short_name = self
                .model
                .as_ref()
                .and_then(|model| model.identify(grib, level.as_ref()))
                .map(|p| p.short_name.clone());

            if short_name.is_none() {
                debug!(index, ?grib, ?level, "GRIB message not in parameter table");
            }

            messages.push(MessageMetadata {
                index,
                grib,
                short_name,
                level,
                step,
                num_points: submessage.grid_def().num_points() as usize,
            });
        }

        if messages.is_empty() {
            return Err(DecodeError::Parse("stream contains no GRIB2 messages".to_string()));
        }

        Ok(Arc::new(GribCrateFile {
            data,
            messages,
            grid_override: self.grid_override.clone(),
        }))
    }
}

/// Section 4 payload offsets (octet number minus 6) of the first time range
/// specification's unit, for the statistically processed templates 4.8 and
/// 4.11. The 4-octet interval length follows the unit.
const TIME_RANGE_UNIT_4_8: usize = 43;
const TIME_RANGE_UNIT_4_11: usize = 46;

/// Forecast step in hours at which a message's data is valid.
///
/// Instantaneous products carry the step as their forecast time. For
/// statistically processed products (ICON's `tot_prec`, `aswdir_s`, ...) the
/// forecast time is the start of the accumulation or averaging interval, so
/// the step is the end of that interval. Steps that are not whole hours give
/// `None`.
fn step_hours(prod_def: &grib::ProdDefinition) -> Option<u32> {
    let forecast_time = prod_def.forecast_time()?;
    let unit = match forecast_time.unit {
        grib::Name(unit) => u8::from(unit),
        grib::Num(code) => code,
    };
    let mut seconds = unit_seconds(unit)? * u64::from(forecast_time.value);

    let time_range_unit = match prod_def.prod_tmpl_num() {
        8 => Some(TIME_RANGE_UNIT_4_8),
        11 => Some(TIME_RANGE_UNIT_4_11),
        _ => None,
    };
    if let Some(offset) = time_range_unit {
        let range: Vec<u8> = prod_def.iter().skip(offset).take(5).copied().collect();
        if range.len() < 5 {
            return None;
        }
        let length = u32::from_be_bytes([range[1], range[2], range[3], range[4]]);
        seconds += unit_seconds(range[0])? * u64::from(length);
    }

    if seconds % 3600 != 0 {
        return None;
    }
    u32::try_from(seconds / 3600).ok()
}

/// Length in seconds of a GRIB2 code table 4.4 time unit. Calendar units
/// (month and longer) have no fixed length.
fn unit_seconds(unit: u8) -> Option<u64> {
    match unit {
        0 => Some(60),
        1 => Some(3_600),
        2 => Some(86_400),
        10 => Some(3 * 3_600),
        11 => Some(6 * 3_600),
        12 => Some(12 * 3_600),
        13 => Some(1),
        _ => None,
    }
}

/// GRIB2 stores fixed surface values as `scaled_value * 10^-scale_factor`.
/// All-ones fields mean "missing" and come back as 0.
fn scaled_surface_value(scale_factor: i8, scaled_value: i32) -> f64 {
    if scale_factor == i8::MIN || scale_factor == -127 || scaled_value == i32::MIN {
        return 0.0;
    }
    scaled_value as f64 * 10f64.powi(-(scale_factor as i32))
}

struct GribCrateFile {
    data: Bytes,
    messages: Vec<MessageMetadata>,
    grid_override: Option<Arc<Vec<(f64, f64)>>>,
}

impl GribCrateFile {
    fn check_index(&self, index: usize) -> DecodeResult<()> {
        if index >= self.messages.len() {
            return Err(DecodeError::MessageOutOfRange {
                index,
                count: self.messages.len(),
            });
        }
        Ok(())
    }
}

impl DecodedFile for GribCrateFile {
    fn messages(&self) -> &[MessageMetadata] {
        &self.messages
    }

    fn read_values(&self, index: usize) -> DecodeResult<Vec<f32>> {
        self.check_index(index)?;
        let values_error = |reason: String| DecodeError::Values { index, reason };

        let grib2 = grib::from_reader(Cursor::new(self.data.clone()))
            .map_err(|e| values_error(e.to_string()))?;
        let (_, submessage) = grib2
            .iter()
            .nth(index)
            .ok_or_else(|| values_error("message vanished on re-read".to_string()))?;

        let decoder = grib::Grib2SubmessageDecoder::from(submessage)
            .map_err(|e| values_error(e.to_string()))?;
        let mut values: Vec<f32> = decoder
            .dispatch()
            .map_err(|e| values_error(e.to_string()))?
            .collect();

        normalize_missing(&mut values);
        Ok(values)
    }

    fn read_grid(&self, index: usize) -> DecodeResult<Vec<(f64, f64)>> {
        self.check_index(index)?;
        let grid_error = |reason: String| DecodeError::Grid { index, reason };

        let grib2 = grib::from_reader(Cursor::new(self.data.clone()))
            .map_err(|e| grid_error(e.to_string()))?;
        let (_, submessage) = grib2
            .iter()
            .nth(index)
            .ok_or_else(|| grid_error("message vanished on re-read".to_string()))?;

        match submessage.latlons() {
            Ok(points) => Ok(points
                .map(|(lat, lon)| (f64::from(lat), f64::from(lon)))
                .collect()),
            Err(e) => match &self.grid_override {
                Some(grid) if grid.len() == self.messages[index].num_points => {
                    debug!(index, "Using grid override for message without coordinates");
                    Ok(grid.as_ref().clone())
                }
                Some(grid) => {
                    warn!(
                        index,
                        override_points = grid.len(),
                        message_points = self.messages[index].num_points,
                        "Grid override does not match message size"
                    );
                    Err(grid_error(e.to_string()))
                }
                None => Err(grid_error(e.to_string())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled_surface_value() {
        assert_eq!(scaled_surface_value(0, 2), 2.0);
        assert_eq!(scaled_surface_value(0, 85000), 85000.0);
        assert!((scaled_surface_value(1, 25) - 2.5).abs() < 1e-12);
        assert_eq!(scaled_surface_value(-127, 7), 0.0);
    }

    #[test]
    fn test_unit_seconds() {
        assert_eq!(unit_seconds(0), Some(60));
        assert_eq!(unit_seconds(1), Some(3_600));
        assert_eq!(unit_seconds(2), Some(86_400));
        assert_eq!(unit_seconds(11), Some(21_600));
        assert_eq!(unit_seconds(3), None);
        assert_eq!(unit_seconds(255), None);
    }

    #[test]
    fn test_open_rejects_garbage() {
        let decoder = GribCrateDecoder::new();
        let result = decoder.open(Bytes::from_static(b"definitely not a GRIB2 file"));
        assert!(matches!(result, Err(DecodeError::Parse(_))));
    }

    #[test]
    fn test_open_rejects_empty_stream() {
        let decoder = GribCrateDecoder::new();
        assert!(decoder.open(Bytes::new()).is_err());
    }
}
