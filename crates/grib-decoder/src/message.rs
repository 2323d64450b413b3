//! Per-message metadata.

use icon_common::{GribIdentity, Level};

/// Legacy "undefined" marker still written by some ICON post-processing.
pub const MISSING_SENTINEL: f32 = 9.999e20;

/// Header information of one GRIB2 (sub)message.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageMetadata {
    /// Position of the message in its file, 0-based.
    pub index: usize,
    pub grib: GribIdentity,
    /// Catalog short-name, when the decoder could identify the parameter.
    pub short_name: Option<String>,
    pub level: Option<Level>,
    /// Forecast step in hours.
    pub step: Option<u32>,
    pub num_points: usize,
}

impl MessageMetadata {
    /// Whether this message carries the named parameter (case-insensitive).
    pub fn is_parameter(&self, short_name: &str) -> bool {
        self.short_name
            .as_deref()
            .map(|name| name.eq_ignore_ascii_case(short_name))
            .unwrap_or(false)
    }
}

/// Replace the sentinel and non-finite values with NaN.
pub fn normalize_missing(values: &mut [f32]) {
    for value in values.iter_mut() {
        if !value.is_finite() || *value >= MISSING_SENTINEL * 0.999 {
            *value = f32::NAN;
        }
    }
}
