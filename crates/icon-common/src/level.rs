//! Vertical level handling.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CatalogError;

/// GRIB2 fixed surface type: ground or water surface.
pub const SURFACE_TYPE_GROUND: u8 = 1;
/// GRIB2 fixed surface type: mean sea level.
pub const SURFACE_TYPE_MEAN_SEA_LEVEL: u8 = 101;
/// GRIB2 fixed surface type: isobaric surface (Pa).
pub const SURFACE_TYPE_ISOBARIC: u8 = 100;
/// GRIB2 fixed surface type: specified height above ground (m).
pub const SURFACE_TYPE_HEIGHT_ABOVE_GROUND: u8 = 103;
/// GRIB2 fixed surface type: generalized vertical height coordinate (ICON model levels).
pub const SURFACE_TYPE_MODEL_LEVEL: u8 = 150;

/// A vertical level a field is published on.
///
/// String form is the one used throughout the API: `surface`, `2m`,
/// `model-level-65`, `850hPa`, `msl`. A bare integer is read as a model level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Level {
    Surface,
    MeanSeaLevel,
    HeightAboveGround(u32),
    ModelLevel(u32),
    Pressure(u32),
}

impl Level {
    /// Build a level from a GRIB2 fixed surface (type code + value in SI units).
    ///
    /// Returns `None` for surface types the ICON catalog does not use.
    pub fn from_grib_surface(surface_type: u8, value: f64) -> Option<Self> {
        match surface_type {
            SURFACE_TYPE_GROUND => Some(Level::Surface),
            SURFACE_TYPE_MEAN_SEA_LEVEL => Some(Level::MeanSeaLevel),
            SURFACE_TYPE_HEIGHT_ABOVE_GROUND if value.is_finite() && value >= 0.0 => {
                Some(Level::HeightAboveGround(value.round() as u32))
            }
            SURFACE_TYPE_MODEL_LEVEL if value.is_finite() && value >= 0.0 => {
                Some(Level::ModelLevel(value.round() as u32))
            }
            SURFACE_TYPE_ISOBARIC if value.is_finite() && value >= 0.0 => {
                Some(Level::Pressure((value / 100.0).round() as u32))
            }
            _ => None,
        }
    }

    /// GRIB2 fixed surface type code for this level.
    pub fn grib_surface_type(&self) -> u8 {
        match self {
            Level::Surface => SURFACE_TYPE_GROUND,
            Level::MeanSeaLevel => SURFACE_TYPE_MEAN_SEA_LEVEL,
            Level::HeightAboveGround(_) => SURFACE_TYPE_HEIGHT_ABOVE_GROUND,
            Level::ModelLevel(_) => SURFACE_TYPE_MODEL_LEVEL,
            Level::Pressure(_) => SURFACE_TYPE_ISOBARIC,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Surface => write!(f, "surface"),
            Level::MeanSeaLevel => write!(f, "msl"),
            Level::HeightAboveGround(m) => write!(f, "{}m", m),
            Level::ModelLevel(n) => write!(f, "model-level-{}", n),
            Level::Pressure(hpa) => write!(f, "{}hPa", hpa),
        }
    }
}

impl FromStr for Level {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let lower = trimmed.to_ascii_lowercase();

        if lower == "surface" || lower == "sfc" {
            return Ok(Level::Surface);
        }

        if lower == "msl" || lower == "mean-sea-level" {
            return Ok(Level::MeanSeaLevel);
        }

        if let Some(n) = lower.strip_prefix("model-level-") {
            return parse_u32(n, trimmed).map(Level::ModelLevel);
        }

        if let Some(hpa) = lower.strip_suffix("hpa") {
            return parse_u32(hpa.trim(), trimmed).map(Level::Pressure);
        }

        if let Some(m) = lower.strip_suffix('m') {
            return parse_u32(m.trim(), trimmed).map(Level::HeightAboveGround);
        }

        parse_u32(&lower, trimmed).map(Level::ModelLevel)
    }
}

fn parse_u32(digits: &str, original: &str) -> Result<u32, CatalogError> {
    digits
        .parse::<u32>()
        .map_err(|_| CatalogError::InvalidLevel(original.to_string()))
}

impl Serialize for Level {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Level {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u32),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(Level::ModelLevel(n)),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}
