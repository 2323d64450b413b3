//! Error types for model/run/query validation.

use thiserror::Error;

/// Errors raised while validating runs, levels, points and catalog lookups.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CatalogError {
    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("unknown parameter '{parameter}' for model {model}")]
    UnknownParameter { model: String, parameter: String },

    #[error("parameter '{parameter}' is not published on level {level}")]
    UnsupportedLevel { parameter: String, level: String },

    #[error("invalid level: {0}")]
    InvalidLevel(String),

    #[error("invalid run: {0}")]
    InvalidRun(String),

    #[error("invalid step: {0}")]
    InvalidStep(String),

    #[error("invalid point: {0}")]
    InvalidPoint(String),

    #[error("failed to load model catalog: {0}")]
    Load(String),
}

pub type CatalogResult<T> = Result<T, CatalogError>;
