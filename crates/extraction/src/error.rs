//! Error types for extraction.

use std::time::Duration;

use grib_decoder::DecodeError;
use icon_common::CatalogError;
use thiserror::Error;

/// Errors that abort a whole extraction request.
///
/// `Clone` because one failed population or message decode is reported to
/// every request that was waiting on it. Per-point "outside the grid" is not
/// an error; it is carried as a point status in the result.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExtractError {
    /// Unknown model, unknown parameter or a level the parameter is never
    /// published on. Raised before any I/O.
    #[error("invalid query: {0}")]
    Catalog(#[from] CatalogError),

    /// Malformed request input (bad point, bad option).
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The run's file does not contain the parameter at all.
    #[error("parameter '{parameter}' not available in {run}")]
    ParameterUnavailable { parameter: String, run: String },

    /// The parameter exists in the file, but not on the requested level.
    #[error("parameter '{parameter}' not available at level {level} in {run} (available: {available})")]
    LevelUnavailable {
        parameter: String,
        level: String,
        run: String,
        available: String,
    },

    /// Requested (or latest) run is not published, or no longer retained upstream.
    #[error("run not available: {0}")]
    RunNotAvailable(String),

    #[error("fetch failed: {0}")]
    FetchFailed(String),

    #[error("decode failed: {0}")]
    DecodeFailed(String),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ExtractError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ExtractError::Catalog(_) | ExtractError::InvalidQuery(_) => 400,
            ExtractError::ParameterUnavailable { .. }
            | ExtractError::LevelUnavailable { .. }
            | ExtractError::RunNotAvailable(_) => 404,
            ExtractError::FetchFailed(_) => 502,
            ExtractError::Timeout { .. } => 504,
            ExtractError::DecodeFailed(_) | ExtractError::Internal(_) => 500,
        }
    }

    /// Short machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractError::Catalog(CatalogError::UnknownParameter { .. }) => "unknown-parameter",
            ExtractError::Catalog(CatalogError::UnknownModel(_)) => "unknown-model",
            ExtractError::Catalog(_) | ExtractError::InvalidQuery(_) => "invalid-query",
            ExtractError::ParameterUnavailable { .. } => "parameter-unavailable",
            ExtractError::LevelUnavailable { .. } => "level-unavailable",
            ExtractError::RunNotAvailable(_) => "run-not-available",
            ExtractError::FetchFailed(_) => "fetch-failed",
            ExtractError::DecodeFailed(_) => "decode-failed",
            ExtractError::Timeout { .. } => "timeout",
            ExtractError::Internal(_) => "internal",
        }
    }

    /// Whether the error came from resolving the query against a run, as
    /// opposed to a collaborator failure.
    pub fn is_query_resolution(&self) -> bool {
        matches!(
            self,
            ExtractError::ParameterUnavailable { .. } | ExtractError::LevelUnavailable { .. }
        )
    }
}

impl From<DecodeError> for ExtractError {
    fn from(err: DecodeError) -> Self {
        ExtractError::DecodeFailed(err.to_string())
    }
}

/// Errors reported by a fetch collaborator.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    /// The run/step is not (or no longer) published.
    #[error("not available: {0}")]
    NotAvailable(String),

    /// Network hiccup or 5xx; worth retrying.
    #[error("transient fetch error: {0}")]
    Transient(String),

    /// Anything retrying will not fix.
    #[error("fetch error: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

impl From<FetchError> for ExtractError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::NotAvailable(msg) => ExtractError::RunNotAvailable(msg),
            FetchError::Transient(msg) | FetchError::Permanent(msg) => ExtractError::FetchFailed(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;
