//! Point extraction of ICON GRIB2 fields.
//!
//! The pieces, bottom up:
//! - [`GridIndex`]: nearest-neighbour lookup over a model grid on the sphere
//! - [`MessageSelector`]: finds a field's message in a decoded run file
//! - [`Interpolator`]: nearest or inverse-distance-weighted point values
//! - [`RunCache`]: single-flight, leased cache of decoded runs
//! - [`ExtractionService`]: ties the above to the fetch and decode collaborators

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod grid_index;
pub mod interpolation;
pub mod selector;
pub mod service;
pub mod types;

pub use cache::{CacheStats, DecodedField, RunCache, RunEntry, RunLease};
pub use config::{CacheConfig, ExtractionConfig, FetchConfig, RetryPolicy};
pub use error::{ExtractError, FetchError, Result};
pub use fetch::{fetch_with_retry, latest_published_run, RunFetcher};
pub use grid_index::{haversine_km, GridIndex, Neighbour, EARTH_RADIUS_KM};
pub use interpolation::{
    InterpolationConfig, InterpolationMethod, Interpolator, PointValue, MAX_NEIGHBOURS,
};
pub use selector::MessageSelector;
pub use service::ExtractionService;
pub use types::{ExtractionResult, PointResult, PointStatus, RoutePointResult, RouteResult};
