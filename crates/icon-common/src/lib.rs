//! Common types shared across the ICON extraction crates.
//!
//! Everything here is plain data: identifying a model run, naming a vertical
//! level, validating query points and resolving a parameter short-name
//! against the ICON model catalog before any I/O happens.

pub mod catalog;
pub mod error;
pub mod level;
pub mod point;
pub mod query;
pub mod run;

pub use catalog::{GribIdentity, ModelCatalog, ModelDefinition, ParameterDefinition, ResolvedField};
pub use error::{CatalogError, CatalogResult};
pub use level::Level;
pub use point::{GeoPoint, TimedPoint};
pub use query::{FieldQuery, RunSelector};
pub use run::{ModelRun, RunSchedule};
