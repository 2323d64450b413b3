//! Fetch collaborators for the extraction service.
//!
//! - [`DwdOpenDataFetcher`]: downloads a run from the DWD open-data server,
//!   one bz2 file per variable (and per model level), and joins them into
//!   one GRIB2 stream
//! - [`LocalDirFetcher`]: serves runs mirrored to a local directory tree

mod decompress;
mod dwd;
mod local;

pub use decompress::{decompress_bz2, is_bz2};
pub use dwd::{DwdConfig, DwdFile, DwdOpenDataFetcher, DEFAULT_BASE_URL};
pub use local::LocalDirFetcher;
