//! GRIB2 decoding collaborator for ICON files.
//!
//! The extraction layer never looks at GRIB bits. It asks a [`GribDecoder`]
//! to open a byte stream, receives the list of [`MessageMetadata`] records
//! and later pulls values or grid coordinates for individual messages by
//! index through the returned [`DecodedFile`].
//!
//! Two implementations ship with the crate:
//!
//! - [`GribCrateDecoder`]: real GRIB2 files, backed by the `grib` crate
//! - [`InMemoryFile`]: synthetic files built from explicit arrays

pub mod decoder;
pub mod error;
pub mod grib_crate;
pub mod memory;
pub mod message;

pub use decoder::{DecodedFile, GribDecoder};
pub use error::{DecodeError, DecodeResult};
pub use grib_crate::GribCrateDecoder;
pub use memory::{InMemoryDecoder, InMemoryFile, InMemoryMessage};
pub use message::{normalize_missing, MessageMetadata, MISSING_SENTINEL};
