//! Decode collaborator traits.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::DecodeResult;
use crate::message::MessageMetadata;

/// Opens GRIB2 byte streams.
///
/// Implementations are CPU-bound and synchronous; async callers run them on
/// a blocking thread.
pub trait GribDecoder: Send + Sync {
    /// Parse the message headers of `data`. Any malformed input is an error,
    /// never a partial listing.
    fn open(&self, data: Bytes) -> DecodeResult<Arc<dyn DecodedFile>>;
}

/// An opened GRIB2 file. Values and coordinates are decoded on demand.
pub trait DecodedFile: Send + Sync {
    fn messages(&self) -> &[MessageMetadata];

    /// Decoded values of one message, with missing values as NaN.
    fn read_values(&self, index: usize) -> DecodeResult<Vec<f32>>;

    /// Grid point coordinates `(lat, lon)` of one message, index-aligned
    /// with [`DecodedFile::read_values`].
    fn read_grid(&self, index: usize) -> DecodeResult<Vec<(f64, f64)>>;
}
