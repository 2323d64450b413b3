//! In-memory GRIB stand-ins built from explicit arrays.
//!
//! Used for synthetic data and as the decode fixture in tests.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use icon_common::{GribIdentity, Level};

use crate::decoder::{DecodedFile, GribDecoder};
use crate::error::{DecodeError, DecodeResult};
use crate::message::{normalize_missing, MessageMetadata};

/// One synthetic message.
#[derive(Debug, Clone)]
pub struct InMemoryMessage {
    pub grib: GribIdentity,
    pub short_name: String,
    pub level: Level,
    pub step: u32,
    pub grid: Arc<Vec<(f64, f64)>>,
    pub values: Vec<f32>,
}

impl InMemoryMessage {
    pub fn new(
        short_name: impl Into<String>,
        level: Level,
        step: u32,
        grid: Arc<Vec<(f64, f64)>>,
        values: Vec<f32>,
    ) -> Self {
        Self {
            grib: GribIdentity::new(0, 0, 0),
            short_name: short_name.into(),
            level,
            step,
            grid,
            values,
        }
    }

    pub fn with_grib(mut self, grib: GribIdentity) -> Self {
        self.grib = grib;
        self
    }
}

/// A decoded file whose messages live in memory.
#[derive(Debug, Clone)]
pub struct InMemoryFile {
    metadata: Vec<MessageMetadata>,
    messages: Vec<InMemoryMessage>,
}

impl InMemoryFile {
    pub fn new(messages: Vec<InMemoryMessage>) -> Self {
        let metadata = messages
            .iter()
            .enumerate()
            .map(|(index, m)| MessageMetadata {
                index,
                grib: m.grib,
                short_name: Some(m.short_name.clone()),
                level: Some(m.level),
                step: Some(m.step),
                num_points: m.values.len(),
            })
            .collect();
        Self { metadata, messages }
    }

    fn message(&self, index: usize) -> DecodeResult<&InMemoryMessage> {
        self.messages
            .get(index)
            .ok_or(DecodeError::MessageOutOfRange {
                index,
                count: self.messages.len(),
            })
    }
}

impl DecodedFile for InMemoryFile {
    fn messages(&self) -> &[MessageMetadata] {
        &self.metadata
    }

    fn read_values(&self, index: usize) -> DecodeResult<Vec<f32>> {
        let message = self.message(index)?;
        if message.values.len() != message.grid.len() {
            return Err(DecodeError::Values {
                index,
                reason: format!(
                    "{} values for {} grid points",
                    message.values.len(),
                    message.grid.len()
                ),
            });
        }
        let mut values = message.values.clone();
        normalize_missing(&mut values);
        Ok(values)
    }

    fn read_grid(&self, index: usize) -> DecodeResult<Vec<(f64, f64)>> {
        Ok(self.message(index)?.grid.as_ref().clone())
    }
}

/// Decoder that maps exact byte payloads to prepared files.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDecoder {
    files: HashMap<Bytes, Arc<InMemoryFile>>,
}

impl InMemoryDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the file returned when `payload` is opened.
    pub fn register(&mut self, payload: impl Into<Bytes>, file: InMemoryFile) {
        self.files.insert(payload.into(), Arc::new(file));
    }
}

impl GribDecoder for InMemoryDecoder {
    fn open(&self, data: Bytes) -> DecodeResult<Arc<dyn DecodedFile>> {
        match self.files.get(&data) {
            Some(file) => Ok(file.clone() as Arc<dyn DecodedFile>),
            None => Err(DecodeError::Parse(format!(
                "unrecognised payload of {} bytes",
                data.len()
            ))),
        }
    }
}
