//! One cached model run: the decoded file plus lazily decoded fields.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use grib_decoder::{DecodedFile, MessageMetadata};
use icon_common::ModelRun;
use metrics::{counter, histogram};
use tokio::sync::{Mutex, OnceCell, RwLock};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{ExtractError, Result};
use crate::grid_index::{layout_fingerprint, GridIndex};

/// Values of one message together with the index over its grid.
#[derive(Debug)]
pub struct DecodedField {
    pub message: MessageMetadata,
    /// Index-aligned with the grid coordinates; undefined values are NaN.
    pub values: Vec<f32>,
    pub grid: Arc<GridIndex>,
}

type SharedField = Shared<BoxFuture<'static, Result<Arc<DecodedField>>>>;

enum FieldSlot {
    Decoding(SharedField),
    Ready(Arc<DecodedField>),
}

type GridCells = HashMap<u64, Arc<OnceCell<Arc<GridIndex>>>>;

/// A Ready run.
///
/// The decoded file handle and its message list never change. The set of
/// decoded fields only grows; each field is decoded at most once at a time,
/// and grid indexes are shared between fields with the same layout.
pub struct RunEntry {
    run: ModelRun,
    file: Arc<dyn DecodedFile>,
    populated_at: Instant,
    decode_timeout: Duration,
    fields: Arc<RwLock<HashMap<usize, FieldSlot>>>,
    grids: Arc<Mutex<GridCells>>,
    evicted: AtomicBool,
}

impl RunEntry {
    pub fn new(run: ModelRun, file: Arc<dyn DecodedFile>, decode_timeout: Duration) -> Self {
        Self {
            run,
            file,
            populated_at: Instant::now(),
            decode_timeout,
            fields: Arc::new(RwLock::new(HashMap::new())),
            grids: Arc::new(Mutex::new(HashMap::new())),
            evicted: AtomicBool::new(false),
        }
    }

    pub fn run(&self) -> &ModelRun {
        &self.run
    }

    pub fn messages(&self) -> &[MessageMetadata] {
        self.file.messages()
    }

    /// Time since the entry became Ready.
    pub fn age(&self) -> Duration {
        self.populated_at.elapsed()
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_evicted(&self) {
        self.evicted.store(true, Ordering::Release);
    }

    /// Number of fields decoded so far.
    pub async fn decoded_fields(&self) -> usize {
        self.fields
            .read()
            .await
            .values()
            .filter(|slot| matches!(slot, FieldSlot::Ready(_)))
            .count()
    }

    /// Number of distinct grid layouts indexed so far.
    pub async fn grid_layouts(&self) -> usize {
        self.grids.lock().await.len()
    }

    /// Decoded values and grid index for message `index`.
    ///
    /// Concurrent callers for the same message share one decode. The decode
    /// runs as its own task, so a caller that stops waiting does not cancel
    /// it for the others. A failed decode is not remembered.
    pub async fn field(&self, index: usize) -> Result<Arc<DecodedField>> {
        let in_flight = {
            let fields = self.fields.read().await;
            match fields.get(&index) {
                Some(FieldSlot::Ready(field)) => return Ok(field.clone()),
                Some(FieldSlot::Decoding(pending)) => Some(pending.clone()),
                None => None,
            }
        };
        if let Some(pending) = in_flight {
            return pending.await;
        }

        let message = self
            .messages()
            .get(index)
            .cloned()
            .ok_or_else(|| {
                ExtractError::Internal(format!(
                    "message {} out of range for {} ({} messages)",
                    index,
                    self.run,
                    self.messages().len()
                ))
            })?;

        let pending = {
            let mut fields = self.fields.write().await;
            match fields.get(&index) {
                Some(FieldSlot::Ready(field)) => return Ok(field.clone()),
                Some(FieldSlot::Decoding(pending)) => pending.clone(),
                None => {
                    let pending = self.spawn_decode(index, message);
                    fields.insert(index, FieldSlot::Decoding(pending.clone()));
                    pending
                }
            }
        };

        pending.await
    }

    fn spawn_decode(&self, index: usize, message: MessageMetadata) -> SharedField {
        let file = self.file.clone();
        let fields = self.fields.clone();
        let grids = self.grids.clone();
        let timeout = self.decode_timeout;
        let run = self.run.clone();

        debug!(run = %run, message = index, "Decoding field");

        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let outcome = decode_field(file, grids, index, message, timeout).await;
            histogram!("icon_field_decode_seconds").record(started.elapsed().as_secs_f64());

            let mut fields = fields.write().await;
            match &outcome {
                Ok(field) => {
                    debug!(
                        run = %run,
                        message = index,
                        points = field.values.len(),
                        "Field decoded"
                    );
                    fields.insert(index, FieldSlot::Ready(field.clone()));
                }
                Err(err) => {
                    counter!("icon_field_decode_failures_total").increment(1);
                    warn!(run = %run, message = index, error = %err, "Field decode failed");
                    fields.remove(&index);
                }
            }
            outcome
        });

        async move {
            handle
                .await
                .unwrap_or_else(|e| Err(ExtractError::Internal(format!("decode task failed: {}", e))))
        }
        .boxed()
        .shared()
    }
}

impl fmt::Debug for RunEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunEntry")
            .field("run", &self.run)
            .field("messages", &self.file.messages().len())
            .field("age", &self.age())
            .field("evicted", &self.is_evicted())
            .finish()
    }
}

impl Drop for RunEntry {
    fn drop(&mut self) {
        if self.is_evicted() {
            debug!(run = %self.run, "Released evicted run");
        }
    }
}

/// Read values and grid of one message, then find or build the grid index
/// for its layout.
async fn decode_field(
    file: Arc<dyn DecodedFile>,
    grids: Arc<Mutex<GridCells>>,
    index: usize,
    message: MessageMetadata,
    timeout: Duration,
) -> Result<Arc<DecodedField>> {
    let reader = file.clone();
    let read = tokio::task::spawn_blocking(move || -> Result<(Vec<f32>, Vec<(f64, f64)>)> {
        let values = reader.read_values(index)?;
        let coords = reader.read_grid(index)?;
        Ok((values, coords))
    });

    let (values, coords) = match tokio::time::timeout(timeout, read).await {
        Err(_) => {
            return Err(ExtractError::Timeout {
                operation: "decode",
                timeout,
            })
        }
        Ok(Err(e)) => return Err(ExtractError::Internal(format!("decode task failed: {}", e))),
        Ok(Ok(result)) => result?,
    };

    if values.len() != coords.len() {
        return Err(ExtractError::DecodeFailed(format!(
            "message {}: {} values for {} grid points",
            index,
            values.len(),
            coords.len()
        )));
    }

    let fingerprint = layout_fingerprint(&coords);
    let cell = grids.lock().await.entry(fingerprint).or_default().clone();
    let grid = cell
        .get_or_try_init(|| async move {
            tokio::task::spawn_blocking(move || Arc::new(GridIndex::build(&coords)))
                .await
                .map_err(|e| ExtractError::Internal(format!("grid index build failed: {}", e)))
        })
        .await?
        .clone();

    Ok(Arc::new(DecodedField {
        message,
        values,
        grid,
    }))
}
