//! Shared fixtures for extraction integration tests.
//!
//! Provides:
//! - A fetcher and a decoder that count their invocations
//! - A three-point grid with known values
//! - Optional latency and injectable failures

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use extraction::{ExtractionConfig, ExtractionService, FetchError, RetryPolicy, RunFetcher};
use grib_decoder::{
    DecodeError, DecodeResult, DecodedFile, GribDecoder, InMemoryFile, InMemoryMessage,
    MessageMetadata,
};
use icon_common::{Level, ModelCatalog, ModelRun};

pub const MODEL: &str = "icon-d2";

/// Grid points of the fixture file.
pub const GRID: [(f64, f64); 3] = [(50.0, 10.0), (50.1, 10.0), (50.0, 10.1)];

/// `t_2m` values at [`GRID`].
pub const T_2M: [f32; 3] = [5.0, 5.4, 5.2];

/// `pmsl` values at [`GRID`].
pub const PMSL: [f32; 3] = [101_325.0, 101_300.0, 101_280.0];

/// Reference time on 2024-05-02 at `hour` UTC.
pub fn reference(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 2, hour, 0, 0).unwrap()
}

pub fn run(hour: u32, step: u32) -> ModelRun {
    ModelRun::new(MODEL, reference(hour), step).unwrap()
}

/// The decoded content every fixture run carries, for the given step.
///
/// `t_2m` and `pmsl` at 2 m / MSL, `tot_prec` with one undefined point and
/// model-level temperature on levels 64 and 65 (`t` at 65 is the 2 m field
/// plus ten).
pub fn fixture_file(step: u32) -> InMemoryFile {
    let grid = Arc::new(GRID.to_vec());
    InMemoryFile::new(vec![
        InMemoryMessage::new("pmsl", Level::MeanSeaLevel, step, grid.clone(), PMSL.to_vec()),
        InMemoryMessage::new("t_2m", Level::HeightAboveGround(2), step, grid.clone(), T_2M.to_vec()),
        InMemoryMessage::new(
            "tot_prec",
            Level::Surface,
            step,
            grid.clone(),
            vec![0.5, f32::NAN, 1.5],
        ),
        InMemoryMessage::new("t", Level::ModelLevel(64), step, grid.clone(), vec![1.0, 2.0, 3.0]),
        InMemoryMessage::new(
            "t",
            Level::ModelLevel(65),
            step,
            grid,
            T_2M.iter().map(|v| v + 10.0).collect(),
        ),
    ])
}

/// Invocation counters shared by the fixture collaborators.
#[derive(Debug, Default)]
pub struct Calls {
    pub fetch: AtomicUsize,
    pub published: AtomicUsize,
    pub open: AtomicUsize,
    pub read_values: AtomicUsize,
    pub read_grid: AtomicUsize,
}

impl Calls {
    pub fn fetches(&self) -> usize {
        self.fetch.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn value_reads(&self) -> usize {
        self.read_values.load(Ordering::SeqCst)
    }

    pub fn grid_reads(&self) -> usize {
        self.read_grid.load(Ordering::SeqCst)
    }
}

/// Fetcher serving every run in `published`; its payload is the step.
pub struct CountingFetcher {
    calls: Arc<Calls>,
    published: Vec<DateTime<Utc>>,
    latency: Duration,
    failures: AtomicUsize,
    failure: FetchError,
}

impl CountingFetcher {
    pub fn new(calls: Arc<Calls>, published: Vec<DateTime<Utc>>) -> Self {
        Self {
            calls,
            published,
            latency: Duration::ZERO,
            failures: AtomicUsize::new(0),
            failure: FetchError::Transient("injected".to_string()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the next `count` fetches with `failure`.
    pub fn failing(self, count: usize, failure: FetchError) -> Self {
        self.failures.store(count, Ordering::SeqCst);
        Self { failure, ..self }
    }
}

#[async_trait]
impl RunFetcher for CountingFetcher {
    async fn fetch(&self, run: &ModelRun) -> Result<Bytes, FetchError> {
        self.calls.fetch.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(self.failure.clone());
        }

        if !self.published.contains(&run.reference_time()) {
            return Err(FetchError::NotAvailable(run.to_string()));
        }
        Ok(Bytes::from(run.step().to_string()))
    }

    async fn published_runs(&self, _model: &str) -> Result<Vec<DateTime<Utc>>, FetchError> {
        self.calls.published.fetch_add(1, Ordering::SeqCst);
        let mut runs = self.published.clone();
        runs.sort_unstable_by(|a, b| b.cmp(a));
        Ok(runs)
    }
}

/// Decoder turning a step payload into [`fixture_file`]; counts opens and
/// per-message reads.
pub struct CountingDecoder {
    calls: Arc<Calls>,
    failures: AtomicUsize,
    open_latency: Duration,
}

impl CountingDecoder {
    pub fn new(calls: Arc<Calls>) -> Self {
        Self {
            calls,
            failures: AtomicUsize::new(0),
            open_latency: Duration::ZERO,
        }
    }

    /// Fail the next `count` opens.
    pub fn failing(self, count: usize) -> Self {
        self.failures.store(count, Ordering::SeqCst);
        self
    }

    /// Block inside `open` for `latency`.
    pub fn with_open_latency(mut self, latency: Duration) -> Self {
        self.open_latency = latency;
        self
    }
}

impl GribDecoder for CountingDecoder {
    fn open(&self, data: Bytes) -> DecodeResult<Arc<dyn DecodedFile>> {
        self.calls.open.fetch_add(1, Ordering::SeqCst);
        if !self.open_latency.is_zero() {
            std::thread::sleep(self.open_latency);
        }

        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(DecodeError::Parse("injected corruption".to_string()));
        }

        let step: u32 = std::str::from_utf8(&data)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| DecodeError::Parse("not a fixture payload".to_string()))?;

        Ok(Arc::new(CountingFile {
            inner: fixture_file(step),
            calls: self.calls.clone(),
        }))
    }
}

struct CountingFile {
    inner: InMemoryFile,
    calls: Arc<Calls>,
}

impl DecodedFile for CountingFile {
    fn messages(&self) -> &[MessageMetadata] {
        self.inner.messages()
    }

    fn read_values(&self, index: usize) -> DecodeResult<Vec<f32>> {
        self.calls.read_values.fetch_add(1, Ordering::SeqCst);
        self.inner.read_values(index)
    }

    fn read_grid(&self, index: usize) -> DecodeResult<Vec<(f64, f64)>> {
        self.calls.read_grid.fetch_add(1, Ordering::SeqCst);
        self.inner.read_grid(index)
    }
}

/// Configuration with fast retries and short timeouts.
pub fn test_config() -> ExtractionConfig {
    let mut config = ExtractionConfig::default();
    config.fetch.timeout = Duration::from_secs(5);
    config.fetch.decode_timeout = Duration::from_secs(5);
    config.fetch.retry = RetryPolicy {
        max_retries: 0,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    };
    config
}

/// Service over the counting collaborators.
pub fn service(
    fetcher: CountingFetcher,
    decoder: CountingDecoder,
    config: ExtractionConfig,
) -> ExtractionService {
    ExtractionService::new(
        Arc::new(ModelCatalog::builtin()),
        Arc::new(fetcher),
        Arc::new(decoder),
        config,
    )
}

/// Service with every collaborator in its default state, publishing the
/// 00, 03 and 06 UTC runs.
pub fn default_service() -> (ExtractionService, Arc<Calls>) {
    let calls = Arc::new(Calls::default());
    let fetcher = CountingFetcher::new(calls.clone(), vec![reference(0), reference(3), reference(6)]);
    let decoder = CountingDecoder::new(calls.clone());
    (service(fetcher, decoder, test_config()), calls)
}
