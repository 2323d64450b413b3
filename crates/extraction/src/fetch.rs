//! Fetch collaborator interface and the retrying call wrapper.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use icon_common::ModelRun;
use tracing::{debug, warn};

use crate::config::FetchConfig;
use crate::error::{ExtractError, FetchError, Result};

/// Source of raw GRIB2 bytes for model runs.
#[async_trait]
pub trait RunFetcher: Send + Sync {
    /// Every message of `run` (one model, reference time and step) as a
    /// single GRIB2 byte stream.
    async fn fetch(&self, run: &ModelRun) -> std::result::Result<Bytes, FetchError>;

    /// Reference times currently published for `model`, newest first.
    async fn published_runs(
        &self,
        model: &str,
    ) -> std::result::Result<Vec<DateTime<Utc>>, FetchError>;
}

/// Fetch `run`, retrying transient failures with exponential backoff.
///
/// Each attempt is bounded by `config.timeout`. A timed-out attempt counts
/// as transient; if the final attempt times out the error is `Timeout`.
pub async fn fetch_with_retry(
    fetcher: &dyn RunFetcher,
    run: &ModelRun,
    config: &FetchConfig,
) -> Result<Bytes> {
    let mut retry = 0;

    loop {
        let attempt = tokio::time::timeout(config.timeout, fetcher.fetch(run)).await;

        let err = match attempt {
            Ok(Ok(bytes)) => {
                debug!(run = %run, bytes = bytes.len(), retries = retry, "Fetched run");
                return Ok(bytes);
            }
            Ok(Err(err)) if !err.is_transient() => return Err(err.into()),
            Ok(Err(err)) => ExtractError::from(err),
            Err(_) => ExtractError::Timeout {
                operation: "fetch",
                timeout: config.timeout,
            },
        };

        retry += 1;
        if retry > config.retry.max_retries {
            warn!(run = %run, error = %err, attempts = retry, "Fetch failed, giving up");
            return Err(match err {
                ExtractError::FetchFailed(msg) => {
                    ExtractError::FetchFailed(format!("{} (after {} attempts)", msg, retry))
                }
                other => other,
            });
        }

        let delay = config.retry.delay_for(retry);
        warn!(
            run = %run,
            error = %err,
            retry = retry,
            max_retries = config.retry.max_retries,
            delay_ms = delay.as_millis() as u64,
            "Fetch failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Latest published reference time for `model`, with the same timeout and
/// retry treatment as [`fetch_with_retry`].
pub async fn latest_published_run(
    fetcher: &dyn RunFetcher,
    model: &str,
    config: &FetchConfig,
) -> Result<DateTime<Utc>> {
    let mut retry = 0;

    loop {
        let err = match tokio::time::timeout(config.timeout, fetcher.published_runs(model)).await {
            Ok(Ok(runs)) => {
                return runs.into_iter().max().ok_or_else(|| {
                    ExtractError::RunNotAvailable(format!("no published runs for {}", model))
                });
            }
            Ok(Err(err)) if !err.is_transient() => return Err(err.into()),
            Ok(Err(err)) => ExtractError::from(err),
            Err(_) => ExtractError::Timeout {
                operation: "run discovery",
                timeout: config.timeout,
            },
        };

        retry += 1;
        if retry > config.retry.max_retries {
            return Err(err);
        }
        let delay = config.retry.delay_for(retry);
        warn!(model = model, error = %err, retry = retry, "Run discovery failed, retrying");
        tokio::time::sleep(delay).await;
    }
}
