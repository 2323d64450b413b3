//! Application state for the extraction API.

use std::sync::Arc;
use std::time::Duration;

use extraction::{ExtractionService, RunCache};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tracing::debug;

/// Shared application state.
pub struct AppState {
    pub service: ExtractionService,
    /// Renders the installed Prometheus recorder; `None` when no recorder
    /// was installed.
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(service: ExtractionService) -> Self {
        Self {
            service,
            prometheus: None,
        }
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }

    /// Start the periodic sweep that evicts expired runs.
    pub fn spawn_expiry_sweep(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        spawn_expiry_sweep(self.service.cache().clone(), every)
    }
}

/// Evict expired entries of `cache` every `every` until the task is aborted.
pub fn spawn_expiry_sweep(cache: RunCache, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = cache.evict_expired().await;
            debug!(evicted, "Cache expiry sweep");
        }
    })
}
