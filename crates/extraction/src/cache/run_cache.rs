//! Run-scoped cache with single-flight population.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use icon_common::ModelRun;
use lru::LruCache;
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::entry::RunEntry;
use super::lease::RunLease;
use crate::config::CacheConfig;
use crate::error::{ExtractError, Result};

type SharedEntry = Shared<BoxFuture<'static, Result<Arc<RunEntry>>>>;

#[derive(Clone)]
struct Population {
    generation: u64,
    result: SharedEntry,
}

struct Table {
    /// Ready entries, least recently used first.
    ready: LruCache<ModelRun, Arc<RunEntry>>,
    /// In-flight populations; at most one per run.
    populating: HashMap<ModelRun, Population>,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    waits: AtomicU64,
    misses: AtomicU64,
    populations: AtomicU64,
    population_failures: AtomicU64,
    evictions: AtomicU64,
}

/// Every counter is mirrored to the process-wide metrics recorder.
impl Counters {
    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        counter!("icon_run_cache_hits_total").increment(1);
    }

    fn wait(&self) {
        self.waits.fetch_add(1, Ordering::Relaxed);
        counter!("icon_run_cache_waits_total").increment(1);
    }

    fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        counter!("icon_run_cache_misses_total").increment(1);
    }

    fn population(&self) {
        self.populations.fetch_add(1, Ordering::Relaxed);
        counter!("icon_run_populations_total").increment(1);
    }

    fn population_failure(&self) {
        self.population_failures.fetch_add(1, Ordering::Relaxed);
        counter!("icon_run_population_failures_total").increment(1);
    }

    fn eviction(&self, reason: &'static str) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        counter!("icon_run_cache_evictions_total", "reason" => reason).increment(1);
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Lookups served by a Ready entry.
    pub hits: u64,
    /// Lookups that joined a population already in flight.
    pub waits: u64,
    /// Lookups that started a population.
    pub misses: u64,
    pub populations: u64,
    pub population_failures: u64,
    /// Entries removed for capacity, TTL or an explicit clear.
    pub evictions: u64,
    /// Ready entries currently retained.
    pub entries: usize,
    /// Populations currently in flight.
    pub populating: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.waits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits + self.waits) as f64 / total as f64 * 100.0
        }
    }
}

struct CacheInner {
    config: CacheConfig,
    /// One lock over both maps, so a lookup moves a run from Absent to
    /// Populating atomically. It is held only for map operations and never
    /// across a fetch, decode or other await. A Ready hit takes it
    /// exclusively too, since the hit reorders the LRU list; that section is
    /// a hash lookup plus a list splice.
    table: Mutex<Table>,
    counters: Counters,
    next_generation: AtomicU64,
}

/// Cache of Ready runs keyed by [`ModelRun`].
///
/// Per run: Absent, then Populating (one shared population no matter how
/// many callers ask), then Ready, then evicted by capacity (least recently
/// used first) or TTL. Failed populations leave the run Absent. Cloning
/// yields another handle to the same cache.
#[derive(Clone)]
pub struct RunCache {
    inner: Arc<CacheInner>,
}

impl RunCache {
    pub fn new(config: CacheConfig) -> Self {
        let config = CacheConfig {
            capacity: config.capacity.max(1),
            ..config
        };
        Self {
            inner: Arc::new(CacheInner {
                config,
                table: Mutex::new(Table {
                    ready: LruCache::unbounded(),
                    populating: HashMap::new(),
                }),
                counters: Counters::default(),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Lease the Ready entry for `run`, populating it with `populate` if the
    /// run is absent.
    ///
    /// `populate` is only invoked by the caller that starts the population;
    /// everyone else awaits that caller's result. The population runs on
    /// its own task: dropping this future does not cancel it.
    pub async fn get_or_populate<F, Fut>(&self, run: &ModelRun, populate: F) -> Result<RunLease>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RunEntry>> + Send + 'static,
    {
        let pending = {
            let mut table = self.inner.table.lock().await;

            if let Some(entry) = self.inner.lookup_ready(&mut table, run) {
                self.inner.counters.hit();
                return Ok(RunLease::new(entry));
            }

            match table.populating.get(run) {
                Some(population) => {
                    self.inner.counters.wait();
                    debug!(run = %run, "Waiting for in-flight population");
                    population.result.clone()
                }
                None => {
                    self.inner.counters.miss();
                    let population = CacheInner::start_population(&self.inner, run.clone(), populate());
                    table.populating.insert(run.clone(), population.clone());
                    population.result
                }
            }
        };

        pending.await.map(RunLease::new)
    }

    /// Lease the entry for `run` if it is Ready; never populates.
    pub async fn get(&self, run: &ModelRun) -> Option<RunLease> {
        let mut table = self.inner.table.lock().await;
        let entry = self.inner.lookup_ready(&mut table, run)?;
        self.inner.counters.hit();
        Some(RunLease::new(entry))
    }

    /// Whether `run` is currently being populated.
    pub async fn is_populating(&self, run: &ModelRun) -> bool {
        self.inner.table.lock().await.populating.contains_key(run)
    }

    /// Evict every Ready entry older than the TTL. Returns how many.
    pub async fn evict_expired(&self) -> usize {
        let ttl = self.inner.config.ttl;
        let mut table = self.inner.table.lock().await;

        let expired: Vec<ModelRun> = table
            .ready
            .iter()
            .filter(|(_, entry)| entry.age() >= ttl)
            .map(|(run, _)| run.clone())
            .collect();

        for run in &expired {
            if let Some(entry) = table.ready.pop(run) {
                self.inner.retire(&entry, "ttl");
            }
        }

        if !expired.is_empty() {
            info!(evicted = expired.len(), remaining = table.ready.len(), "Evicted expired runs");
        }
        expired.len()
    }

    /// Drop every Ready entry and forget in-flight populations.
    ///
    /// In-flight populations still complete for their waiters but are not
    /// inserted.
    pub async fn clear(&self) {
        let mut table = self.inner.table.lock().await;
        while let Some((_, entry)) = table.ready.pop_lru() {
            self.inner.retire(&entry, "clear");
        }
        table.populating.clear();
    }

    /// Number of Ready entries.
    pub async fn len(&self) -> usize {
        self.inner.table.lock().await.ready.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> CacheStats {
        let (entries, populating) = {
            let table = self.inner.table.lock().await;
            (table.ready.len(), table.populating.len())
        };
        let counters = &self.inner.counters;
        CacheStats {
            hits: counters.hits.load(Ordering::Relaxed),
            waits: counters.waits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            populations: counters.populations.load(Ordering::Relaxed),
            population_failures: counters.population_failures.load(Ordering::Relaxed),
            evictions: counters.evictions.load(Ordering::Relaxed),
            entries,
            populating,
        }
    }
}

impl CacheInner {
    /// Ready entry for `run`, bumping its recency. Expired entries are
    /// evicted here instead of being returned.
    fn lookup_ready(&self, table: &mut Table, run: &ModelRun) -> Option<Arc<RunEntry>> {
        let entry = table.ready.get(run)?.clone();
        if entry.age() >= self.config.ttl {
            table.ready.pop(run);
            self.retire(&entry, "ttl");
            return None;
        }
        Some(entry)
    }

    fn start_population<Fut>(inner: &Arc<CacheInner>, run: ModelRun, populate: Fut) -> Population
    where
        Fut: Future<Output = Result<RunEntry>> + Send + 'static,
    {
        let generation = inner.next_generation.fetch_add(1, Ordering::Relaxed);
        inner.counters.population();
        info!(run = %run, generation = generation, "Populating run");

        let task_inner = inner.clone();
        let task_run = run.clone();
        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let outcome = populate.await.map(Arc::new);
            task_inner.finish_population(&task_run, generation, &outcome, started).await;
            outcome
        });

        let result = async move {
            handle.await.unwrap_or_else(|e| {
                Err(ExtractError::Internal(format!("population task failed: {}", e)))
            })
        }
        .boxed()
        .shared();

        Population { generation, result }
    }

    /// Move `run` out of Populating: to Ready on success, back to Absent on
    /// failure. A population superseded by `clear` leaves the table alone.
    async fn finish_population(
        &self,
        run: &ModelRun,
        generation: u64,
        outcome: &Result<Arc<RunEntry>>,
        started: Instant,
    ) {
        histogram!("icon_run_population_seconds").record(started.elapsed().as_secs_f64());
        let mut table = self.table.lock().await;

        let current = table
            .populating
            .get(run)
            .map_or(false, |population| population.generation == generation);
        if current {
            table.populating.remove(run);
        }

        match outcome {
            Ok(entry) => {
                info!(
                    run = %run,
                    messages = entry.messages().len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Run ready"
                );
                if current {
                    if let Some(previous) = table.ready.put(run.clone(), entry.clone()) {
                        self.retire(&previous, "replaced");
                    }
                    self.enforce_capacity(&mut table);
                    gauge!("icon_run_cache_entries").set(table.ready.len() as f64);
                } else {
                    entry.mark_evicted();
                }
            }
            Err(err) => {
                self.counters.population_failure();
                warn!(
                    run = %run,
                    error = %err,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Run population failed"
                );
            }
        }
    }

    fn enforce_capacity(&self, table: &mut Table) {
        while table.ready.len() > self.config.capacity {
            match table.ready.pop_lru() {
                Some((_, entry)) => self.retire(&entry, "capacity"),
                None => break,
            }
        }
    }

    fn retire(&self, entry: &RunEntry, reason: &'static str) {
        entry.mark_evicted();
        self.counters.eviction(reason);
        info!(run = %entry.run(), reason = reason, age_secs = entry.age().as_secs(), "Evicted run");
    }
}
