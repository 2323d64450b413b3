//! Configuration for extraction and the run cache.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::interpolation::{InterpolationConfig, InterpolationMethod};

/// Top-level configuration for an [`ExtractionService`](crate::ExtractionService).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub cache: CacheConfig,
    /// Default interpolation; requests may override method and k.
    pub interpolation: InterpolationConfig,
    pub fetch: FetchConfig,
}

/// Run cache bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of retained runs.
    pub capacity: usize,
    /// Entries older than this (measured from population) are evicted.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 8,
            ttl: Duration::from_secs(6 * 3600),
        }
    }
}

/// Collaborator call bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Bound on a single fetch attempt.
    pub timeout: Duration,
    /// Bound on opening a file or decoding one message.
    pub decode_timeout: Duration,
    pub retry: RetryPolicy,
    /// How long a resolved latest run is reused before the fetch
    /// collaborator is asked again. Zero asks on every request.
    #[serde(default = "default_latest_run_ttl")]
    pub latest_run_ttl: Duration,
}

fn default_latest_run_ttl() -> Duration {
    Duration::from_secs(60)
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            decode_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            latest_run_ttl: default_latest_run_ttl(),
        }
    }
}

/// Exponential backoff for transient fetch failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry (doubles each retry).
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let mut delay = self.initial_delay;
        for _ in 1..retry {
            delay = std::cmp::min(delay.saturating_mul(2), self.max_delay);
            if delay == self.max_delay {
                break;
            }
        }
        std::cmp::min(delay, self.max_delay)
    }
}

impl ExtractionConfig {
    /// Load configuration from `ICON_*` environment variables, keeping the
    /// default for anything unset.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(capacity) = env_parse("ICON_CACHE_CAPACITY") {
            config.cache.capacity = capacity;
        }
        if let Some(secs) = env_parse("ICON_CACHE_TTL_SECS") {
            config.cache.ttl = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("ICON_INTERPOLATION") {
            config.interpolation.method = InterpolationMethod::from_str(&val);
        }
        if let Some(k) = env_parse("ICON_NEIGHBOURS") {
            config.interpolation.neighbours = k;
        }
        if let Some(power) = env_parse("ICON_IDW_POWER") {
            config.interpolation.power = power;
        }
        if let Some(km) = env_parse("ICON_MAX_DISTANCE_KM") {
            config.interpolation.max_distance_km = km;
        }
        if let Some(km) = env_parse("ICON_COINCIDENT_EPSILON_KM") {
            config.interpolation.epsilon_km = km;
        }

        if let Some(secs) = env_parse("ICON_FETCH_TIMEOUT_SECS") {
            config.fetch.timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse("ICON_DECODE_TIMEOUT_SECS") {
            config.fetch.decode_timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = env_parse("ICON_FETCH_MAX_RETRIES") {
            config.fetch.retry.max_retries = retries;
        }
        if let Some(ms) = env_parse("ICON_RETRY_INITIAL_DELAY_MS") {
            config.fetch.retry.initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse("ICON_RETRY_MAX_DELAY_MS") {
            config.fetch.retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = env_parse("ICON_LATEST_RUN_TTL_SECS") {
            config.fetch.latest_run_ttl = Duration::from_secs(secs);
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.cache.capacity == 0 {
            return Err("cache capacity must be > 0".to_string());
        }
        if self.cache.ttl.is_zero() {
            return Err("cache ttl must be > 0".to_string());
        }
        self.interpolation.validate()?;
        if self.fetch.timeout.is_zero() || self.fetch.decode_timeout.is_zero() {
            return Err("fetch and decode timeouts must be > 0".to_string());
        }
        if self.fetch.retry.initial_delay > self.fetch.retry.max_delay {
            return Err("retry initial delay must not exceed max delay".to_string());
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "Ignoring unparseable configuration value");
            None
        }
    }
}
