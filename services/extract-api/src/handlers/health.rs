//! Health and cache statistics handlers.

use std::sync::Arc;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{extract::Extension, Json};
use extraction::CacheStats;
use metrics::gauge;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub models: Vec<String>,
    pub cache_capacity: usize,
    pub cache_ttl_secs: u64,
    pub cache: CacheStats,
    pub hit_rate: f64,
}

/// GET /health - Basic health check
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// GET /stats - Run cache statistics
pub async fn stats_handler(Extension(state): Extension<Arc<AppState>>) -> Json<StatsResponse> {
    let cache = state.service.cache();
    let stats = cache.stats().await;
    Json(StatsResponse {
        models: state
            .service
            .catalog()
            .model_names()
            .into_iter()
            .map(String::from)
            .collect(),
        cache_capacity: cache.config().capacity,
        cache_ttl_secs: cache.config().ttl.as_secs(),
        hit_rate: stats.hit_rate(),
        cache: stats,
    })
}

/// GET /metrics - Prometheus metrics
pub async fn metrics_handler(Extension(state): Extension<Arc<AppState>>) -> Response {
    let Some(handle) = &state.prometheus else {
        return (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response();
    };

    // Gauges that only change on eviction are refreshed at scrape time.
    let stats = state.service.cache().stats().await;
    gauge!("icon_run_cache_entries").set(stats.entries as f64);
    gauge!("icon_run_cache_populating").set(stats.populating as f64);
    gauge!("icon_run_cache_hit_rate_percent").set(stats.hit_rate());

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
        .into_response()
}
