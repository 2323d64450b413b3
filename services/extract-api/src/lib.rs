//! ICON extraction HTTP service.
//!
//! A thin axum layer over [`extraction::ExtractionService`].

pub mod error;
pub mod handlers;
pub mod state;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Extension, Router};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

/// All routes with the standard middleware stack.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_handler))
        .route("/stats", get(handlers::health::stats_handler))
        .route("/metrics", get(handlers::health::metrics_handler))
        .route(
            "/extract/:model/:parameter",
            post(handlers::extract::extract_handler),
        )
        .route(
            "/series/:model/:parameter",
            post(handlers::extract::series_handler),
        )
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
}
