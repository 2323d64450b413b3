//! Extraction API Server
//!
//! Serves point values of ICON model fields over HTTP.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dwd_fetch::{DwdConfig, DwdOpenDataFetcher, LocalDirFetcher};
use extraction::{ExtractionConfig, ExtractionService, RunFetcher};
use grib_decoder::GribCrateDecoder;
use icon_common::ModelCatalog;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use extract_api::build_router;
use extract_api::state::AppState;

/// Extraction API Server
#[derive(Parser, Debug)]
#[command(name = "extract-api")]
#[command(about = "Point extraction server for DWD ICON model data")]
struct Args {
    /// Listen address
    #[arg(short, long, default_value = "0.0.0.0:8090", env = "EXTRACT_LISTEN_ADDR")]
    listen: String,

    /// Log level
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Number of worker threads
    #[arg(long, env = "EXTRACT_WORKER_THREADS")]
    worker_threads: Option<usize>,

    /// Where runs come from: `dwd` for the DWD open-data server, or a local
    /// directory laid out as {model}/{YYYYMMDDHH}/{SSS}.grib2[.bz2]
    #[arg(long, default_value = "dwd", env = "ICON_SOURCE")]
    source: String,

    /// Directory of additional model definitions (YAML)
    #[arg(long, env = "ICON_CATALOG_DIR")]
    catalog_dir: Option<PathBuf>,

    /// Seconds between expired-run sweeps
    #[arg(long, default_value = "60", env = "ICON_SWEEP_INTERVAL_SECS")]
    sweep_interval_secs: u64,
}

fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_all();

    if let Some(threads) = args.worker_threads {
        runtime_builder.worker_threads(threads);
    }

    let runtime = runtime_builder
        .build()
        .context("Failed to create Tokio runtime")?;

    runtime.block_on(run_server(args))
}

async fn run_server(args: Args) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .json()
        .init();

    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;
    info!("Prometheus metrics exporter initialized");

    info!("Starting extraction API server");

    let config = ExtractionConfig::from_env();
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("Invalid extraction configuration")?;

    let catalog = Arc::new(match &args.catalog_dir {
        Some(dir) => ModelCatalog::load_from_dir(dir)
            .with_context(|| format!("Failed to load model catalog from {}", dir.display()))?,
        None => ModelCatalog::builtin(),
    });

    let fetcher: Arc<dyn RunFetcher> = if args.source == "dwd" {
        let dwd = DwdOpenDataFetcher::new(catalog.clone(), DwdConfig::from_env())
            .context("Failed to create DWD fetcher")?;
        Arc::new(dwd)
    } else {
        Arc::new(LocalDirFetcher::new(&args.source))
    };

    let mut service = ExtractionService::new(
        catalog.clone(),
        fetcher,
        Arc::new(GribCrateDecoder::new()),
        config.clone(),
    );
    for name in catalog.model_names() {
        let model = catalog.model(name)?.clone();
        service = service.with_model_decoder(name, Arc::new(GribCrateDecoder::for_model(model)));
    }

    info!(
        source = %args.source,
        models = ?catalog.model_names(),
        cache_capacity = config.cache.capacity,
        cache_ttl_secs = config.cache.ttl.as_secs(),
        interpolation = %config.interpolation.method,
        "Extraction service configured"
    );

    let state = Arc::new(AppState::new(service).with_prometheus(prometheus));
    let _sweep = state.spawn_expiry_sweep(Duration::from_secs(args.sweep_interval_secs.max(1)));

    let app = build_router(state);

    let addr: SocketAddr = args
        .listen
        .parse()
        .with_context(|| format!("Invalid listen address {}", args.listen))?;

    info!("Extraction API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await.context("Server failed")?;
    Ok(())
}
