//! DWD open-data fetcher.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use extraction::{FetchError, RunFetcher};
use futures::stream::{self, StreamExt, TryStreamExt};
use icon_common::{Level, ModelCatalog, ModelDefinition, ModelRun, ParameterDefinition};
use reqwest::{Client, StatusCode};
use tracing::{debug, info, instrument, warn};

use crate::decompress::{decompress_bz2, is_bz2};

/// Root of the ICON directories on the DWD open-data server.
pub const DEFAULT_BASE_URL: &str = "https://opendata.dwd.de/weather/nwp";

/// Configuration for [`DwdOpenDataFetcher`].
#[derive(Debug, Clone)]
pub struct DwdConfig {
    pub base_url: String,
    /// Timeout of a single file download.
    pub request_timeout: Duration,
    /// Variable files downloaded in parallel per run.
    pub concurrent_downloads: usize,
    /// Runs the server keeps online; older runs are not offered.
    pub retained_runs: usize,
    /// Variables to download per model. Models not listed get every
    /// parameter of their catalog entry.
    pub variables: HashMap<String, Vec<String>>,
    /// Model levels downloaded for model-level parameters, per model.
    /// Models not listed get each parameter's default level.
    pub model_levels: HashMap<String, Vec<u32>>,
}

impl Default for DwdConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(60),
            concurrent_downloads: 4,
            retained_runs: 8,
            variables: HashMap::new(),
            model_levels: HashMap::new(),
        }
    }
}

impl DwdConfig {
    /// Load configuration from environment variables.
    ///
    /// `DWD_VARIABLES` and `DWD_MODEL_LEVELS` are comma-separated lists
    /// applied to every model.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("DWD_BASE_URL") {
            config.base_url = val.trim_end_matches('/').to_string();
        }
        if let Ok(val) = std::env::var("DWD_REQUEST_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.request_timeout = Duration::from_secs(secs);
            }
        }
        if let Ok(val) = std::env::var("DWD_CONCURRENT_DOWNLOADS") {
            if let Ok(n) = val.parse() {
                config.concurrent_downloads = n;
            }
        }
        if let Ok(val) = std::env::var("DWD_RETAINED_RUNS") {
            if let Ok(n) = val.parse() {
                config.retained_runs = n;
            }
        }
        if let Ok(val) = std::env::var("DWD_VARIABLES") {
            let variables: Vec<String> = val
                .split(',')
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect();
            for model in ICON_MODELS {
                config.variables.insert(model.to_string(), variables.clone());
            }
        }
        if let Ok(val) = std::env::var("DWD_MODEL_LEVELS") {
            let levels: Vec<u32> = val
                .split(',')
                .filter_map(|v| match v.trim().parse() {
                    Ok(level) => Some(level),
                    Err(_) => {
                        warn!(value = %v, "Ignoring unparseable model level");
                        None
                    }
                })
                .collect();
            for model in ICON_MODELS {
                config.model_levels.insert(model.to_string(), levels.clone());
            }
        }

        config
    }

    pub fn with_variables(mut self, model: impl Into<String>, variables: &[&str]) -> Self {
        self.variables.insert(
            model.into(),
            variables.iter().map(|v| v.to_string()).collect(),
        );
        self
    }

    pub fn with_model_levels(mut self, model: impl Into<String>, levels: &[u32]) -> Self {
        self.model_levels.insert(model.into(), levels.to_vec());
        self
    }
}

const ICON_MODELS: [&str; 3] = ["icon-global", "icon-eu", "icon-d2"];

/// One file of a run on the DWD server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DwdFile {
    pub variable: String,
    /// Model level of a per-level file; `None` for single-level files.
    pub model_level: Option<u32>,
}

impl DwdFile {
    pub fn single_level(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            model_level: None,
        }
    }

    pub fn model_level(variable: impl Into<String>, level: u32) -> Self {
        Self {
            variable: variable.into(),
            model_level: Some(level),
        }
    }
}

/// Fetches runs from `opendata.dwd.de`.
///
/// DWD publishes one bz2-compressed GRIB2 file per variable, run and step,
/// and for model-level variables one file per level. A fetch downloads every
/// configured file of the step, decompresses each and concatenates them in
/// configuration order. Files missing on the server are skipped; if none is
/// found the run is reported as not available.
pub struct DwdOpenDataFetcher {
    client: Client,
    catalog: Arc<ModelCatalog>,
    config: DwdConfig,
}

impl DwdOpenDataFetcher {
    pub fn new(catalog: Arc<ModelCatalog>, config: DwdConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(config.concurrent_downloads.max(1))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| FetchError::Permanent(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            catalog,
            config,
        })
    }

    /// URL of one variable file of `run`.
    pub fn file_url(&self, model: &ModelDefinition, run: &ModelRun, variable: &str) -> String {
        self.url(model, run, variable, model.dwd.file_name(&run.run_id(), run.step(), variable))
    }

    /// URL of one model-level file of `run`, if the model publishes them.
    pub fn model_level_url(
        &self,
        model: &ModelDefinition,
        run: &ModelRun,
        variable: &str,
        level: u32,
    ) -> Option<String> {
        let name = model
            .dwd
            .model_level_file_name(&run.run_id(), run.step(), level, variable)?;
        Some(self.url(model, run, variable, name))
    }

    fn url(&self, model: &ModelDefinition, run: &ModelRun, variable: &str, file_name: String) -> String {
        format!(
            "{}/{}/grib/{}/{}/{}",
            self.config.base_url,
            model.dwd.directory,
            run.run_hour(),
            variable.to_ascii_lowercase(),
            file_name
        )
    }

    fn model(&self, name: &str) -> Result<&ModelDefinition, FetchError> {
        self.catalog
            .model(name)
            .map_err(|e| FetchError::Permanent(e.to_string()))
    }

    /// Files to download for one step of `model`, in download order.
    pub fn files(&self, model: &ModelDefinition) -> Vec<DwdFile> {
        let variables: Vec<String> = match self.config.variables.get(&model.name) {
            Some(variables) => variables.clone(),
            None => model.parameters.iter().map(|p| p.short_name.clone()).collect(),
        };

        let mut files = Vec::with_capacity(variables.len());
        for variable in variables {
            match model.parameter(&variable) {
                Some(parameter) if !parameter.single_level => {
                    if model.dwd.model_level_template.is_none() {
                        warn!(model = %model.name, variable = %variable, "Model publishes no model-level files");
                        continue;
                    }
                    files.extend(
                        self.model_levels(model, parameter)
                            .into_iter()
                            .map(|level| DwdFile::model_level(variable.clone(), level)),
                    );
                }
                _ => files.push(DwdFile::single_level(variable)),
            }
        }
        files
    }

    fn model_levels(&self, model: &ModelDefinition, parameter: &ParameterDefinition) -> Vec<u32> {
        if let Some(levels) = self.config.model_levels.get(&model.name) {
            return levels.clone();
        }
        match parameter.default_level {
            Level::ModelLevel(level) => vec![level],
            _ => Vec::new(),
        }
    }

    fn file_url_for(&self, model: &ModelDefinition, run: &ModelRun, file: &DwdFile) -> Option<String> {
        match file.model_level {
            None => Some(self.file_url(model, run, &file.variable)),
            Some(level) => self.model_level_url(model, run, &file.variable, level),
        }
    }

    /// Download one file. `Ok(None)` when the server has no such file.
    async fn download(&self, url: &str) -> Result<Option<Bytes>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transient(format!("{}: {}", url, e)))?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Ok(None),
            status if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS => {
                return Err(FetchError::Transient(format!("{}: HTTP {}", url, status)))
            }
            status => return Err(FetchError::Permanent(format!("{}: HTTP {}", url, status))),
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transient(format!("{}: {}", url, e)))?;
        debug!(url = %url, bytes = body.len(), "Downloaded file");
        Ok(Some(body))
    }
}

#[async_trait]
impl RunFetcher for DwdOpenDataFetcher {
    #[instrument(skip(self), fields(run = %run))]
    async fn fetch(&self, run: &ModelRun) -> Result<Bytes, FetchError> {
        let model = self.model(run.model())?;
        let urls: Vec<String> = self
            .files(model)
            .iter()
            .filter_map(|file| self.file_url_for(model, run, file))
            .collect();
        if urls.is_empty() {
            return Err(FetchError::Permanent(format!(
                "no variables configured for {}",
                model.name
            )));
        }

        let requested = urls.len();
        let files: Vec<(String, Option<Bytes>)> = stream::iter(urls)
            .map(|url| async move {
                let body = self.download(&url).await?;
                Ok::<_, FetchError>((url, body))
            })
            .buffered(self.config.concurrent_downloads.max(1))
            .try_collect()
            .await?;

        let mut compressed = Vec::with_capacity(files.len());
        for (url, body) in files {
            match body {
                Some(body) => compressed.push(body),
                None => warn!(url = %url, "File not published"),
            }
        }
        if compressed.is_empty() {
            return Err(FetchError::NotAvailable(format!(
                "no files published for {}",
                run
            )));
        }

        let found = compressed.len();
        let stream = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, FetchError> {
            let mut out = Vec::new();
            for body in compressed {
                if is_bz2(&body) {
                    let plain = decompress_bz2(&body)
                        .map_err(|e| FetchError::Permanent(format!("bz2 decompression failed: {}", e)))?;
                    out.extend_from_slice(&plain);
                } else {
                    out.extend_from_slice(&body);
                }
            }
            Ok(out)
        })
        .await
        .map_err(|e| FetchError::Permanent(format!("decompression task failed: {}", e)))??;

        info!(
            run = %run,
            files = found,
            requested = requested,
            bytes = stream.len(),
            "Fetched run from DWD"
        );
        Ok(Bytes::from(stream))
    }

    async fn published_runs(&self, model: &str) -> Result<Vec<DateTime<Utc>>, FetchError> {
        let model = self.model(model)?;
        Ok(model
            .schedule
            .candidate_runs(Utc::now(), self.config.retained_runs.max(1)))
    }
}
