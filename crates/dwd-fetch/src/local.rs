//! Runs mirrored to a local directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use extraction::{FetchError, RunFetcher};
use icon_common::ModelRun;
use tracing::debug;

use crate::decompress::{decompress_bz2, is_bz2};

/// Serves runs from `{root}/{model}/{YYYYMMDDHH}/{SSS}.grib2`, optionally
/// bz2-compressed as `{SSS}.grib2.bz2`.
#[derive(Debug, Clone)]
pub struct LocalDirFetcher {
    root: PathBuf,
}

impl LocalDirFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every step of `run`.
    pub fn run_dir(&self, run: &ModelRun) -> PathBuf {
        self.root.join(run.model()).join(run.run_id())
    }

    /// Uncompressed file path of `run`'s step.
    pub fn step_path(&self, run: &ModelRun) -> PathBuf {
        self.run_dir(run).join(format!("{:03}.grib2", run.step()))
    }
}

#[async_trait]
impl RunFetcher for LocalDirFetcher {
    async fn fetch(&self, run: &ModelRun) -> Result<Bytes, FetchError> {
        let plain = self.step_path(run);
        let mut compressed = plain.clone().into_os_string();
        compressed.push(".bz2");
        let compressed = PathBuf::from(compressed);

        for path in [plain, compressed] {
            match tokio::fs::read(&path).await {
                Ok(data) => {
                    debug!(path = %path.display(), bytes = data.len(), "Read run file");
                    if !is_bz2(&data) {
                        return Ok(Bytes::from(data));
                    }
                    let plain = tokio::task::spawn_blocking(move || decompress_bz2(&data))
                        .await
                        .map_err(|e| FetchError::Permanent(format!("decompression task failed: {}", e)))?
                        .map_err(|e| {
                            FetchError::Permanent(format!("{}: bz2 decompression failed: {}", path.display(), e))
                        })?;
                    return Ok(Bytes::from(plain));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(FetchError::Transient(format!("{}: {}", path.display(), e)));
                }
            }
        }

        Err(FetchError::NotAvailable(format!(
            "{} not found under {}",
            run,
            self.root.display()
        )))
    }

    async fn published_runs(&self, model: &str) -> Result<Vec<DateTime<Utc>>, FetchError> {
        let dir = self.root.join(model);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(FetchError::Transient(format!("{}: {}", dir.display(), e))),
        };

        let mut runs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FetchError::Transient(format!("{}: {}", dir.display(), e)))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(reference_time) = parse_run_id(name) {
                runs.push(reference_time);
            }
        }

        runs.sort_unstable_by(|a, b| b.cmp(a));
        Ok(runs)
    }
}

/// Parse a `YYYYMMDDHH` directory name.
fn parse_run_id(name: &str) -> Option<DateTime<Utc>> {
    if name.len() != 10 || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(&format!("{}00", name), "%Y%m%d%H%M")
        .ok()
        .map(|naive| naive.and_utc())
}
