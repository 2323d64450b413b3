//! Extraction orchestration: run resolution, cached fetch and decode,
//! message selection and interpolation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use futures::{stream, StreamExt, TryStreamExt};
use grib_decoder::{DecodedFile, GribDecoder};
use icon_common::{
    CatalogError, FieldQuery, GeoPoint, ModelCatalog, ModelDefinition, ModelRun, ResolvedField,
    RunSelector, TimedPoint,
};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::cache::{RunCache, RunEntry, RunLease};
use crate::config::{ExtractionConfig, FetchConfig};
use crate::error::{ExtractError, Result};
use crate::fetch::{fetch_with_retry, latest_published_run, RunFetcher};
use crate::interpolation::{InterpolationConfig, Interpolator};
use crate::selector::MessageSelector;
use crate::types::{ExtractionResult, PointResult, RoutePointResult, RouteResult};

/// Field extraction over cached ICON runs.
///
/// Owns its [`RunCache`]; independent services never share cached state
/// unless built over the same cache with [`ExtractionService::with_cache`].
pub struct ExtractionService {
    catalog: Arc<ModelCatalog>,
    fetcher: Arc<dyn RunFetcher>,
    decoder: Arc<dyn GribDecoder>,
    model_decoders: HashMap<String, Arc<dyn GribDecoder>>,
    cache: RunCache,
    config: ExtractionConfig,
    /// Latest reference time per model and when it was resolved.
    latest: RwLock<HashMap<String, (DateTime<Utc>, Instant)>>,
}

impl ExtractionService {
    pub fn new(
        catalog: Arc<ModelCatalog>,
        fetcher: Arc<dyn RunFetcher>,
        decoder: Arc<dyn GribDecoder>,
        config: ExtractionConfig,
    ) -> Self {
        let cache = RunCache::new(config.cache);
        Self {
            catalog,
            fetcher,
            decoder,
            model_decoders: HashMap::new(),
            cache,
            config,
            latest: RwLock::new(HashMap::new()),
        }
    }

    /// Use `cache` instead of the service's own.
    pub fn with_cache(mut self, cache: RunCache) -> Self {
        self.cache = cache;
        self
    }

    /// Decoder for one model's files, e.g. one that knows its parameter
    /// table or grid. Other models use the default decoder.
    pub fn with_model_decoder(
        mut self,
        model: impl Into<String>,
        decoder: Arc<dyn GribDecoder>,
    ) -> Self {
        self.model_decoders.insert(model.into(), decoder);
        self
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn cache(&self) -> &RunCache {
        &self.cache
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// The concrete run a query targets.
    ///
    /// `Latest` asks the fetch collaborator which runs are published, reusing
    /// the answer for `latest_run_ttl`. A query with a valid time gets the
    /// step between the run's reference time and that valid time.
    pub async fn resolve_run(&self, model: &str, query: &FieldQuery) -> Result<ModelRun> {
        let definition = self.catalog.model(model)?;
        if query.valid_time.is_none() {
            definition
                .check_step(query.step_or_default())
                .map_err(invalid_step)?;
        }

        let reference_time = self.resolve_reference(model, query.run).await?;
        let step = resolve_step(definition, query, reference_time)?;
        Ok(ModelRun::new(model, reference_time, step)?)
    }

    /// Reference time a run selector points at.
    pub async fn resolve_reference(&self, model: &str, run: RunSelector) -> Result<DateTime<Utc>> {
        match run {
            RunSelector::At(reference_time) => Ok(reference_time),
            RunSelector::Latest => self.latest_run(model).await,
        }
    }

    async fn latest_run(&self, model: &str) -> Result<DateTime<Utc>> {
        let ttl = self.config.fetch.latest_run_ttl;
        if !ttl.is_zero() {
            if let Some((reference_time, resolved_at)) = self.latest.read().await.get(model) {
                if resolved_at.elapsed() < ttl {
                    return Ok(*reference_time);
                }
            }
        }

        let reference_time =
            latest_published_run(self.fetcher.as_ref(), model, &self.config.fetch).await?;
        if !ttl.is_zero() {
            self.latest
                .write()
                .await
                .insert(model.to_string(), (reference_time, Instant::now()));
        }
        Ok(reference_time)
    }

    /// Extract `query` at `points` using the configured interpolation.
    pub async fn extract(
        &self,
        model: &str,
        query: &FieldQuery,
        points: &[GeoPoint],
    ) -> Result<ExtractionResult> {
        self.extract_with(model, query, points, None).await
    }

    /// Extract `query` at `points`, optionally overriding the interpolation.
    ///
    /// Unknown parameters, unsupported levels and invalid points fail before
    /// any fetch. A parameter or level missing from the run's file fails the
    /// whole request; points outside the grid only mark their own result.
    #[instrument(skip(self, query, points, interpolation), fields(parameter = %query.parameter, points = points.len()))]
    pub async fn extract_with(
        &self,
        model: &str,
        query: &FieldQuery,
        points: &[GeoPoint],
        interpolation: Option<InterpolationConfig>,
    ) -> Result<ExtractionResult> {
        let field = self.catalog.resolve(model, query)?;
        validate_points(points)?;
        let interpolator = self.interpolator(interpolation)?;

        let run = self.resolve_run(model, query).await?;
        self.extract_field(&run, &field, points, &interpolator).await
    }

    /// Extract several fields at the same points.
    ///
    /// Fields missing from their run's file yield a result whose points all
    /// carry `parameter-unavailable-for-run` instead of failing the batch.
    #[instrument(skip(self, queries, points), fields(fields = queries.len(), points = points.len()))]
    pub async fn extract_batch(
        &self,
        model: &str,
        queries: &[FieldQuery],
        points: &[GeoPoint],
    ) -> Result<Vec<ExtractionResult>> {
        let fields = queries
            .iter()
            .map(|query| self.catalog.resolve(model, query))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        validate_points(points)?;
        let interpolator = self.interpolator(None)?;

        let extractions = queries.iter().zip(&fields).map(|(query, field)| {
            let interpolator = &interpolator;
            async move {
                let run = self.resolve_run(model, query).await?;
                let outcome = self.extract_field(&run, field, points, interpolator).await;
                match outcome {
                    Err(err) if err.is_query_resolution() => {
                        debug!(run = %run, parameter = %field.parameter.short_name, error = %err, "Field unavailable");
                        Ok(ExtractionResult {
                            run,
                            parameter: field.parameter.short_name.clone(),
                            level: field.level,
                            units: field.parameter.units.clone(),
                            interpolation: interpolator.config().method,
                            points: points.iter().copied().map(PointResult::unavailable).collect(),
                        })
                    }
                    other => other,
                }
            }
        });

        try_join_all(extractions).await
    }

    /// Extract one field along a route whose points may each carry their
    /// own valid time.
    ///
    /// All points come from the run `query` selects. A point without a time
    /// uses the query's step or valid time. Points are grouped by step, so
    /// each step is fetched and decoded once however many points share it;
    /// a time that is not on the model's step grid fails the request before
    /// any fetch.
    #[instrument(skip(self, query, points, interpolation), fields(parameter = %query.parameter, points = points.len()))]
    pub async fn extract_route(
        &self,
        model: &str,
        query: &FieldQuery,
        points: &[TimedPoint],
        interpolation: Option<InterpolationConfig>,
    ) -> Result<RouteResult> {
        let field = self.catalog.resolve(model, query)?;
        let geo: Vec<GeoPoint> = points.iter().map(TimedPoint::point).collect();
        validate_points(&geo)?;
        let interpolator = self.interpolator(interpolation)?;
        let run = self.resolve_run(model, query).await?;
        let definition = self.catalog.model(model)?;

        let mut groups: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for (i, point) in points.iter().enumerate() {
            let step = match point.time {
                Some(time) => definition
                    .step_for_valid_time(run.reference_time(), time)
                    .map_err(|e| ExtractError::InvalidQuery(format!("point {}: {}", i, e)))?,
                None => run.step(),
            };
            groups.entry(step).or_default().push(i);
        }
        debug!(run = %run, steps = groups.len(), "Grouped route points by step");

        let field = &field;
        let interpolator = &interpolator;
        let geo = &geo;
        let reference_time = run.reference_time();
        let extracted: Vec<(Vec<usize>, ExtractionResult)> = stream::iter(groups)
            .map(|(step, members)| async move {
                let group_run = ModelRun::new(model, reference_time, step)?;
                let group_points: Vec<GeoPoint> = members.iter().map(|i| geo[*i]).collect();
                let result = self
                    .extract_field(&group_run, field, &group_points, interpolator)
                    .await?;
                Ok::<_, ExtractError>((members, result))
            })
            .buffered(self.concurrent_steps())
            .try_collect()
            .await?;

        let mut slots: Vec<Option<RoutePointResult>> = vec![None; points.len()];
        for (members, result) in extracted {
            let step = result.run.step();
            let valid_time = result.run.valid_time();
            for (i, point) in members.into_iter().zip(result.points) {
                slots[i] = Some(RoutePointResult {
                    point: point.point,
                    step,
                    valid_time,
                    value: point.value,
                    status: point.status,
                });
            }
        }

        Ok(RouteResult {
            model: model.to_string(),
            reference_time,
            step: run.step(),
            parameter: field.parameter.short_name.clone(),
            level: field.level,
            units: field.parameter.units.clone(),
            interpolation: interpolator.config().method,
            points: slots.into_iter().flatten().collect(),
        })
    }

    /// Extract one field at the same points for several steps of one run.
    ///
    /// Returns one result per step in the order given. Every step is checked
    /// against the model's step grid before the run is resolved.
    #[instrument(skip(self, query, points, steps, interpolation), fields(parameter = %query.parameter, steps = steps.len()))]
    pub async fn extract_series(
        &self,
        model: &str,
        query: &FieldQuery,
        points: &[GeoPoint],
        steps: &[u32],
        interpolation: Option<InterpolationConfig>,
    ) -> Result<Vec<ExtractionResult>> {
        let field = self.catalog.resolve(model, query)?;
        validate_points(points)?;
        let interpolator = self.interpolator(interpolation)?;
        if steps.is_empty() {
            return Err(ExtractError::InvalidQuery(
                "a series needs at least one step".to_string(),
            ));
        }
        let definition = self.catalog.model(model)?;
        for step in steps {
            definition.check_step(*step).map_err(invalid_step)?;
        }

        let reference_time = self.resolve_reference(model, query.run).await?;
        let field = &field;
        let interpolator = &interpolator;
        stream::iter(steps.iter().copied())
            .map(|step| async move {
                let run = ModelRun::new(model, reference_time, step)?;
                self.extract_field(&run, field, points, interpolator).await
            })
            .buffered(self.concurrent_steps())
            .try_collect()
            .await
    }

    /// Lease the cached entry for `run`, fetching and opening it if absent.
    pub async fn lease(&self, run: &ModelRun) -> Result<RunLease> {
        let fetcher = self.fetcher.clone();
        let decoder = self.decoder_for(run.model());
        let fetch = self.config.fetch;
        let target = run.clone();

        self.cache
            .get_or_populate(run, move || populate(fetcher, decoder, target, fetch))
            .await
    }

    async fn extract_field(
        &self,
        run: &ModelRun,
        field: &ResolvedField,
        points: &[GeoPoint],
        interpolator: &Interpolator,
    ) -> Result<ExtractionResult> {
        let mut result = ExtractionResult {
            run: run.clone(),
            parameter: field.parameter.short_name.clone(),
            level: field.level,
            units: field.parameter.units.clone(),
            interpolation: interpolator.config().method,
            points: Vec::with_capacity(points.len()),
        };
        if points.is_empty() {
            return Ok(result);
        }

        let lease = self.lease(run).await?;
        let index = MessageSelector::select(lease.messages(), field, run)?;
        let decoded = lease.field(index).await?;

        result.points = interpolator
            .interpolate_many(&decoded.values, &decoded.grid, points)
            .into_iter()
            .zip(points)
            .map(|(value, point)| PointResult::from_value(*point, value))
            .collect();

        debug!(
            run = %run,
            parameter = %result.parameter,
            level = %result.level,
            ok = result.ok_count(),
            total = result.points.len(),
            "Extracted field"
        );
        Ok(result)
    }

    /// Steps fetched at once by route and series extraction. Bounded by the
    /// cache capacity so one request does not evict its own steps.
    fn concurrent_steps(&self) -> usize {
        self.cache.config().capacity.clamp(1, MAX_CONCURRENT_STEPS)
    }

    fn interpolator(&self, interpolation: Option<InterpolationConfig>) -> Result<Interpolator> {
        let config = interpolation.unwrap_or(self.config.interpolation);
        config.validate().map_err(ExtractError::InvalidQuery)?;
        Ok(Interpolator::new(config))
    }

    fn decoder_for(&self, model: &str) -> Arc<dyn GribDecoder> {
        self.model_decoders
            .get(model)
            .cloned()
            .unwrap_or_else(|| self.decoder.clone())
    }
}

const MAX_CONCURRENT_STEPS: usize = 4;

fn invalid_step(err: CatalogError) -> ExtractError {
    ExtractError::InvalidQuery(err.to_string())
}

/// Step of `query` against the run at `reference_time`. An explicit step
/// must agree with the valid time when both are given.
fn resolve_step(
    definition: &ModelDefinition,
    query: &FieldQuery,
    reference_time: DateTime<Utc>,
) -> Result<u32> {
    let Some(valid_time) = query.valid_time else {
        return Ok(query.step_or_default());
    };

    let step = definition
        .step_for_valid_time(reference_time, valid_time)
        .map_err(invalid_step)?;
    match query.step {
        Some(requested) if requested != step => Err(ExtractError::InvalidQuery(format!(
            "step {} does not match valid time {} (step {})",
            requested,
            valid_time.to_rfc3339(),
            step
        ))),
        _ => Ok(step),
    }
}

fn validate_points(points: &[GeoPoint]) -> Result<()> {
    for (i, point) in points.iter().enumerate() {
        point
            .validate()
            .map_err(|e| ExtractError::InvalidQuery(format!("point {}: {}", i, e)))?;
    }
    Ok(())
}

/// Fetch and open one run. Runs on the cache's population task.
async fn populate(
    fetcher: Arc<dyn RunFetcher>,
    decoder: Arc<dyn GribDecoder>,
    run: ModelRun,
    fetch: FetchConfig,
) -> Result<RunEntry> {
    let bytes = fetch_with_retry(fetcher.as_ref(), &run, &fetch).await?;
    let file = open(decoder, bytes, &fetch).await?;
    debug!(run = %run, messages = file.messages().len(), "Opened run");
    Ok(RunEntry::new(run, file, fetch.decode_timeout))
}

async fn open(
    decoder: Arc<dyn GribDecoder>,
    bytes: Bytes,
    fetch: &FetchConfig,
) -> Result<Arc<dyn DecodedFile>> {
    let opening = tokio::task::spawn_blocking(move || decoder.open(bytes));
    match tokio::time::timeout(fetch.decode_timeout, opening).await {
        Err(_) => Err(ExtractError::Timeout {
            operation: "decode",
            timeout: fetch.decode_timeout,
        }),
        Ok(Err(e)) => Err(ExtractError::Internal(format!("decode task failed: {}", e))),
        Ok(Ok(opened)) => Ok(opened?),
    }
}
