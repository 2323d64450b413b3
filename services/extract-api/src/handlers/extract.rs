//! Point, route and series extraction handlers.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    Json,
};
use chrono::{DateTime, Utc};
use extraction::{
    ExtractError, ExtractionResult, InterpolationConfig, InterpolationMethod, PointStatus,
    RouteResult,
};
use icon_common::{FieldQuery, GeoPoint, Level, TimedPoint};
use metrics::{counter, histogram};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

/// Hours covered by a series request without `to_step`.
const DEFAULT_SERIES_HOURS: u32 = 48;

/// Body of `POST /extract/:model/:parameter`.
#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    /// Vertical level; defaults to the parameter's usual level.
    #[serde(default)]
    pub level: Option<Level>,
    /// Reference time of the run; defaults to the latest published run.
    #[serde(default)]
    pub run: Option<DateTime<Utc>>,
    /// Forecast step in hours; defaults to 0.
    #[serde(default)]
    pub step: Option<u32>,
    /// Valid time for points without their own `time`.
    #[serde(default)]
    pub valid_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub interpolation: Option<InterpolationMethod>,
    /// Neighbour count for inverse-distance weighting.
    #[serde(default)]
    pub neighbours: Option<usize>,
    /// Points, each optionally carrying its own valid `time`.
    pub points: Points<TimedPoint>,
}

/// Body of `POST /series/:model/:parameter`.
#[derive(Debug, Deserialize)]
pub struct SeriesRequest {
    #[serde(default)]
    pub level: Option<Level>,
    #[serde(default)]
    pub run: Option<DateTime<Utc>>,
    /// First step, default 0.
    #[serde(default)]
    pub from_step: Option<u32>,
    /// Last step (inclusive); defaults to 48 hours after `from_step`,
    /// capped at the model's last step.
    #[serde(default)]
    pub to_step: Option<u32>,
    #[serde(default)]
    pub interpolation: Option<InterpolationMethod>,
    #[serde(default)]
    pub neighbours: Option<usize>,
    pub points: Points<GeoPoint>,
}

/// A single point or a list of points.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
#[serde(bound = "P: DeserializeOwned")]
pub enum Points<P> {
    Many(Vec<P>),
    One(P),
}

impl<P> Points<P> {
    fn into_vec(self) -> Vec<P> {
        match self {
            Points::Many(points) => points,
            Points::One(point) => vec![point],
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PointRecord {
    pub lat: f64,
    pub lon: f64,
    pub step: u32,
    pub valid_time: DateTime<Utc>,
    pub value: Option<f32>,
    pub status: PointStatus,
}

#[derive(Debug, Serialize)]
pub struct ExtractResponse {
    pub model: String,
    pub run: DateTime<Utc>,
    /// Step of points without their own time.
    pub step: u32,
    pub valid_time: DateTime<Utc>,
    pub parameter: String,
    pub level: Level,
    pub units: String,
    pub interpolation: InterpolationMethod,
    pub results: Vec<PointRecord>,
}

impl From<RouteResult> for ExtractResponse {
    fn from(result: RouteResult) -> Self {
        let valid_time = result.reference_time + chrono::Duration::hours(i64::from(result.step));
        Self {
            model: result.model,
            run: result.reference_time,
            step: result.step,
            valid_time,
            parameter: result.parameter,
            level: result.level,
            units: result.units,
            interpolation: result.interpolation,
            results: result
                .points
                .into_iter()
                .map(|p| PointRecord {
                    lat: p.point.lat,
                    lon: p.point.lon,
                    step: p.step,
                    valid_time: p.valid_time,
                    value: p.value,
                    status: p.status,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SeriesPointRecord {
    pub lat: f64,
    pub lon: f64,
    pub value: Option<f32>,
    pub status: PointStatus,
}

#[derive(Debug, Serialize)]
pub struct SeriesStep {
    pub step: u32,
    pub valid_time: DateTime<Utc>,
    pub results: Vec<SeriesPointRecord>,
}

impl From<ExtractionResult> for SeriesStep {
    fn from(result: ExtractionResult) -> Self {
        Self {
            step: result.run.step(),
            valid_time: result.run.valid_time(),
            results: result
                .points
                .into_iter()
                .map(|p| SeriesPointRecord {
                    lat: p.point.lat,
                    lon: p.point.lon,
                    value: p.value,
                    status: p.status,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SeriesResponse {
    pub model: String,
    pub run: DateTime<Utc>,
    pub parameter: String,
    pub level: Level,
    pub units: String,
    pub interpolation: InterpolationMethod,
    pub steps: Vec<SeriesStep>,
}

/// POST /extract/:model/:parameter
pub async fn extract_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((model, parameter)): Path<(String, String)>,
    body: Result<Json<ExtractRequest>, JsonRejection>,
) -> Result<Json<ExtractResponse>, ApiError> {
    counter!("icon_extract_requests_total", "endpoint" => "extract").increment(1);
    let started = Instant::now();
    let Json(request) = body.map_err(|e| ExtractError::InvalidQuery(e.body_text()))?;

    let mut query = field_query(parameter, request.level, request.run);
    query.step = request.step;
    query.valid_time = request.valid_time;
    let interpolation = interpolation_override(&state, request.interpolation, request.neighbours);

    let points = request.points.into_vec();
    tracing::debug!(
        model = %model,
        parameter = %query.parameter,
        points = points.len(),
        timed = points.iter().filter(|p| p.time.is_some()).count(),
        "Extract request"
    );

    let result = state
        .service
        .extract_route(&model, &query, &points, interpolation)
        .await?;
    histogram!("icon_extract_request_seconds", "endpoint" => "extract")
        .record(started.elapsed().as_secs_f64());
    Ok(Json(result.into()))
}

/// POST /series/:model/:parameter
pub async fn series_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((model, parameter)): Path<(String, String)>,
    body: Result<Json<SeriesRequest>, JsonRejection>,
) -> Result<Json<SeriesResponse>, ApiError> {
    counter!("icon_extract_requests_total", "endpoint" => "series").increment(1);
    let started = Instant::now();
    let Json(request) = body.map_err(|e| ExtractError::InvalidQuery(e.body_text()))?;

    let definition = state.service.catalog().model(&model).map_err(ExtractError::from)?;
    let from_step = request.from_step.unwrap_or(0);
    let to_step = request
        .to_step
        .unwrap_or_else(|| from_step.saturating_add(DEFAULT_SERIES_HOURS).min(definition.max_step));
    if to_step > definition.max_step {
        return Err(ExtractError::InvalidQuery(format!(
            "to_step {} exceeds {}'s maximum of {}",
            to_step, model, definition.max_step
        ))
        .into());
    }
    let steps = definition.published_steps(from_step, to_step);

    let query = field_query(parameter, request.level, request.run);
    let interpolation = interpolation_override(&state, request.interpolation, request.neighbours);
    let points = request.points.into_vec();
    tracing::debug!(
        model = %model,
        parameter = %query.parameter,
        points = points.len(),
        steps = steps.len(),
        "Series request"
    );

    let series = state
        .service
        .extract_series(&model, &query, &points, &steps, interpolation)
        .await?;

    // extract_series rejects an empty step list, so there is a first result.
    let first = series
        .first()
        .ok_or_else(|| ExtractError::Internal("empty series".to_string()))?;
    histogram!("icon_extract_request_seconds", "endpoint" => "series")
        .record(started.elapsed().as_secs_f64());
    Ok(Json(SeriesResponse {
        model: model.clone(),
        run: first.run.reference_time(),
        parameter: first.parameter.clone(),
        level: first.level,
        units: first.units.clone(),
        interpolation: first.interpolation,
        steps: series.into_iter().map(SeriesStep::from).collect(),
    }))
}

fn field_query(parameter: String, level: Option<Level>, run: Option<DateTime<Utc>>) -> FieldQuery {
    let mut query = FieldQuery::new(parameter);
    query.level = level;
    if let Some(run) = run {
        query = query.at_run(run);
    }
    query
}

fn interpolation_override(
    state: &AppState,
    method: Option<InterpolationMethod>,
    neighbours: Option<usize>,
) -> Option<InterpolationConfig> {
    if method.is_none() && neighbours.is_none() {
        return None;
    }
    let mut config = state.service.config().interpolation;
    if let Some(method) = method {
        config.method = method;
    }
    if let Some(neighbours) = neighbours {
        config.neighbours = neighbours;
    }
    Some(config)
}
