use std::collections::BTreeMap;
use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, get_service};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::app::AppContext;
use crate::dataset::{DatasetSummary, MetricAvailability, UnifiedRow};
use crate::error::DatasetError;
use crate::reader;

pub fn create_router(ctx: AppContext) -> Router {
    let static_dir = ctx.config.http.static_dir.clone();
    let cors_permissive = ctx.config.http.cors_permissive;

    let asset_service = get_service(ServeDir::new(static_dir));

    let bess = Router::new()
        .route("/devices", get(get_devices))
        .route("/:device_id", get(get_device_data))
        .route("/:device_id/stream", get(stream_device_data))
        .route("/:device_id/summary", get(get_device_summary))
        .route("/:device_id/metrics", get(get_device_metrics));

    let router = Router::new()
        .route("/", get(get_api_info))
        .route("/healthz", get(get_healthz))
        .route("/metrics", get(get_metrics))
        .nest("/bess", bess)
        .fallback_service(asset_service)
        .layer(TraceLayer::new_for_http());

    let router = if cors_permissive {
        router.layer(CorsLayer::permissive())
    } else {
        router
    };
    router.with_state(ctx)
}

/// Error body shared by every endpoint: `{"detail": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Dataset(DatasetError),
}

impl From<DatasetError> for ApiError {
    fn from(err: DatasetError) -> Self {
        ApiError::Dataset(err)
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, detail),
            ApiError::Dataset(err) if err.is_not_found() => (StatusCode::NOT_FOUND, err.to_string()),
            ApiError::Dataset(err) => {
                error!(error = %err, "dataset request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Error processing BESS data: {err}"),
                )
            }
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct DataParams {
    #[serde(alias = "batchSize")]
    batch_size: Option<usize>,
    #[serde(default)]
    skip: usize,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamParams {
    interval: Option<f64>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PeriodParams {
    date: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BessResponse {
    pub device_id: String,
    /// Rows in this page, not in the whole table.
    pub total_records: usize,
    pub batch_size: usize,
    pub data: Vec<UnifiedRow>,
}

#[derive(Debug, Serialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub available_metrics: Vec<&'static str>,
    pub total_rows_per_metric: BTreeMap<&'static str, usize>,
}

#[derive(Debug, Serialize)]
pub struct DevicesResponse {
    pub devices: Vec<DeviceInfo>,
}

/// `YYYY-MM` or `YYYY-MM-DD`, digits only. Calendar validity is checked later.
fn is_period_shaped(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    let digits = |range: std::ops::Range<usize>| bytes[range].iter().all(u8::is_ascii_digit);
    match bytes.len() {
        7 => digits(0..4) && bytes[4] == b'-' && digits(5..7),
        10 => digits(0..4) && bytes[4] == b'-' && digits(5..7) && bytes[7] == b'-' && digits(8..10),
        _ => false,
    }
}

fn validate_date(date: Option<String>) -> Result<Option<String>, ApiError> {
    match date {
        Some(raw) if !is_period_shaped(&raw) => Err(ApiError::BadRequest(format!(
            "date `{raw}` must match YYYY-MM or YYYY-MM-DD"
        ))),
        other => Ok(other),
    }
}

async fn get_api_info() -> Json<serde_json::Value> {
    Json(json!({
        "name": "BESS Battery Energy Storage System API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Unified time-aligned BESS data access",
        "endpoints": {
            "devices": "/bess/devices",
            "data": "/bess/{device_id}",
            "stream": "/bess/{device_id}/stream",
            "summary": "/bess/{device_id}/summary",
            "metrics": "/bess/{device_id}/metrics",
            "health": "/healthz",
            "prometheus": "/metrics",
        },
    }))
}

async fn get_healthz(State(ctx): State<AppContext>) -> StatusCode {
    if ctx.builder().data_dir().is_dir() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn get_metrics(State(ctx): State<AppContext>) -> Response {
    match ctx.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => {
            warn!(error = ?err, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

/// Devices whose automatic dataset builds; others are skipped with a warning.
async fn get_devices(State(ctx): State<AppContext>) -> Result<Json<DevicesResponse>, ApiError> {
    let device_ids = ctx.builder().list_devices().map_err(|err| {
        DatasetError::Internal(format!(
            "failed to list {}: {err}",
            ctx.builder().data_dir().display()
        ))
    })?;

    let mut devices = Vec::with_capacity(device_ids.len());
    for device_id in device_ids {
        match ctx.datasets.get_or_build(&device_id, None).await {
            Ok(dataset) => devices.push(DeviceInfo {
                device_id,
                available_metrics: dataset.metrics.clone(),
                total_rows_per_metric: dataset.rows_per_metric(),
            }),
            Err(err) => warn!(device_id, error = %err, "skipping device without usable data"),
        }
    }
    Ok(Json(DevicesResponse { devices }))
}

async fn get_device_data(
    State(ctx): State<AppContext>,
    Path(device_id): Path<String>,
    params: Result<Query<DataParams>, QueryRejection>,
) -> Result<Json<BessResponse>, ApiError> {
    let Query(params) = params?;
    let limits = &ctx.config.api;
    let batch_size = params.batch_size.unwrap_or(limits.default_batch_size);
    if batch_size == 0 || batch_size > limits.max_batch_size {
        return Err(ApiError::BadRequest(format!(
            "batch_size must be between 1 and {}",
            limits.max_batch_size
        )));
    }
    let date = validate_date(params.date)?;

    let dataset = ctx.datasets.get_or_build(&device_id, date.as_deref()).await?;
    let data = reader::batch(&dataset, batch_size, params.skip).to_vec();
    Ok(Json(BessResponse {
        device_id,
        total_records: data.len(),
        batch_size,
        data,
    }))
}

async fn stream_device_data(
    State(ctx): State<AppContext>,
    Path(device_id): Path<String>,
    params: Result<Query<StreamParams>, QueryRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let Query(params) = params?;
    let limits = &ctx.config.stream;
    let interval = match params.interval {
        None => limits.default_interval,
        Some(secs) => {
            let in_range = secs.is_finite()
                && secs >= limits.min_interval.as_secs_f64()
                && secs <= limits.max_interval.as_secs_f64();
            if !in_range {
                return Err(ApiError::BadRequest(format!(
                    "interval must be between {} and {} seconds",
                    limits.min_interval.as_secs_f64(),
                    limits.max_interval.as_secs_f64()
                )));
            }
            Duration::from_secs_f64(secs)
        }
    };
    let date = validate_date(params.date)?;

    let dataset = ctx.datasets.get_or_build(&device_id, date.as_deref()).await?;
    info!(device_id, interval_ms = interval.as_millis() as u64, rows = dataset.len(), "opening row stream");

    let metrics = ctx.metrics.clone();
    let rows = reader::row_stream(dataset, interval);
    let events = async_stream::stream! {
        let _guard = metrics.stream_opened();
        let mut rows = std::pin::pin!(rows);
        while let Some(row) = rows.next().await {
            match Event::default().json_data(&row) {
                Ok(event) => {
                    metrics.inc_stream_row(&device_id);
                    yield Ok::<Event, Infallible>(event);
                }
                Err(err) => {
                    error!(device_id, error = %err, "failed to encode stream row");
                    break;
                }
            }
        }
    };

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn get_device_summary(
    State(ctx): State<AppContext>,
    Path(device_id): Path<String>,
    params: Result<Query<PeriodParams>, QueryRejection>,
) -> Result<Json<DatasetSummary>, ApiError> {
    let Query(params) = params?;
    let date = validate_date(params.date)?;
    let dataset = ctx.datasets.get_or_build(&device_id, date.as_deref()).await?;
    Ok(Json(dataset.summary()))
}

async fn get_device_metrics(
    State(ctx): State<AppContext>,
    Path(device_id): Path<String>,
    params: Result<Query<PeriodParams>, QueryRejection>,
) -> Result<Json<MetricAvailability>, ApiError> {
    let Query(params) = params?;
    let date = validate_date(params.date)?;
    let dataset = ctx.datasets.get_or_build(&device_id, date.as_deref()).await?;
    Ok(Json(dataset.availability()))
}
