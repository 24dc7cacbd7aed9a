//! HTTP surface.
//!
//! `POST /forecast` accepts a multipart CSV upload and answers with the same
//! JSON the `forecast` command prints. Pipeline failures are ordinary `200`
//! responses carrying `{"error": ...}`; only a missing or unreadable upload is
//! rejected with a client error status.

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, Query, State,
        multipart::MultipartRejection,
        rejection::QueryRejection,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use log::{info, warn};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;

use crate::{
    limit::LimitRequest,
    outcome::{ForecastResponse, RequestOutcome},
    pipeline::ForecastPipeline,
};

const UPLOAD_FIELD: &str = "file";

#[derive(Clone)]
struct AppState {
    pipeline: ForecastPipeline,
}

#[derive(Debug, Default, Deserialize)]
pub struct ForecastQuery {
    pub max_rows: Option<usize>,
    pub max_products: Option<usize>,
}

impl From<ForecastQuery> for LimitRequest {
    fn from(query: ForecastQuery) -> Self {
        Self {
            max_rows: query.max_rows,
            max_groups: query.max_products,
        }
    }
}

pub fn router(pipeline: ForecastPipeline) -> Router {
    let body_limit = pipeline.config().max_upload_bytes;
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/forecast", post(forecast))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(AppState { pipeline })
}

pub async fn serve(pipeline: ForecastPipeline) -> Result<()> {
    let bind = pipeline.config().bind.clone();
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Binding HTTP listener on {bind}"))?;
    let local_addr = listener.local_addr()?;
    info!(
        "Serving forecasts on http://{local_addr}/forecast ({} worker(s), {}s per group)",
        pipeline.config().workers,
        pipeline.config().group_timeout_secs
    );
    axum::serve(listener, router(pipeline))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server terminated")
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown requested; draining in-flight requests");
    }
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({"message": "Forecast API is running!"}))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")}))
}

fn reject(status: StatusCode, message: String) -> Response {
    warn!("Rejected forecast request ({status}): {message}");
    (status, Json(ForecastResponse::Error { error: message })).into_response()
}

/// Body of the `file` field, or of the first field when none is named `file`.
async fn read_upload(mut multipart: Multipart) -> Result<Vec<u8>, (StatusCode, String)> {
    let mut first = None;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => return Err((upload_status(err.status()), err.body_text())),
        };
        let is_upload = field.name() == Some(UPLOAD_FIELD);
        let bytes = field
            .bytes()
            .await
            .map_err(|err| (upload_status(err.status()), err.body_text()))?;
        if is_upload {
            return Ok(bytes.to_vec());
        }
        if first.is_none() {
            first = Some(bytes.to_vec());
        }
    }
    first.ok_or_else(|| {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("No file uploaded; send the CSV as multipart field '{UPLOAD_FIELD}'"),
        )
    })
}

fn upload_status(status: StatusCode) -> StatusCode {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        status
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    }
}

async fn forecast(
    State(state): State<AppState>,
    query: Result<Query<ForecastQuery>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let query = match query {
        Ok(Query(query)) => query,
        Err(err) => return reject(StatusCode::UNPROCESSABLE_ENTITY, err.body_text()),
    };
    let multipart = match multipart {
        Ok(multipart) => multipart,
        Err(err) => return reject(StatusCode::UNPROCESSABLE_ENTITY, err.body_text()),
    };
    let bytes = match read_upload(multipart).await {
        Ok(bytes) => bytes,
        Err((status, message)) => return reject(status, message),
    };
    info!(
        "Forecast request: {} byte(s), max_rows={:?}, max_products={:?}",
        bytes.len(),
        query.max_rows,
        query.max_products
    );
    let outcome = state.pipeline.forecast_csv(bytes, query.into()).await;
    if let RequestOutcome::Failed(err) = &outcome {
        warn!("Forecast request failed ({}): {err}", err.kind());
    }
    Json(outcome.to_response()).into_response()
}
