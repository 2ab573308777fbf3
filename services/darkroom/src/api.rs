use crate::config::ApiConfig;
use crate::lifecycle::EventState;
use crate::models::{Actor, Event, EventPatch, NewEvent};
use crate::render_pipeline::{
    AdminError, CaptureError, CaptureReceipt, EventStatus, FilterPreview, Gallery, RenderPipeline,
    RenderSize, ViewError,
};
use crate::status_ticker::StatusTicker;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, patch, post},
    Json, Router,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Header carrying the guest's device session
pub const SESSION_HEADER: &str = "x-session-id";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<RenderPipeline>,
    pub ticker: StatusTicker,
    /// Cancelled on shutdown; status streams hang off child tokens
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(pipeline: Arc<RenderPipeline>, shutdown: CancellationToken) -> Self {
        Self {
            ticker: StatusTicker::new(pipeline.clone()),
            pipeline,
            shutdown,
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_available: Option<bool>,
}

/// Handler error: status code plus JSON body
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn new(status: StatusCode, code: &str, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                error: error.into(),
                code: code.to_string(),
                retry_after_secs: None,
                retry_available: None,
            },
        }
    }

    fn retry_after(mut self, secs: u64) -> Self {
        self.body.retry_after_secs = Some(secs);
        self
    }

    fn unavailable() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "UNAVAILABLE",
            "Service temporarily unavailable",
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &str {
        &self.body.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let retry_after = self.body.retry_after_secs;
        let mut response = (self.status, Json(self.body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

fn closed_code(state: EventState) -> &'static str {
    match state {
        EventState::NotStarted => "EVENT_NOT_STARTED",
        EventState::Active => "EVENT_ACTIVE",
        EventState::Ended => "EVENT_ENDED",
        EventState::Revealed => "EVENT_REVEALED",
        EventState::Expired => "EVENT_EXPIRED",
    }
}

impl From<CaptureError> for ApiError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::Closed { state } => {
                Self::new(StatusCode::CONFLICT, closed_code(state), err.to_string())
            }
            // Guests get the conservative view of a misconfigured event
            CaptureError::InvalidWindow => Self::new(
                StatusCode::CONFLICT,
                closed_code(EventState::NotStarted),
                "Capture is closed while the event is not_started",
            ),
            CaptureError::RateLimited { retry_after_secs } => {
                Self::new(StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", err.to_string())
                    .retry_after(retry_after_secs)
            }
            CaptureError::CooldownActive { remaining_secs } => {
                Self::new(StatusCode::TOO_MANY_REQUESTS, "COOLDOWN_ACTIVE", err.to_string())
                    .retry_after(remaining_secs)
            }
            CaptureError::QuotaExceeded => {
                Self::new(StatusCode::CONFLICT, "QUOTA_EXCEEDED", err.to_string())
            }
            CaptureError::UploadFailed { retry_available } => {
                let mut api = Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "UPLOAD_FAILED",
                    err.to_string(),
                );
                api.body.retry_available = Some(retry_available);
                api
            }
            CaptureError::DecodeFailed(_) => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "DECODE_FAILED",
                err.to_string(),
            ),
            CaptureError::NoPendingRetry => {
                Self::new(StatusCode::NOT_FOUND, "NO_PENDING_RETRY", err.to_string())
            }
            CaptureError::EventNotFound => {
                Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string())
            }
            CaptureError::Unavailable(_) => Self::unavailable(),
        }
    }
}

impl From<ViewError> for ApiError {
    fn from(err: ViewError) -> Self {
        match err {
            ViewError::NotRevealed { .. } => {
                Self::new(StatusCode::FORBIDDEN, "NOT_REVEALED", err.to_string())
            }
            ViewError::EventNotFound | ViewError::PhotoNotFound => {
                Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string())
            }
            ViewError::Render(_) => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "RENDER_FAILED",
                err.to_string(),
            ),
            ViewError::Unavailable(_) => Self::unavailable(),
        }
    }
}

impl From<AdminError> for ApiError {
    fn from(err: AdminError) -> Self {
        match err {
            AdminError::EventNotFound | AdminError::PhotoNotFound => {
                Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string())
            }
            AdminError::Invalid(_) => {
                Self::new(StatusCode::BAD_REQUEST, "INVALID_EVENT", err.to_string())
            }
            AdminError::Forbidden => Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", err.to_string()),
            AdminError::Unavailable(_) => Self::unavailable(),
        }
    }
}

fn session_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= 128)
}

fn require_session(headers: &HeaderMap) -> Result<&str, ApiError> {
    session_id(headers).ok_or_else(|| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "MISSING_SESSION",
            format!("Missing or invalid {SESSION_HEADER} header"),
        )
    })
}

/// Query parameters for rendering
#[derive(Debug, Deserialize)]
pub struct RenderQuery {
    #[serde(default)]
    pub size: RenderSize,
}

/// Query parameters for deletion
#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub actor: Actor,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/v1/events", post(create_event))
        .route("/api/v1/events/:event_id", patch(update_event))
        .route("/api/v1/events/:event_id/status", get(get_status))
        .route("/api/v1/events/:event_id/status/stream", get(status_stream))
        .route("/api/v1/events/:event_id/filter", get(get_filter))
        .route("/api/v1/events/:event_id/photos", post(submit_photo))
        .route("/api/v1/events/:event_id/photos/retry", post(retry_photo))
        .route("/api/v1/events/:event_id/sessions/current", delete(end_session))
        .route("/api/v1/events/:event_id/gallery", get(get_gallery))
        .route(
            "/api/v1/events/:event_id/photos/:photo_id/render",
            get(render_photo),
        )
        .route(
            "/api/v1/events/:event_id/photos/:photo_id",
            delete(delete_photo),
        )
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "darkroom"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.pipeline.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "store": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "store": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

#[instrument(skip(state, new))]
async fn create_event(
    State(state): State<AppState>,
    Json(new): Json<NewEvent>,
) -> Result<(StatusCode, Json<Event>), ApiError> {
    let event = state.pipeline.create_event(new).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

#[instrument(skip(state, patch))]
async fn update_event(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Json(patch): Json<EventPatch>,
) -> Result<Json<Event>, ApiError> {
    Ok(Json(state.pipeline.update_event(event_id, patch).await?))
}

#[instrument(skip(state, headers))]
async fn get_status(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<EventStatus>, ApiError> {
    let status = state
        .pipeline
        .status(event_id, session_id(&headers))
        .await?;
    Ok(Json(status))
}

/// Server-sent status updates, one per tick
async fn status_stream(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, axum::Error>>>, ApiError> {
    let rx = state
        .ticker
        .watch(event_id, state.shutdown.child_token())
        .await?;

    let stream = WatchStream::new(rx).map(|status| {
        SseEvent::default()
            .event("status")
            .json_data(&status)
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn get_filter(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<FilterPreview>, ApiError> {
    Ok(Json(state.pipeline.filter_preview(event_id).await?))
}

#[instrument(skip(state, headers, body), fields(size_bytes = body.len()))]
async fn submit_photo(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<CaptureReceipt>), ApiError> {
    let session = require_session(&headers)?;
    let receipt = state.pipeline.submit(event_id, session, body).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

#[instrument(skip(state, headers))]
async fn retry_photo(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<CaptureReceipt>), ApiError> {
    let session = require_session(&headers)?;
    let receipt = state.pipeline.retry(event_id, session).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn end_session(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let session = require_session(&headers)?;
    if state.pipeline.end_session(event_id, session) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "No active session",
        ))
    }
}

#[instrument(skip(state))]
async fn get_gallery(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<Gallery>, ApiError> {
    Ok(Json(state.pipeline.gallery(event_id).await?))
}

#[instrument(skip(state))]
async fn render_photo(
    State(state): State<AppState>,
    Path((event_id, photo_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<RenderQuery>,
) -> Result<Response, ApiError> {
    let rendered = state
        .pipeline
        .render_photo(event_id, photo_id, query.size)
        .await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(rendered.content_type),
    );

    match query.size {
        // Grain differs on every preview
        RenderSize::Preview => {
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        }
        RenderSize::Full => {
            headers.insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static("private, max-age=3600"),
            );
            let disposition = format!("attachment; filename=\"{photo_id}.jpg\"");
            match HeaderValue::from_str(&disposition) {
                Ok(value) => {
                    headers.insert(header::CONTENT_DISPOSITION, value);
                }
                Err(e) => warn!(error = %e, "Skipping content disposition"),
            }
        }
    }

    Ok((headers, rendered.bytes).into_response())
}

#[instrument(skip(state))]
async fn delete_photo(
    State(state): State<AppState>,
    Path((event_id, photo_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<DeleteQuery>,
) -> Result<StatusCode, ApiError> {
    state
        .pipeline
        .delete_photo(event_id, photo_id, query.actor)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Start the API server; returns once `shutdown` fires and connections drain
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let shutdown = state.shutdown.clone();
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting darkroom API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| {
            error!(error = %e, "API server error");
            e
        })
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_error_mapping() {
        let limited: ApiError = CaptureError::RateLimited {
            retry_after_secs: 42,
        }
        .into();
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(limited.code(), "RATE_LIMITED");

        let response = limited.into_response();
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");

        let quota: ApiError = CaptureError::QuotaExceeded.into();
        assert_eq!(quota.status(), StatusCode::CONFLICT);
        assert_eq!(quota.code(), "QUOTA_EXCEEDED");

        let failed: ApiError = CaptureError::UploadFailed {
            retry_available: true,
        }
        .into();
        assert_eq!(failed.body.retry_available, Some(true));
    }

    #[test]
    fn test_misconfigured_window_reads_as_not_started() {
        let invalid: ApiError = CaptureError::InvalidWindow.into();
        let closed: ApiError = CaptureError::Closed {
            state: EventState::NotStarted,
        }
        .into();
        assert_eq!(invalid.status(), closed.status());
        assert_eq!(invalid.code(), closed.code());
        assert_eq!(invalid.body.error, closed.body.error);
    }

    #[test]
    fn test_unavailable_hides_details() {
        let api: ApiError = ViewError::Unavailable("pool timed out: 10.0.0.4".to_string()).into();
        assert_eq!(api.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(!api.body.error.contains("10.0.0.4"));
    }

    #[test]
    fn test_session_header_validation() {
        let mut headers = HeaderMap::new();
        assert!(require_session(&headers).is_err());

        headers.insert(SESSION_HEADER, HeaderValue::from_static("  "));
        assert!(require_session(&headers).is_err());

        headers.insert(SESSION_HEADER, HeaderValue::from_static("phone-a"));
        assert_eq!(require_session(&headers).unwrap(), "phone-a");
    }
}
