//! HTTP surface: submit an image, poll a run, check liveness.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::capability::ImageInput;
use crate::run::RunId;
use crate::status::{StatusError, StatusStore};
use crate::submission::{Submission, SubmissionError, SubmissionHandler, SubmitOutcome};

/// Largest accepted upload, including form overhead.
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

const NOT_FOUND_DETAIL: &str = "Run ID not found.";

#[derive(Clone)]
pub struct ServerState {
    pub submissions: Arc<SubmissionHandler>,
    pub status: Arc<dyn StatusStore>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

/// Error response carrying a status code and a `{"detail": ...}` body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

impl From<SubmissionError> for ApiError {
    fn from(err: SubmissionError) -> Self {
        let status = match &err {
            SubmissionError::ExtractionFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            SubmissionError::Status(StatusError::DuplicateRun { .. }) => StatusCode::CONFLICT,
            SubmissionError::Status(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self::new(err.status(), err.body_text())
    }
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/analyze-image",
            post(analyze_image).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/status/{run_id}", get(run_status))
        .with_state(state)
}

/// Serve until `shutdown` is cancelled, then drain open connections.
pub async fn serve(
    listen: SocketAddr,
    state: ServerState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    tracing::info!(addr = %listen, "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("server terminated with error")
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn analyze_image(
    State(state): State<ServerState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let submission = SubmissionForm::read(multipart).await?.into_submission()?;

    let response = match state.submissions.submit(submission).await? {
        SubmitOutcome::Cached { run_id, report } => (
            StatusCode::OK,
            Json(json!({
                "run_id": run_id,
                "status": "COMPLETED_FROM_CACHE",
                "result": report,
            })),
        )
            .into_response(),
        SubmitOutcome::Accepted {
            run_id,
            extracted_text,
            ..
        } => (
            StatusCode::ACCEPTED,
            Json(json!({
                "run_id": run_id,
                "status": "ACCEPTED",
                "extracted_text": extracted_text,
            })),
        )
            .into_response(),
    };
    Ok(response)
}

async fn run_status(
    State(state): State<ServerState>,
    Path(run_id): Path<String>,
) -> Result<Response, ApiError> {
    let run_id = RunId::from(run_id);
    match state.status.get(&run_id).await {
        Ok(Some(snapshot)) => Ok(Json(snapshot).into_response()),
        Ok(None) => Err(ApiError::new(StatusCode::NOT_FOUND, NOT_FOUND_DETAIL)),
        Err(e) => {
            tracing::error!(run_id = %run_id, error = %e, "status lookup failed");
            Err(ApiError::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
        }
    }
}

/// Raw fields of an `/analyze-image` form.
#[derive(Debug, Default)]
struct SubmissionForm {
    file: Option<Vec<u8>>,
    content_type: Option<String>,
    topic: Option<String>,
    motivational_texts: Option<String>,
}

impl SubmissionForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().map(str::to_string);
            match name.as_deref() {
                Some("file") => {
                    form.content_type = field.content_type().map(str::to_string);
                    form.file = Some(field.bytes().await?.to_vec());
                }
                Some("topic") => form.topic = Some(text(field).await?),
                Some("motivational_texts") => form.motivational_texts = Some(text(field).await?),
                other => {
                    tracing::debug!(field = ?other, "ignoring unknown form field");
                }
            }
        }
        Ok(form)
    }

    fn into_submission(self) -> Result<Submission, ApiError> {
        let bytes = self
            .file
            .ok_or_else(|| ApiError::bad_request("missing form field: file"))?;
        if bytes.is_empty() {
            return Err(ApiError::bad_request("uploaded file is empty"));
        }
        let topic = self
            .topic
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ApiError::bad_request("missing form field: topic"))?;

        let image = match self.content_type {
            Some(media_type) if media_type.starts_with("image/") => ImageInput::new(bytes, media_type),
            _ => ImageInput::sniff(bytes),
        };

        Ok(Submission {
            image,
            topic,
            auxiliary_context: self.motivational_texts.filter(|t| !t.trim().is_empty()),
        })
    }
}

async fn text(field: Field<'_>) -> Result<String, ApiError> {
    Ok(field.text().await?)
}
