//! HTTP surface: routing, marshaling, and error-to-status mapping.
//!
//! Content types are checked by hand against the incoming headers instead of
//! letting extractors negotiate, because a mismatch must answer 406 before
//! the body is touched and before any file is written. Model work runs on
//! the blocking pool behind a semaphore so the shared device only ever sees
//! a bounded number of generations at once.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::error::VoiceError;
use crate::generation::GenerationParams;
use crate::VoiceService;

/// Accepted content types for enrollment audio.
const WAV_CONTENT_TYPES: &[&str] = &["audio/x-wav", "audio/wav", "audio/wave"];

#[derive(Clone)]
pub struct AppState {
    service: Arc<VoiceService>,
    semaphore: Arc<Semaphore>,
}

impl AppState {
    pub fn new(service: VoiceService, max_concurrency: usize) -> Self {
        Self {
            service: Arc::new(service),
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    pub fn service(&self) -> Arc<VoiceService> {
        self.service.clone()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/clone-rt/{user_id}", post(clone_voice))
        .route("/tts-rt/{user_id}", post(tts))
        .route("/readback", get(readback).post(readback))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_acceptable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_ACCEPTABLE,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<VoiceError> for ApiError {
    fn from(err: VoiceError) -> Self {
        let status = match &err {
            VoiceError::InvalidAudio(_) | VoiceError::EmptyText => StatusCode::BAD_REQUEST,
            VoiceError::ProfileNotFound { .. } => StatusCode::NOT_FOUND,
            VoiceError::ModelAcquisition(_)
            | VoiceError::ModelInference(_)
            | VoiceError::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = ?err, "request failed");
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
struct CloneResponse {
    model: String,
}

/// Wire format of a synthesis request. Knobs not present fall back to the
/// pipeline defaults.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TtsRequest {
    text: String,
    top_k: Option<usize>,
    top_p: Option<f64>,
    mineos_p: Option<f64>,
    semantic_temp: Option<f64>,
    waveform_temp: Option<f64>,
    fine_temp: Option<f64>,
}

impl TtsRequest {
    fn params(&self) -> GenerationParams {
        let defaults = GenerationParams::default();
        GenerationParams {
            top_k: self.top_k.unwrap_or(defaults.top_k),
            top_p: self.top_p.unwrap_or(defaults.top_p),
            min_eos_p: self.mineos_p.unwrap_or(defaults.min_eos_p),
            semantic_temp: self.semantic_temp.unwrap_or(defaults.semantic_temp),
            waveform_temp: self.waveform_temp.unwrap_or(defaults.waveform_temp),
            fine_temp: self.fine_temp.unwrap_or(defaults.fine_temp),
        }
    }
}

/// 406 unless the declared content type (ignoring parameters) is accepted.
fn require_content_type(headers: &HeaderMap, accepted: &[&str]) -> Result<(), ApiError> {
    let declared = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
        .unwrap_or_default();
    if accepted.contains(&declared.as_str()) {
        Ok(())
    } else {
        Err(ApiError::not_acceptable(format!(
            "content type {declared:?} not acceptable, expected one of {accepted:?}"
        )))
    }
}

/// Speaker IDs become filename stems; anything that could escape the
/// service directories stops here.
fn validate_speaker_id(speaker_id: &str) -> Result<(), ApiError> {
    let valid = !speaker_id.is_empty()
        && !speaker_id.contains(['/', '\\'])
        && !speaker_id.contains("..")
        && speaker_id != ".";
    if valid {
        Ok(())
    } else {
        Err(ApiError::bad_request(format!(
            "invalid speaker id {speaker_id:?}"
        )))
    }
}

/// Time-based transaction id: nanoseconds since the epoch.
fn mint_transaction_id() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .to_string()
}

async fn clone_voice(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CloneResponse>, ApiError> {
    require_content_type(&headers, WAV_CONTENT_TYPES)?;
    validate_speaker_id(&user_id)?;

    let _permit = state
        .semaphore
        .acquire()
        .await
        .map_err(|e| ApiError::internal(format!("semaphore closed: {e}")))?;
    let service = state.service.clone();
    let path = tokio::task::spawn_blocking(move || service.clone_voice(&user_id, &body))
        .await
        .map_err(|e| ApiError::internal(format!("task join error: {e}")))??;

    Ok(Json(CloneResponse {
        model: path.display().to_string(),
    }))
}

async fn tts(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    require_content_type(&headers, &["application/json"])?;
    validate_speaker_id(&user_id)?;

    let request: TtsRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("invalid request body: {e}")))?;
    let params = request.params();
    let transaction_id = mint_transaction_id();

    let _permit = state
        .semaphore
        .acquire()
        .await
        .map_err(|e| ApiError::internal(format!("semaphore closed: {e}")))?;
    let service = state.service.clone();
    let wav = tokio::task::spawn_blocking(move || {
        let path = service.tts(&user_id, &transaction_id, &request.text, &params)?;
        std::fs::read(&path).map_err(|e| VoiceError::storage(&path, e))
    })
    .await
    .map_err(|e| ApiError::internal(format!("task join error: {e}")))??;

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        "audio/wav".parse().map_err(|e| {
            ApiError::internal(format!("failed to build response header: {e}"))
        })?,
    );
    Ok((StatusCode::OK, response_headers, wav).into_response())
}

/// Debug echo of the request line, useful for reverse-proxy checks.
async fn readback(method: Method, headers: HeaderMap, uri: Uri) -> Json<serde_json::Value> {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    Json(serde_json::json!({
        "request-method": method.as_str(),
        "request-host": host,
        "request-url": uri.to_string(),
    }))
}
