use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::state::AppState;
use crate::error::{CaptureError, PersistenceError, UploadError};
use crate::session::LifecycleEvent;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StartRecordingRequest {
    /// Therapy session the recording belongs to
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct StartRecordingResponse {
    pub session_id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct StopRecordingResponse {
    /// Local id of the queued recording
    pub local_id: String,
    pub duration_seconds: f64,
    /// True when the duration cap cut the recording short
    pub capped: bool,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct TransportResponse {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct LifecycleResponse {
    /// Whether a recording is active; on suspend the adapter uses this to
    /// show the native leave-confirmation
    pub recording_active: bool,
}

#[derive(Debug, Serialize)]
pub struct RetryAllResponse {
    pub requeued: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn capture_error_response(e: CaptureError) -> axum::response::Response {
    let status = match &e {
        CaptureError::InvalidTransition { .. } => StatusCode::CONFLICT,
        CaptureError::DeviceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        CaptureError::Stream(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (status, Json(ErrorResponse { error: e.to_string() })).into_response()
}

fn upload_error_response(e: UploadError) -> axum::response::Response {
    let status = match &e {
        UploadError::Invalid(_) => StatusCode::BAD_REQUEST,
        UploadError::Persistence(PersistenceError::NotFound(_)) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (status, Json(ErrorResponse { error: e.to_string() })).into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /recording/start
pub async fn start_recording(
    State(state): State<AppState>,
    Json(req): Json<StartRecordingRequest>,
) -> impl IntoResponse {
    if req.session_id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "session_id must not be empty".to_string(),
            }),
        )
            .into_response();
    }

    match state.pipeline.start_recording(&req.session_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(StartRecordingResponse {
                session_id: req.session_id,
                status: "recording".to_string(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to start recording: {}", e);
            capture_error_response(e)
        }
    }
}

/// POST /recording/stop
pub async fn stop_recording(State(state): State<AppState>) -> impl IntoResponse {
    match state.pipeline.stop_recording().await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(StopRecordingResponse {
                local_id: outcome.local_id,
                duration_seconds: outcome.duration_seconds,
                capped: outcome.capped,
                status: "queued".to_string(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to stop recording: {}", e);
            (
                StatusCode::CONFLICT,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// POST /recording/pause
pub async fn pause_recording(State(state): State<AppState>) -> impl IntoResponse {
    match state.pipeline.pause_recording().await {
        Ok(()) => (
            StatusCode::OK,
            Json(TransportResponse {
                status: "paused".to_string(),
            }),
        )
            .into_response(),
        Err(e) => capture_error_response(e),
    }
}

/// POST /recording/resume
pub async fn resume_recording(State(state): State<AppState>) -> impl IntoResponse {
    match state.pipeline.resume_recording().await {
        Ok(()) => (
            StatusCode::OK,
            Json(TransportResponse {
                status: "recording".to_string(),
            }),
        )
            .into_response(),
        Err(e) => capture_error_response(e),
    }
}

/// POST /recording/cancel
pub async fn cancel_recording(State(state): State<AppState>) -> impl IntoResponse {
    match state.pipeline.cancel_recording().await {
        Ok(()) => (
            StatusCode::OK,
            Json(TransportResponse {
                status: "idle".to_string(),
            }),
        )
            .into_response(),
        Err(e) => capture_error_response(e),
    }
}

/// GET /status
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.pipeline.status().await;
    (StatusCode::OK, Json(status)).into_response()
}

/// GET /uploads
pub async fn list_uploads(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.pipeline.status().await;
    (StatusCode::OK, Json(status.uploads)).into_response()
}

/// POST /uploads/:id/retry
pub async fn retry_upload(
    State(state): State<AppState>,
    Path(local_id): Path<String>,
) -> impl IntoResponse {
    info!("Retry requested for upload {}", local_id);

    match state.pipeline.uploads().retry_upload(&local_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(TransportResponse {
                status: "queued".to_string(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to requeue upload {}: {}", local_id, e);
            upload_error_response(e)
        }
    }
}

/// GET /recovery
pub async fn scan_recovery(State(state): State<AppState>) -> impl IntoResponse {
    match state.pipeline.scan_recovery().await {
        Ok(scan) => (StatusCode::OK, Json(scan)).into_response(),
        Err(e) => {
            error!("Recovery scan failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// POST /recovery/:id/retry
pub async fn retry_orphan(
    State(state): State<AppState>,
    Path(local_id): Path<String>,
) -> impl IntoResponse {
    info!("Recovery retry requested for {}", local_id);

    match state.pipeline.retry_orphan(&local_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(TransportResponse {
                status: "queued".to_string(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to recover recording {}: {}", local_id, e);
            upload_error_response(e)
        }
    }
}

/// DELETE /recovery/:id
pub async fn dismiss_orphan(
    State(state): State<AppState>,
    Path(local_id): Path<String>,
) -> impl IntoResponse {
    match state.pipeline.dismiss_orphan(&local_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(TransportResponse {
                status: "deleted".to_string(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to dismiss recording {}: {}", local_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// POST /recovery/retry-all
pub async fn retry_all(State(state): State<AppState>) -> impl IntoResponse {
    let requeued = state.pipeline.network_restored().await;
    (StatusCode::OK, Json(RetryAllResponse { requeued })).into_response()
}

/// POST /recordings/:id/transcription/sync
pub async fn sync_transcription(
    State(state): State<AppState>,
    Path(recording_id): Path<String>,
) -> impl IntoResponse {
    info!("Manual transcription sync for recording {}", recording_id);

    match state.pipeline.manual_sync(&recording_id).await {
        Ok(info) => (StatusCode::OK, Json(info)).into_response(),
        Err(e) => {
            error!("Manual sync failed for {}: {}", recording_id, e);
            (
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// POST /lifecycle/hidden
pub async fn lifecycle_hidden(State(state): State<AppState>) -> impl IntoResponse {
    let recording_active = state
        .pipeline
        .handle_lifecycle(LifecycleEvent::Hidden)
        .await;
    (StatusCode::OK, Json(LifecycleResponse { recording_active })).into_response()
}

/// POST /lifecycle/suspend
pub async fn lifecycle_suspend(State(state): State<AppState>) -> impl IntoResponse {
    let recording_active = state
        .pipeline
        .handle_lifecycle(LifecycleEvent::SuspendRequested)
        .await;
    (StatusCode::OK, Json(LifecycleResponse { recording_active })).into_response()
}

/// GET /health
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
