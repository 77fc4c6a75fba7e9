use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use super::handlers;
use super::state::AppState;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Recording transport
        .route("/recording/start", post(handlers::start_recording))
        .route("/recording/stop", post(handlers::stop_recording))
        .route("/recording/pause", post(handlers::pause_recording))
        .route("/recording/resume", post(handlers::resume_recording))
        .route("/recording/cancel", post(handlers::cancel_recording))
        // Pipeline status
        .route("/status", get(handlers::get_status))
        // Background uploads
        .route("/uploads", get(handlers::list_uploads))
        .route("/uploads/:id/retry", post(handlers::retry_upload))
        // Orphaned-recording recovery
        .route("/recovery", get(handlers::scan_recovery))
        .route("/recovery/retry-all", post(handlers::retry_all))
        .route("/recovery/:id/retry", post(handlers::retry_orphan))
        .route("/recovery/:id", delete(handlers::dismiss_orphan))
        // Transcription
        .route(
            "/recordings/:id/transcription/sync",
            post(handlers::sync_transcription),
        )
        // Lifecycle adapter endpoints
        .route("/lifecycle/hidden", post(handlers::lifecycle_hidden))
        .route("/lifecycle/suspend", post(handlers::lifecycle_suspend))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
