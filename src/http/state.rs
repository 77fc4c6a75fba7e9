use std::sync::Arc;

use crate::session::SessionPipeline;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<SessionPipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<SessionPipeline>) -> Self {
        Self { pipeline }
    }
}
