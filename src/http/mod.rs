//! HTTP control/status surface
//!
//! The adapter the UI shell talks to: recording transport commands,
//! combined status, upload retries, orphan recovery and the lifecycle
//! endpoints that stand in for visibility/unload signals.

pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;
