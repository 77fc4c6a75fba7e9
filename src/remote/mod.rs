//! Remote backend collaborator
//!
//! The pipeline never talks to the clinic backend directly; everything goes
//! through the `RecordingBackend` trait so tests can inject scripted
//! implementations. The HTTP binding is the production adapter.

pub mod api;
pub mod http;

pub use api::{RecordingBackend, RemoteRecording, TranscriptionStatus, TranscriptionStatusInfo};
pub use http::HttpRecordingBackend;
