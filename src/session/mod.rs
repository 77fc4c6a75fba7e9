//! Session recording orchestration
//!
//! `SessionPipeline` is the coordinator the UI shell talks to: recording
//! transport, periodic checkpointing, lifecycle durability triggers,
//! startup recovery of orphaned recordings and the combined status
//! snapshot.

pub mod pipeline;
pub mod stats;

pub use pipeline::{LifecycleEvent, SessionPipeline, StopOutcome};
pub use stats::{PipelineStatus, RecorderStatus, RecoveryScan, UploadStatus};
