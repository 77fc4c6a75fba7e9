//! Durable local persistence for not-yet-confirmed-uploaded recordings
//!
//! The store is the durability anchor of the pipeline: audio is written
//! here before any network call, survives process restarts, and is only
//! deleted once the upload is confirmed (or the user dismisses it).

pub mod local;
pub mod marker;

pub use local::{LocalRecordingEntry, LocalRecordingStore, SaveRecording};
pub use marker::SuspendMarker;
