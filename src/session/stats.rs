use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::capture::RecorderState;
use crate::recovery::TranscriptionTrackingSnapshot;
use crate::store::{LocalRecordingEntry, SuspendMarker};
use crate::upload::{PendingUpload, UploadCounts};

/// Recording transport indicator.
#[derive(Debug, Clone, Serialize)]
pub struct RecorderStatus {
    pub state: RecorderState,

    /// Session being recorded, while a recording is active
    pub session_id: Option<String>,

    /// When the active recording started
    pub started_at: Option<DateTime<Utc>>,

    /// Recorded duration so far, pauses excluded
    pub elapsed_seconds: f64,

    /// The duration cap cut this recording short
    pub capped: bool,

    /// Capture device failure, if any
    pub capture_error: Option<String>,
}

/// Background upload indicator.
#[derive(Debug, Clone, Serialize)]
pub struct UploadStatus {
    pub counts: UploadCounts,
    pub uploads: Vec<PendingUpload>,
}

/// Full pipeline snapshot with three independent indicators, so the
/// clinician always knows whether the audio is safely captured even while
/// transcription is still pending or failed.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub recorder: RecorderStatus,
    pub uploads: UploadStatus,
    pub transcriptions: TranscriptionTrackingSnapshot,
}

/// Result of the startup recovery scan: a suspend marker left by a prior
/// run (metadata hint only) plus every recording whose upload was never
/// confirmed.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryScan {
    pub suspend_marker: Option<SuspendMarker>,
    pub orphans: Vec<LocalRecordingEntry>,
}
