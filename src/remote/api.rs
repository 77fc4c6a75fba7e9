use serde::{Deserialize, Serialize};

use crate::error::RemoteError;

/// A recording record owned by the backend. Authoritative state; never
/// cached beyond the current polling cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteRecording {
    pub id: String,
    pub file_name: String,
    /// RFC3339 timestamp assigned by the backend
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TranscriptionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TranscriptionStatus::Completed | TranscriptionStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionStatusInfo {
    pub status: TranscriptionStatus,
    pub transcript_id: Option<String>,
    pub error: Option<String>,
}

/// Operations the pipeline needs from the clinic backend.
#[async_trait::async_trait]
pub trait RecordingBackend: Send + Sync {
    /// Create the recording record for a session. Ownership checks happen
    /// upstream and come back as a persistence error.
    async fn create_recording(
        &self,
        session_id: &str,
        user_id: &str,
        file_name: &str,
    ) -> Result<RemoteRecording, RemoteError>;

    /// Upload the audio blob for an existing recording record.
    async fn upload_audio(
        &self,
        recording_id: &str,
        bytes: &[u8],
        file_name: &str,
        mime_type: &str,
    ) -> Result<(), RemoteError>;

    async fn update_duration(
        &self,
        recording_id: &str,
        duration_seconds: f64,
    ) -> Result<(), RemoteError>;

    /// Kick off transcription at the given service base URL.
    async fn start_transcription(
        &self,
        recording_id: &str,
        api_base_url: &str,
    ) -> Result<(), RemoteError>;

    /// Current transcription state. With `force_sync` the backend re-pulls
    /// from the transcription provider before answering (covers missed
    /// completion notifications).
    async fn transcription_status(
        &self,
        recording_id: &str,
        api_base_url: &str,
        force_sync: bool,
    ) -> Result<TranscriptionStatusInfo, RemoteError>;

    /// Explicit re-pull from the transcription provider.
    async fn sync_transcription(
        &self,
        recording_id: &str,
        api_base_url: &str,
    ) -> Result<(), RemoteError>;

    async fn delete_recording(&self, recording_id: &str) -> Result<(), RemoteError>;
}
