use thiserror::Error;

/// Capture-side failures. These surface immediately to the user as the
/// recording error class; they are never merged with upload or
/// transcription problems.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("No capture device available: {0}")]
    DeviceUnavailable(String),

    #[error("Cannot {operation} while recorder is {state}")]
    InvalidTransition {
        state: &'static str,
        operation: &'static str,
    },

    #[error("Capture stream error: {0}")]
    Stream(String),
}

/// Local store failures. A failed checkpoint write degrades recovery but
/// must not interrupt an active capture.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Entry metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("No such local recording: {0}")]
    NotFound(String),
}

/// Failures from the remote backend collaborator, classified per pipeline
/// stage so the user always knows which part of the pipeline is unhappy.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Recording record error: {0}")]
    Persistence(String),

    #[error("Audio storage error: {0}")]
    Storage(String),

    #[error("Transcription start failed: {0}")]
    TranscriptionStart(String),

    #[error("Transcription sync failed: {0}")]
    TranscriptionSync(String),

    #[error("Transcription status poll failed: {0}")]
    TranscriptionPoll(String),

    #[error("Transcription service is not configured")]
    NotConfigured,
}

impl RemoteError {
    /// Returns true if another attempt can succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RemoteError::NotConfigured)
    }
}

/// Upload pipeline failures surfaced on a pending upload.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Invalid upload request: {0}")]
    Invalid(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}
