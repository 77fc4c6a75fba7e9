pub mod capture;
pub mod config;
pub mod error;
pub mod http;
pub mod recovery;
pub mod remote;
pub mod session;
pub mod store;
pub mod upload;

pub use capture::{
    AudioFrame, CaptureBackend, CaptureBackendFactory, CaptureConfig, MicrophoneBackend,
    MicrophoneFactory, Recorder, RecorderState, RecordingBlob,
};
pub use config::{Config, PipelineTuning, RecorderConfig};
pub use error::{CaptureError, PersistenceError, RemoteError, UploadError};
pub use http::{create_router, AppState};
pub use recovery::{TranscriptionRecovery, TranscriptionTrackingSnapshot};
pub use remote::{
    HttpRecordingBackend, RecordingBackend, RemoteRecording, TranscriptionStatus,
    TranscriptionStatusInfo,
};
pub use session::{LifecycleEvent, PipelineStatus, RecoveryScan, SessionPipeline, StopOutcome};
pub use store::{LocalRecordingEntry, LocalRecordingStore, SaveRecording, SuspendMarker};
pub use upload::{
    PendingUpload, PendingUploadStatus, UploadCounts, UploadQueue, UploadRequest,
};
