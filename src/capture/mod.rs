//! Audio capture
//!
//! This module wraps the platform capture primitive behind the
//! `CaptureBackend` trait and layers the `Recorder` transport state machine
//! on top of it:
//! - Backends deliver PCM frames over a channel
//! - The recorder buffers frames, tracks recorded duration and exposes
//!   start/pause/resume/stop/cancel plus a non-destructive snapshot used
//!   for checkpointing

pub mod backend;
pub mod mic;
pub mod recorder;
pub mod wav;

pub use backend::{AudioFrame, CaptureBackend, CaptureBackendFactory, CaptureConfig};
pub use mic::{MicrophoneBackend, MicrophoneFactory};
pub use recorder::{Recorder, RecorderState, RecordingBlob};
pub use wav::{encode_wav, wav_duration_seconds, WAV_MIME};
