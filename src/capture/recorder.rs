use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::backend::{AudioFrame, CaptureBackend};
use super::wav::{encode_wav, WAV_MIME};
use crate::config::RecorderConfig;
use crate::error::CaptureError;

/// Recorder transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecorderState {
    Idle,
    Recording,
    Paused,
    Stopped,
}

impl RecorderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecorderState::Idle => "idle",
            RecorderState::Recording => "recording",
            RecorderState::Paused => "paused",
            RecorderState::Stopped => "stopped",
        }
    }
}

/// A finished (or snapshotted) capture: one playable WAV blob.
#[derive(Debug, Clone)]
pub struct RecordingBlob {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub duration_seconds: f64,
    /// True when the duration cap cut the capture short. The blob still
    /// holds everything recorded up to the cap.
    pub capped: bool,
}

struct CaptureBuffer {
    samples: Vec<i16>,
    sample_rate: u32,
    channels: u16,
    /// Frames appended so far (suspend marker metadata).
    frames: usize,
    capped: bool,
}

impl CaptureBuffer {
    fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: Vec::new(),
            sample_rate,
            channels,
            frames: 0,
            capped: false,
        }
    }

    fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / (self.sample_rate as f64 * self.channels as f64)
    }
}

struct RecorderShared {
    buffer: Mutex<CaptureBuffer>,
    paused: AtomicBool,
    /// Set before an intentional backend stop, so the frame pump can tell a
    /// clean shutdown from a dying stream.
    stopping: AtomicBool,
    last_error: Mutex<Option<String>>,
}

/// Transport state machine over a capture backend.
///
/// `idle → recording ⇄ paused → stopped`, with `cancel` dropping back to
/// `idle` from either active state. Frames received while paused are
/// discarded, so recorded duration excludes pauses exactly.
pub struct Recorder {
    config: RecorderConfig,
    state: RecorderState,
    backend: Option<Box<dyn CaptureBackend>>,
    shared: Arc<RecorderShared>,
    frame_task: Option<JoinHandle<()>>,
}

impl Recorder {
    pub fn new(config: RecorderConfig) -> Self {
        let shared = Arc::new(RecorderShared {
            buffer: Mutex::new(CaptureBuffer::new(config.sample_rate, config.channels)),
            paused: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            last_error: Mutex::new(None),
        });

        Self {
            config,
            state: RecorderState::Idle,
            backend: None,
            shared,
            frame_task: None,
        }
    }

    /// Start capturing from the given backend.
    pub async fn start(&mut self, mut backend: Box<dyn CaptureBackend>) -> Result<(), CaptureError> {
        if !matches!(self.state, RecorderState::Idle | RecorderState::Stopped) {
            return Err(CaptureError::InvalidTransition {
                state: self.state.as_str(),
                operation: "start",
            });
        }

        let backend_name = backend.name().to_string();
        let rx = backend.start().await?;

        self.reset_shared();

        let shared = Arc::clone(&self.shared);
        let max_duration_secs = self.config.max_duration_secs;
        self.frame_task = Some(tokio::spawn(pump_frames(rx, shared, max_duration_secs)));

        self.backend = Some(backend);
        self.state = RecorderState::Recording;

        info!("Recording started ({})", backend_name);
        Ok(())
    }

    /// Pause capture. Frames keep arriving from the backend but are dropped.
    pub fn pause(&mut self) -> Result<(), CaptureError> {
        if self.state != RecorderState::Recording {
            return Err(CaptureError::InvalidTransition {
                state: self.state.as_str(),
                operation: "pause",
            });
        }

        self.shared.paused.store(true, Ordering::SeqCst);
        self.state = RecorderState::Paused;
        info!("Recording paused at {:.1}s", self.elapsed_seconds());
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), CaptureError> {
        if self.state != RecorderState::Paused {
            return Err(CaptureError::InvalidTransition {
                state: self.state.as_str(),
                operation: "resume",
            });
        }

        self.shared.paused.store(false, Ordering::SeqCst);
        self.state = RecorderState::Recording;
        info!("Recording resumed");
        Ok(())
    }

    /// Stop capturing and return the recorded blob.
    ///
    /// The backend is stopped first, then the frame channel is drained to
    /// its final frame before the blob is produced, so nothing captured
    /// between the last poll and the stop call is lost.
    pub async fn stop(&mut self) -> Result<RecordingBlob, CaptureError> {
        if !matches!(self.state, RecorderState::Recording | RecorderState::Paused) {
            return Err(CaptureError::InvalidTransition {
                state: self.state.as_str(),
                operation: "stop",
            });
        }

        self.shared.stopping.store(true, Ordering::SeqCst);

        if let Some(mut backend) = self.backend.take() {
            // Whatever is buffered must still be recoverable.
            if let Err(e) = backend.stop().await {
                warn!("Capture backend stop failed: {}", e);
            }
        }

        if let Some(task) = self.frame_task.take() {
            if let Err(e) = task.await {
                warn!("Frame pump ended abnormally: {}", e);
            }
        }

        let blob = {
            let buffer = self
                .shared
                .buffer
                .lock()
                .map_err(|_| CaptureError::Stream("capture buffer poisoned".to_string()))?;

            let bytes = encode_wav(&buffer.samples, buffer.sample_rate, buffer.channels)
                .map_err(|e| CaptureError::Stream(e.to_string()))?;

            RecordingBlob {
                bytes,
                mime_type: WAV_MIME.to_string(),
                duration_seconds: buffer.duration_seconds(),
                capped: buffer.capped,
            }
        };

        self.state = RecorderState::Stopped;

        if blob.capped {
            warn!(
                "Recording stopped after hitting the {}s cap; result is partial",
                self.config.max_duration_secs
            );
        }
        info!("Recording stopped ({:.1}s captured)", blob.duration_seconds);

        Ok(blob)
    }

    /// Hard abort: discard all buffered audio and return to idle.
    /// Never produces a blob.
    pub async fn cancel(&mut self) -> Result<(), CaptureError> {
        if !matches!(self.state, RecorderState::Recording | RecorderState::Paused) {
            return Err(CaptureError::InvalidTransition {
                state: self.state.as_str(),
                operation: "cancel",
            });
        }

        self.shared.stopping.store(true, Ordering::SeqCst);

        if let Some(mut backend) = self.backend.take() {
            if let Err(e) = backend.stop().await {
                warn!("Capture backend stop failed during cancel: {}", e);
            }
        }

        if let Some(task) = self.frame_task.take() {
            task.abort();
        }

        self.reset_shared();
        self.state = RecorderState::Idle;

        info!("Recording cancelled, buffered audio discarded");
        Ok(())
    }

    /// Non-destructive snapshot of the audio captured so far, for
    /// checkpointing. Does not advance or mutate the buffer.
    pub fn snapshot(&self) -> Result<Option<RecordingBlob>, CaptureError> {
        if !self.is_active() {
            return Ok(None);
        }

        let buffer = self
            .shared
            .buffer
            .lock()
            .map_err(|_| CaptureError::Stream("capture buffer poisoned".to_string()))?;

        if buffer.samples.is_empty() {
            return Ok(None);
        }

        let bytes = encode_wav(&buffer.samples, buffer.sample_rate, buffer.channels)
            .map_err(|e| CaptureError::Stream(e.to_string()))?;

        Ok(Some(RecordingBlob {
            bytes,
            mime_type: WAV_MIME.to_string(),
            duration_seconds: buffer.duration_seconds(),
            capped: buffer.capped,
        }))
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, RecorderState::Recording | RecorderState::Paused)
    }

    /// Recorded duration so far, pauses excluded.
    pub fn elapsed_seconds(&self) -> f64 {
        self.shared
            .buffer
            .lock()
            .map(|b| b.duration_seconds())
            .unwrap_or(0.0)
    }

    pub fn frame_count(&self) -> usize {
        self.shared.buffer.lock().map(|b| b.frames).unwrap_or(0)
    }

    pub fn is_capped(&self) -> bool {
        self.shared.buffer.lock().map(|b| b.capped).unwrap_or(false)
    }

    pub fn mime_type(&self) -> &'static str {
        WAV_MIME
    }

    /// Last stream-level failure, if any. Read by the orchestrator as the
    /// capture failure class.
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().ok().and_then(|e| e.clone())
    }

    fn reset_shared(&self) {
        if let Ok(mut buffer) = self.shared.buffer.lock() {
            *buffer = CaptureBuffer::new(self.config.sample_rate, self.config.channels);
        }
        self.shared.paused.store(false, Ordering::SeqCst);
        self.shared.stopping.store(false, Ordering::SeqCst);
        if let Ok(mut err) = self.shared.last_error.lock() {
            *err = None;
        }
    }
}

/// Drains the backend channel into the shared buffer until it closes.
async fn pump_frames(
    mut rx: mpsc::Receiver<AudioFrame>,
    shared: Arc<RecorderShared>,
    max_duration_secs: u64,
) {
    let mut first_frame = true;

    while let Some(frame) = rx.recv().await {
        if shared.paused.load(Ordering::SeqCst) {
            continue;
        }

        let Ok(mut buffer) = shared.buffer.lock() else {
            return;
        };

        if first_frame {
            // The device's real format wins over the configured target.
            buffer.sample_rate = frame.sample_rate;
            buffer.channels = frame.channels;
            first_frame = false;
        }

        if buffer.capped {
            continue;
        }

        if buffer.duration_seconds() >= max_duration_secs as f64 {
            buffer.capped = true;
            warn!(
                "Recording reached the {}s duration cap; further audio is dropped",
                max_duration_secs
            );
            continue;
        }

        buffer.samples.extend_from_slice(&frame.samples);
        buffer.frames += 1;
    }

    // Channel closed. If nobody asked for a stop, the stream died under us.
    if !shared.stopping.load(Ordering::SeqCst) {
        warn!("Capture stream ended unexpectedly");
        if let Ok(mut err) = shared.last_error.lock() {
            *err = Some("capture stream ended unexpectedly".to_string());
        }
    }
}
