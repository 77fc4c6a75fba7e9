// Shared test helpers: a scripted clinic-backend mock, a channel-driven
// capture backend and a virtual-time wait utility.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use verba_sessions::capture::{
    encode_wav, AudioFrame, CaptureBackend, CaptureBackendFactory, CaptureConfig,
};
use verba_sessions::error::{CaptureError, RemoteError};
use verba_sessions::remote::{
    RecordingBackend, RemoteRecording, TranscriptionStatus, TranscriptionStatusInfo,
};

pub const SAMPLE_RATE: u32 = 16000;

/// A 16 kHz mono WAV blob of the given duration.
pub fn wav_blob(seconds: f64) -> Vec<u8> {
    let samples = vec![100i16; (SAMPLE_RATE as f64 * seconds) as usize];
    encode_wav(&samples, SAMPLE_RATE, 1).expect("encode test blob")
}

/// Poll `cond` under the paused clock until it holds. Panics after 1000
/// virtual seconds, which is past every budget in the pipeline.
pub async fn wait_for<F, Fut>(mut cond: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..20_000 {
        if cond().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition was not reached in time");
}

/// Let non-timer tasks (frame pumps, spawned pipelines) run without
/// advancing the clock.
pub async fn drain_tasks() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// Scripted clinic backend
// ============================================================================

#[derive(Debug, Default, Clone, Copy)]
pub struct MockCalls {
    pub create: usize,
    pub upload: usize,
    pub update_duration: usize,
    pub start: usize,
    pub status: usize,
    pub status_forced: usize,
    pub sync: usize,
    pub delete: usize,
}

struct MockInner {
    calls: MockCalls,
    next_id: usize,
    uploaded: Vec<(String, Vec<u8>)>,
    fail_creates: usize,
    fail_uploads: usize,
    fail_starts: usize,
    fail_status: usize,
    status_script: VecDeque<TranscriptionStatusInfo>,
    default_status: TranscriptionStatus,
}

impl Default for MockInner {
    fn default() -> Self {
        Self {
            calls: MockCalls::default(),
            next_id: 0,
            uploaded: Vec::new(),
            fail_creates: 0,
            fail_uploads: 0,
            fail_starts: 0,
            fail_status: 0,
            status_script: VecDeque::new(),
            default_status: TranscriptionStatus::Processing,
        }
    }
}

/// Scripted stand-in for the clinic backend. Failure counters make the
/// next N calls of an operation fail; the status script is consumed one
/// entry per poll, falling back to `default_status`.
pub struct MockBackend {
    inner: Mutex<MockInner>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(MockInner::default()),
        })
    }

    pub fn fail_next_creates(&self, n: usize) {
        self.inner.lock().unwrap().fail_creates = n;
    }

    pub fn fail_next_uploads(&self, n: usize) {
        self.inner.lock().unwrap().fail_uploads = n;
    }

    pub fn fail_next_starts(&self, n: usize) {
        self.inner.lock().unwrap().fail_starts = n;
    }

    pub fn fail_next_status(&self, n: usize) {
        self.inner.lock().unwrap().fail_status = n;
    }

    pub fn push_status(&self, status: TranscriptionStatus, error: Option<&str>) {
        self.inner
            .lock()
            .unwrap()
            .status_script
            .push_back(TranscriptionStatusInfo {
                status,
                transcript_id: None,
                error: error.map(str::to_string),
            });
    }

    pub fn set_default_status(&self, status: TranscriptionStatus) {
        self.inner.lock().unwrap().default_status = status;
    }

    pub fn calls(&self) -> MockCalls {
        self.inner.lock().unwrap().calls
    }

    pub fn uploaded_bytes(&self, recording_id: &str) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .unwrap()
            .uploaded
            .iter()
            .find(|(id, _)| id == recording_id)
            .map(|(_, bytes)| bytes.clone())
    }
}

#[async_trait::async_trait]
impl RecordingBackend for MockBackend {
    async fn create_recording(
        &self,
        _session_id: &str,
        _user_id: &str,
        file_name: &str,
    ) -> Result<RemoteRecording, RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.create += 1;

        if inner.fail_creates > 0 {
            inner.fail_creates -= 1;
            return Err(RemoteError::Persistence("create unavailable".to_string()));
        }

        inner.next_id += 1;
        Ok(RemoteRecording {
            id: format!("remote-{}", inner.next_id),
            file_name: file_name.to_string(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
        })
    }

    async fn upload_audio(
        &self,
        recording_id: &str,
        bytes: &[u8],
        _file_name: &str,
        _mime_type: &str,
    ) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.upload += 1;

        if inner.fail_uploads > 0 {
            inner.fail_uploads -= 1;
            return Err(RemoteError::Storage("network unreachable".to_string()));
        }

        inner
            .uploaded
            .push((recording_id.to_string(), bytes.to_vec()));
        Ok(())
    }

    async fn update_duration(
        &self,
        _recording_id: &str,
        _duration_seconds: f64,
    ) -> Result<(), RemoteError> {
        self.inner.lock().unwrap().calls.update_duration += 1;
        Ok(())
    }

    async fn start_transcription(
        &self,
        _recording_id: &str,
        _api_base_url: &str,
    ) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.start += 1;

        if inner.fail_starts > 0 {
            inner.fail_starts -= 1;
            return Err(RemoteError::TranscriptionStart(
                "transcription service error".to_string(),
            ));
        }

        Ok(())
    }

    async fn transcription_status(
        &self,
        _recording_id: &str,
        _api_base_url: &str,
        force_sync: bool,
    ) -> Result<TranscriptionStatusInfo, RemoteError> {
        let mut inner = self.inner.lock().unwrap();

        if inner.fail_status > 0 {
            inner.fail_status -= 1;
            return Err(RemoteError::TranscriptionPoll(
                "connection reset".to_string(),
            ));
        }

        inner.calls.status += 1;
        if force_sync {
            inner.calls.status_forced += 1;
        }

        Ok(inner
            .status_script
            .pop_front()
            .unwrap_or(TranscriptionStatusInfo {
                status: inner.default_status,
                transcript_id: None,
                error: None,
            }))
    }

    async fn sync_transcription(
        &self,
        _recording_id: &str,
        _api_base_url: &str,
    ) -> Result<(), RemoteError> {
        self.inner.lock().unwrap().calls.sync += 1;
        Ok(())
    }

    async fn delete_recording(&self, _recording_id: &str) -> Result<(), RemoteError> {
        self.inner.lock().unwrap().calls.delete += 1;
        Ok(())
    }
}

// ============================================================================
// Scripted capture backend
// ============================================================================

type SenderSlot = Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>;

/// Test-side handle for pushing frames into a scripted capture backend.
#[derive(Clone)]
pub struct ScriptedCaptureHandle {
    slot: SenderSlot,
}

impl ScriptedCaptureHandle {
    pub async fn send_frame(&self, samples: Vec<i16>) {
        let tx = { self.slot.lock().unwrap().clone() };
        if let Some(tx) = tx {
            tx.send(AudioFrame {
                samples,
                sample_rate: SAMPLE_RATE,
                channels: 1,
                timestamp_ms: 0,
            })
            .await
            .expect("capture channel open");
        }
    }

    /// Simulate the capture stream dying without a requested stop.
    pub fn kill(&self) {
        self.slot.lock().unwrap().take();
    }

    /// Push the given amount of audio in 100ms frames, then let the
    /// recorder's pump drain it.
    pub async fn send_seconds(&self, seconds: f64) {
        let samples_per_frame = (SAMPLE_RATE / 10) as usize;
        let frames = (seconds * 10.0).round() as usize;

        for _ in 0..frames {
            self.send_frame(vec![100i16; samples_per_frame]).await;
        }
        drain_tasks().await;
    }
}

struct ScriptedCaptureBackend {
    slot: SenderSlot,
    capturing: bool,
}

#[async_trait::async_trait]
impl CaptureBackend for ScriptedCaptureBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError> {
        let (tx, rx) = mpsc::channel(256);
        *self.slot.lock().unwrap() = Some(tx);
        self.capturing = true;
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        // Dropping the sender closes the channel, which is the flush
        // signal the recorder drains before producing the blob.
        self.slot.lock().unwrap().take();
        self.capturing = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub struct ScriptedCaptureFactory {
    slot: SenderSlot,
}

impl CaptureBackendFactory for ScriptedCaptureFactory {
    fn create(&self, _config: &CaptureConfig) -> Result<Box<dyn CaptureBackend>, CaptureError> {
        Ok(Box::new(ScriptedCaptureBackend {
            slot: Arc::clone(&self.slot),
            capturing: false,
        }))
    }
}

/// A factory/handle pair sharing one frame channel slot.
pub fn scripted_capture() -> (ScriptedCaptureFactory, ScriptedCaptureHandle) {
    let slot: SenderSlot = Arc::new(Mutex::new(None));
    (
        ScriptedCaptureFactory {
            slot: Arc::clone(&slot),
        },
        ScriptedCaptureHandle { slot },
    )
}

/// Factory whose device is always denied.
pub struct UnavailableCaptureFactory;

impl CaptureBackendFactory for UnavailableCaptureFactory {
    fn create(&self, _config: &CaptureConfig) -> Result<Box<dyn CaptureBackend>, CaptureError> {
        Err(CaptureError::DeviceUnavailable(
            "microphone permission denied".to_string(),
        ))
    }
}
