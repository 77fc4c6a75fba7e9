use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::stats::{PipelineStatus, RecorderStatus, RecoveryScan, UploadStatus};
use crate::capture::{
    wav_duration_seconds, CaptureBackendFactory, CaptureConfig, Recorder,
};
use crate::config::{PipelineTuning, RecorderConfig};
use crate::error::{CaptureError, PersistenceError, RemoteError, UploadError};
use crate::recovery::TranscriptionRecovery;
use crate::remote::{RecordingBackend, TranscriptionStatusInfo};
use crate::store::{LocalRecordingStore, SaveRecording, SuspendMarker};
use crate::upload::{UploadQueue, UploadRequest};

/// Durability triggers raised by the process-lifecycle adapter. `Hidden`
/// means the user navigated away; `SuspendRequested` means the process may
/// be torn down next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Hidden,
    SuspendRequested,
}

/// What `stop_recording` hands back once the blob is queued.
#[derive(Debug, Clone)]
pub struct StopOutcome {
    pub local_id: String,
    pub duration_seconds: f64,
    pub capped: bool,
}

struct ActiveRecording {
    session_id: String,
    started_at: DateTime<Utc>,
    /// The single outstanding checkpoint entry for this recording
    checkpoint_id: Option<String>,
    checkpoint_task: Option<JoinHandle<()>>,
}

/// Wires the recorder, local store, upload queue and transcription
/// recovery together for one signed-in clinician.
///
/// The pipeline owns the active-recording state: at most one recording is
/// in progress, checkpointed every `checkpoint_interval_secs` into the
/// local store (delete-old-then-write-new, so exactly one checkpoint entry
/// exists at any time).
pub struct SessionPipeline {
    shared: Arc<PipelineShared>,
}

struct PipelineShared {
    factory: Box<dyn CaptureBackendFactory>,
    capture_config: CaptureConfig,
    recorder: Mutex<Recorder>,
    store: Arc<LocalRecordingStore>,
    backend: Arc<dyn RecordingBackend>,
    uploads: Arc<UploadQueue>,
    recovery: Arc<TranscriptionRecovery>,
    tuning: PipelineTuning,
    transcription_url: String,
    active: Mutex<Option<ActiveRecording>>,
}

impl SessionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        factory: Box<dyn CaptureBackendFactory>,
        recorder_config: RecorderConfig,
        store: Arc<LocalRecordingStore>,
        backend: Arc<dyn RecordingBackend>,
        uploads: Arc<UploadQueue>,
        recovery: Arc<TranscriptionRecovery>,
        tuning: PipelineTuning,
        transcription_url: String,
    ) -> Self {
        let capture_config = CaptureConfig {
            sample_rate: recorder_config.sample_rate,
            channels: recorder_config.channels,
            ..CaptureConfig::default()
        };

        Self {
            shared: Arc::new(PipelineShared {
                factory,
                capture_config,
                recorder: Mutex::new(Recorder::new(recorder_config)),
                store,
                backend,
                uploads,
                recovery,
                tuning,
                transcription_url,
                active: Mutex::new(None),
            }),
        }
    }

    /// Connect the observer chain: a started transcription enters the
    /// recovery tracker, and terminal outcomes are surfaced. Call once
    /// after construction.
    pub async fn connect_observers(&self) {
        let recovery = Arc::clone(&self.shared.recovery);
        self.shared
            .uploads
            .set_on_transcription_started(Arc::new(move |recording_id, session_id| {
                let recovery = Arc::clone(&recovery);
                Box::pin(async move {
                    recovery.add_transcription(&recording_id, &session_id).await;
                })
            }))
            .await;

        self.shared
            .recovery
            .set_on_complete(Arc::new(|recording_id, session_id| {
                Box::pin(async move {
                    info!(
                        "Transcript ready for recording {} (session {})",
                        recording_id, session_id
                    );
                })
            }))
            .await;

        self.shared
            .recovery
            .set_on_error(Arc::new(|recording_id, error| {
                Box::pin(async move {
                    warn!(
                        "Transcription failed for recording {}: {}; it can be retried",
                        recording_id, error
                    );
                })
            }))
            .await;
    }

    /// Start recording the given therapy session.
    pub async fn start_recording(&self, session_id: &str) -> Result<(), CaptureError> {
        let mut active = self.shared.active.lock().await;
        if active.is_some() {
            return Err(CaptureError::InvalidTransition {
                state: "recording",
                operation: "start",
            });
        }

        let backend = self.shared.factory.create(&self.shared.capture_config)?;
        {
            let mut recorder = self.shared.recorder.lock().await;
            recorder.start(backend).await?;
        }

        let checkpoint_task = self.spawn_checkpoint_task();

        *active = Some(ActiveRecording {
            session_id: session_id.to_string(),
            started_at: Utc::now(),
            checkpoint_id: None,
            checkpoint_task: Some(checkpoint_task),
        });

        info!("Recording started for session {}", session_id);
        Ok(())
    }

    pub async fn pause_recording(&self) -> Result<(), CaptureError> {
        let mut recorder = self.shared.recorder.lock().await;
        recorder.pause()
    }

    pub async fn resume_recording(&self) -> Result<(), CaptureError> {
        let mut recorder = self.shared.recorder.lock().await;
        recorder.resume()
    }

    /// Stop the active recording and hand the blob to the background
    /// upload queue. Returns as soon as the blob is locally persisted; the
    /// remote pipeline continues in the background.
    pub async fn stop_recording(&self) -> Result<StopOutcome> {
        let taken = {
            let mut active = self.shared.active.lock().await;
            active.take()
        };
        let Some(mut active_rec) = taken else {
            anyhow::bail!("no active recording to stop");
        };

        if let Some(task) = active_rec.checkpoint_task.take() {
            task.abort();
        }

        let blob = {
            let mut recorder = self.shared.recorder.lock().await;
            recorder.stop().await.context("Failed to stop capture")?
        };

        let local_id = self
            .shared
            .uploads
            .queue_upload(UploadRequest {
                blob: blob.bytes,
                mime_type: blob.mime_type,
                duration_seconds: blob.duration_seconds,
                session_id: active_rec.session_id.clone(),
                file_name: None,
            })
            .await
            .context("Failed to queue upload")?;

        // The full blob is now the durable copy; the mid-recording
        // checkpoint is superseded.
        if let Some(checkpoint_id) = active_rec.checkpoint_id {
            if let Err(e) = self.shared.store.delete(&checkpoint_id).await {
                warn!(
                    "Could not delete superseded checkpoint {}: {}",
                    checkpoint_id, e
                );
            }
        }

        if let Err(e) = SuspendMarker::clear(self.shared.store.dir()) {
            warn!("Could not clear suspend marker: {}", e);
        }

        info!(
            "Recording for session {} stopped and queued as {}",
            active_rec.session_id, local_id
        );

        Ok(StopOutcome {
            local_id,
            duration_seconds: blob.duration_seconds,
            capped: blob.capped,
        })
    }

    /// Hard abort: discard buffered audio, the outstanding checkpoint and
    /// the suspend marker. Nothing of the recording survives.
    pub async fn cancel_recording(&self) -> Result<(), CaptureError> {
        let taken = {
            let mut active = self.shared.active.lock().await;
            active.take()
        };
        let Some(mut active_rec) = taken else {
            return Err(CaptureError::InvalidTransition {
                state: "idle",
                operation: "cancel",
            });
        };

        if let Some(task) = active_rec.checkpoint_task.take() {
            task.abort();
        }

        let result = {
            let mut recorder = self.shared.recorder.lock().await;
            recorder.cancel().await
        };

        if let Some(checkpoint_id) = active_rec.checkpoint_id {
            if let Err(e) = self.shared.store.delete(&checkpoint_id).await {
                warn!(
                    "Could not delete checkpoint {} during cancel: {}",
                    checkpoint_id, e
                );
            }
        }

        if let Err(e) = SuspendMarker::clear(self.shared.store.dir()) {
            warn!("Could not clear suspend marker: {}", e);
        }

        info!("Recording for session {} cancelled", active_rec.session_id);
        result
    }

    /// React to a lifecycle signal from the host adapter. Returns whether
    /// a recording is active, so the adapter can show a leave-confirmation
    /// on suspend.
    pub async fn handle_lifecycle(&self, event: LifecycleEvent) -> bool {
        let recording_active = {
            let active = self.shared.active.lock().await;
            active.is_some()
        };

        if !recording_active {
            return false;
        }

        match event {
            LifecycleEvent::Hidden => {
                self.shared.write_checkpoint().await;
            }
            LifecycleEvent::SuspendRequested => {
                self.shared.write_suspend_marker().await;
                self.shared.write_checkpoint().await;
            }
        }

        recording_active
    }

    /// Connectivity is back: requeue every unuploaded entry except the
    /// active recording's in-flight checkpoint.
    pub async fn network_restored(&self) -> usize {
        let exclude = {
            let active = self.shared.active.lock().await;
            active.as_ref().and_then(|a| a.checkpoint_id.clone())
        };

        self.shared.uploads.retry_unuploaded(exclude.as_deref()).await
    }

    /// Startup scan for recordings left behind by a prior run.
    pub async fn scan_recovery(&self) -> Result<RecoveryScan, PersistenceError> {
        let suspend_marker = SuspendMarker::load(self.shared.store.dir())?;

        let exclude = {
            let active = self.shared.active.lock().await;
            active.as_ref().and_then(|a| a.checkpoint_id.clone())
        };

        let orphans = self
            .shared
            .store
            .list_unuploaded()
            .await?
            .into_iter()
            .filter(|entry| Some(entry.id.as_str()) != exclude.as_deref())
            .collect();

        Ok(RecoveryScan {
            suspend_marker,
            orphans,
        })
    }

    /// Requeue one orphaned recording. A checkpoint that survived a crash
    /// can carry stale duration metadata; the blob is authoritative, so it
    /// is re-probed before upload.
    pub async fn retry_orphan(&self, local_id: &str) -> Result<(), UploadError> {
        let entry = self
            .shared
            .store
            .get(local_id)
            .await?
            .ok_or_else(|| PersistenceError::NotFound(local_id.to_string()))?;

        if !entry.duration_seconds.is_finite() || entry.duration_seconds <= 0.0 {
            let blob = self.shared.store.load_blob(local_id).await?;
            match wav_duration_seconds(&blob) {
                Ok(duration) if duration > 0.0 => {
                    self.shared
                        .store
                        .set_duration_seconds(local_id, duration)
                        .await?;
                }
                Ok(_) => {
                    return Err(UploadError::Invalid(format!(
                        "recording {} holds no audio",
                        local_id
                    )))
                }
                Err(e) => {
                    return Err(UploadError::Invalid(format!(
                        "recording {} blob is unreadable: {}",
                        local_id, e
                    )))
                }
            }
        }

        self.shared.uploads.retry_upload(local_id).await
    }

    /// Drop an orphaned recording for good. A remote record created by a
    /// failed upload attempt is cleaned up along with it, best effort.
    pub async fn dismiss_orphan(&self, local_id: &str) -> Result<(), PersistenceError> {
        if let Some(entry) = self.shared.store.get(local_id).await? {
            if !entry.uploaded {
                if let Some(remote_id) = &entry.remote_recording_id {
                    if let Err(e) = self.shared.backend.delete_recording(remote_id).await {
                        warn!("Could not delete remote recording {}: {}", remote_id, e);
                    }
                }
            }
        }

        self.shared.store.delete(local_id).await
    }

    pub fn clear_suspend_marker(&self) -> Result<(), PersistenceError> {
        SuspendMarker::clear(self.shared.store.dir())
    }

    /// Explicit re-pull from the transcription provider, then a fresh
    /// forced status read. The escape hatch for a recording the bounded
    /// poll loop has given up on.
    pub async fn manual_sync(
        &self,
        recording_id: &str,
    ) -> Result<TranscriptionStatusInfo, RemoteError> {
        self.shared
            .backend
            .sync_transcription(recording_id, &self.shared.transcription_url)
            .await?;
        self.shared
            .backend
            .transcription_status(recording_id, &self.shared.transcription_url, true)
            .await
    }

    pub async fn status(&self) -> PipelineStatus {
        let (state, elapsed_seconds, capped, capture_error) = {
            let recorder = self.shared.recorder.lock().await;
            (
                recorder.state(),
                recorder.elapsed_seconds(),
                recorder.is_capped(),
                recorder.last_error(),
            )
        };

        let (session_id, started_at) = {
            let active = self.shared.active.lock().await;
            match active.as_ref() {
                Some(a) => (Some(a.session_id.clone()), Some(a.started_at)),
                None => (None, None),
            }
        };

        let mut uploads = self.shared.uploads.snapshot().await;
        uploads.sort_by(|a, b| a.local_id.cmp(&b.local_id));

        PipelineStatus {
            recorder: RecorderStatus {
                state,
                session_id,
                started_at,
                elapsed_seconds,
                capped,
                capture_error,
            },
            uploads: UploadStatus {
                counts: self.shared.uploads.counts().await,
                uploads,
            },
            transcriptions: self.shared.recovery.snapshot().await,
        }
    }

    pub fn uploads(&self) -> &UploadQueue {
        &self.shared.uploads
    }

    pub fn recovery(&self) -> &TranscriptionRecovery {
        &self.shared.recovery
    }

    /// Graceful teardown: checkpoint whatever is still being captured,
    /// stop the device and abort every background task.
    pub async fn shutdown(&self) {
        let recording_active = {
            let active = self.shared.active.lock().await;
            active.is_some()
        };

        if recording_active {
            self.shared.write_suspend_marker().await;
            self.shared.write_checkpoint().await;
        }

        let taken = {
            let mut active = self.shared.active.lock().await;
            active.take()
        };
        if let Some(mut active_rec) = taken {
            if let Some(task) = active_rec.checkpoint_task.take() {
                task.abort();
            }

            let mut recorder = self.shared.recorder.lock().await;
            if recorder.is_active() {
                if let Err(e) = recorder.stop().await {
                    warn!("Capture stop failed during shutdown: {}", e);
                }
            }
        }

        self.shared.recovery.teardown().await;
        info!("Session pipeline shut down");
    }

    fn spawn_checkpoint_task(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let interval = Duration::from_secs(self.shared.tuning.checkpoint_interval_secs);

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                shared.write_checkpoint().await;
            }
        })
    }
}

impl PipelineShared {
    /// Snapshot the audio captured so far into the local store, replacing
    /// the previous checkpoint for this recording. A failed write degrades
    /// recovery only; capture keeps running.
    async fn write_checkpoint(&self) {
        let snapshot = {
            let recorder = self.recorder.lock().await;
            match recorder.snapshot() {
                Ok(Some(blob)) => blob,
                Ok(None) => return,
                Err(e) => {
                    warn!("Checkpoint snapshot failed: {}", e);
                    return;
                }
            }
        };

        let mut active = self.active.lock().await;
        let Some(active_rec) = active.as_mut() else {
            // The recording ended while we were encoding.
            return;
        };

        match self
            .store
            .replace_checkpoint(
                active_rec.checkpoint_id.as_deref(),
                SaveRecording {
                    blob: &snapshot.bytes,
                    file_name: format!("checkpoint-{}.wav", active_rec.session_id),
                    duration_seconds: snapshot.duration_seconds,
                    mime_type: snapshot.mime_type.clone(),
                    session_id: Some(active_rec.session_id.clone()),
                    checkpoint: true,
                },
            )
            .await
        {
            Ok(id) => {
                debug!(
                    "Checkpoint {} written ({:.1}s captured)",
                    id, snapshot.duration_seconds
                );
                active_rec.checkpoint_id = Some(id);
            }
            Err(e) => {
                warn!("Checkpoint write failed, recovery may be degraded: {}", e);
            }
        }
    }

    async fn write_suspend_marker(&self) {
        let (chunks_count, duration_seconds, mime_type) = {
            let recorder = self.recorder.lock().await;
            (
                recorder.frame_count(),
                recorder.elapsed_seconds(),
                recorder.mime_type().to_string(),
            )
        };

        let session_id = {
            let active = self.active.lock().await;
            active.as_ref().map(|a| a.session_id.clone())
        };

        let marker = SuspendMarker {
            chunks_count,
            mime_type,
            session_id,
            duration_seconds,
            timestamp: Utc::now().timestamp(),
        };

        // Synchronous on purpose: a suspend handler may not get another
        // tick of the runtime.
        if let Err(e) = marker.write_sync(self.store.dir()) {
            warn!("Could not write suspend marker: {}", e);
        }
    }
}
