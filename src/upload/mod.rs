//! Background upload queue
//!
//! Decouples "the clinician stopped recording" from "the upload finished".
//! Every queued recording is persisted locally before the first network
//! call, then driven through the remote pipeline in a spawned task:
//! create record → upload blob → update duration → start transcription.
//! Failures leave the local entry behind with the error attached, so the
//! audio is always recoverable on the next run.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::PipelineTuning;
use crate::error::{PersistenceError, UploadError};
use crate::remote::RecordingBackend;
use crate::store::{LocalRecordingStore, SaveRecording};

/// Fired once transcription has been started for an uploaded recording,
/// with `(remote_recording_id, session_id)`. The orchestrator wires this to
/// the transcription recovery tracker.
pub type TranscriptionStartedCallback =
    Arc<dyn Fn(String, String) -> BoxFuture<'static, ()> + Send + Sync>;

/// A recording handed to the queue.
pub struct UploadRequest {
    pub blob: Vec<u8>,
    pub mime_type: String,
    pub duration_seconds: f64,
    pub session_id: String,
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingUploadStatus {
    Queued,
    Uploading,
    TranscribingStart,
    Succeeded,
    Failed,
}

/// Queue entry tracked for the lifetime of the process. Failures are
/// terminal until an explicit retry re-enters `Queued`.
#[derive(Debug, Clone, Serialize)]
pub struct PendingUpload {
    pub local_id: String,
    pub session_id: String,
    pub file_name: String,
    pub duration_seconds: f64,
    pub status: PendingUploadStatus,
    pub error: Option<String>,
    /// Non-fatal condition on a succeeded upload (transcription could not
    /// be started); never an upload failure.
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct UploadCounts {
    pub queued: usize,
    /// Includes entries currently starting transcription.
    pub uploading: usize,
    pub failed: usize,
    pub succeeded: usize,
}

struct Uploaded {
    remote_id: String,
    session_id: String,
}

/// Background upload queue. Each queued recording runs its pipeline in its
/// own task, strictly ordered within the entry and independent across
/// entries.
pub struct UploadQueue {
    shared: Arc<QueueShared>,
}

struct QueueShared {
    store: Arc<LocalRecordingStore>,
    backend: Arc<dyn RecordingBackend>,
    tuning: PipelineTuning,
    user_id: String,
    transcription_url: String,
    pending: Mutex<HashMap<String, PendingUpload>>,
    /// Local ids with a pipeline task currently running. Guarantees the
    /// same recording is never uploaded twice concurrently.
    in_flight: Mutex<HashSet<String>>,
    on_transcription_started: Mutex<Option<TranscriptionStartedCallback>>,
}

impl UploadQueue {
    pub fn new(
        store: Arc<LocalRecordingStore>,
        backend: Arc<dyn RecordingBackend>,
        tuning: PipelineTuning,
        user_id: String,
        transcription_url: String,
    ) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                store,
                backend,
                tuning,
                user_id,
                transcription_url,
                pending: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashSet::new()),
                on_transcription_started: Mutex::new(None),
            }),
        }
    }

    pub async fn set_on_transcription_started(&self, callback: TranscriptionStartedCallback) {
        let mut observer = self.shared.on_transcription_started.lock().await;
        *observer = Some(callback);
    }

    /// Accept a finished recording for background upload.
    ///
    /// Validates the request, persists the blob locally (the durability
    /// anchor) and returns the local id immediately; the remote pipeline
    /// runs in a spawned task.
    pub async fn queue_upload(&self, request: UploadRequest) -> Result<String, UploadError> {
        if request.blob.is_empty() {
            return Err(UploadError::Invalid("audio blob is empty".to_string()));
        }
        if !request.duration_seconds.is_finite() || request.duration_seconds <= 0.0 {
            return Err(UploadError::Invalid(format!(
                "invalid recording duration: {}",
                request.duration_seconds
            )));
        }
        if request.session_id.trim().is_empty() {
            return Err(UploadError::Invalid(
                "recording has no session".to_string(),
            ));
        }

        let file_name = request.file_name.unwrap_or_else(|| {
            format!("session-{}.wav", Utc::now().format("%Y%m%d-%H%M%S"))
        });

        let local_id = self
            .shared
            .store
            .save(SaveRecording {
                blob: &request.blob,
                file_name: file_name.clone(),
                duration_seconds: request.duration_seconds,
                mime_type: request.mime_type,
                session_id: Some(request.session_id.clone()),
                checkpoint: false,
            })
            .await?;

        {
            let mut pending = self.shared.pending.lock().await;
            pending.insert(
                local_id.clone(),
                PendingUpload {
                    local_id: local_id.clone(),
                    session_id: request.session_id,
                    file_name,
                    duration_seconds: request.duration_seconds,
                    status: PendingUploadStatus::Queued,
                    error: None,
                    warning: None,
                },
            );
        }

        info!("Queued upload for local recording {}", local_id);
        self.spawn_pipeline(local_id.clone());

        Ok(local_id)
    }

    /// Re-enter the queue for a failed or orphaned recording. Replays the
    /// pipeline from the point of failure: a remote record that already
    /// exists is reused, never duplicated.
    pub async fn retry_upload(&self, local_id: &str) -> Result<(), UploadError> {
        let entry = self
            .shared
            .store
            .get(local_id)
            .await?
            .ok_or_else(|| PersistenceError::NotFound(local_id.to_string()))?;

        let session_id = entry.session_id.clone().ok_or_else(|| {
            UploadError::Invalid(format!(
                "recording {} is not associated with a session and cannot be uploaded",
                local_id
            ))
        })?;

        {
            let in_flight = self.shared.in_flight.lock().await;
            if in_flight.contains(local_id) {
                info!("Upload {} is already in flight, not requeueing", local_id);
                return Ok(());
            }
        }

        {
            let mut pending = self.shared.pending.lock().await;
            pending.insert(
                local_id.to_string(),
                PendingUpload {
                    local_id: local_id.to_string(),
                    session_id,
                    file_name: entry.file_name.clone(),
                    duration_seconds: entry.duration_seconds,
                    status: PendingUploadStatus::Queued,
                    error: None,
                    warning: None,
                },
            );
        }

        info!("Requeued upload for local recording {}", local_id);
        self.spawn_pipeline(local_id.to_string());

        Ok(())
    }

    /// Connectivity-restored sweep: requeue every still-unuploaded entry.
    ///
    /// `exclude` is the active recording's in-flight checkpoint, which must
    /// never be uploaded mid-recording. Entries with no session cannot be
    /// uploaded and are skipped (they stay visible in the recovery scan).
    /// Returns how many entries were requeued.
    pub async fn retry_unuploaded(&self, exclude: Option<&str>) -> usize {
        let entries = match self.shared.store.list_unuploaded().await {
            Ok(entries) => entries,
            Err(e) => {
                error!("Failed to scan local store for unuploaded recordings: {}", e);
                return 0;
            }
        };

        let mut requeued = 0;
        for entry in entries {
            if Some(entry.id.as_str()) == exclude {
                continue;
            }
            if entry.session_id.is_none() {
                warn!(
                    "Skipping unuploaded recording {} with no session during recovery sweep",
                    entry.id
                );
                continue;
            }

            match self.retry_upload(&entry.id).await {
                Ok(()) => requeued += 1,
                Err(e) => warn!("Could not requeue recording {}: {}", entry.id, e),
            }
        }

        if requeued > 0 {
            info!("Requeued {} unuploaded recordings", requeued);
        }
        requeued
    }

    pub async fn counts(&self) -> UploadCounts {
        let pending = self.shared.pending.lock().await;
        let mut counts = UploadCounts::default();

        for upload in pending.values() {
            match upload.status {
                PendingUploadStatus::Queued => counts.queued += 1,
                PendingUploadStatus::Uploading | PendingUploadStatus::TranscribingStart => {
                    counts.uploading += 1
                }
                PendingUploadStatus::Failed => counts.failed += 1,
                PendingUploadStatus::Succeeded => counts.succeeded += 1,
            }
        }

        counts
    }

    /// Queue entries in no particular order; callers sort for display.
    pub async fn snapshot(&self) -> Vec<PendingUpload> {
        let pending = self.shared.pending.lock().await;
        pending.values().cloned().collect()
    }

    fn spawn_pipeline(&self, local_id: String) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            shared.run_pipeline(local_id).await;
        });
    }
}

impl QueueShared {
    async fn run_pipeline(&self, local_id: String) {
        {
            let mut in_flight = self.in_flight.lock().await;
            if !in_flight.insert(local_id.clone()) {
                // Another task is already driving this recording.
                return;
            }
        }

        self.set_status(&local_id, PendingUploadStatus::Uploading).await;

        match self.drive_upload(&local_id).await {
            Ok(uploaded) => {
                self.set_status(&local_id, PendingUploadStatus::TranscribingStart)
                    .await;
                self.drive_transcription_start(&local_id, &uploaded).await;
            }
            Err(e) => {
                let message = e.to_string();
                error!("Upload failed for local recording {}: {}", local_id, message);

                // The local entry is kept on purpose; it is the recovery
                // source for this recording.
                if let Err(persist) = self.store.mark_upload_failed(&local_id, &message).await {
                    error!(
                        "Could not record upload failure for {}: {}",
                        local_id, persist
                    );
                }

                self.fail(&local_id, message).await;
            }
        }

        let mut in_flight = self.in_flight.lock().await;
        in_flight.remove(&local_id);
    }

    /// The strictly ordered remote leg: create → upload → update duration →
    /// mark uploaded. Steps already completed by a previous attempt are
    /// skipped, so a retry resumes where it failed.
    async fn drive_upload(&self, local_id: &str) -> Result<Uploaded, UploadError> {
        let entry = self
            .store
            .get(local_id)
            .await?
            .ok_or_else(|| PersistenceError::NotFound(local_id.to_string()))?;

        let session_id = entry.session_id.clone().ok_or_else(|| {
            UploadError::Invalid(format!("recording {} has no session", local_id))
        })?;

        let remote_id = match entry.remote_recording_id.clone() {
            Some(id) => {
                info!("Reusing remote recording {} for {}", id, local_id);
                id
            }
            None => {
                let recording = self
                    .backend
                    .create_recording(&session_id, &self.user_id, &entry.file_name)
                    .await?;

                // Remember the remote record before uploading, so a failure
                // past this point never creates a duplicate on retry.
                self.store
                    .set_remote_recording_id(local_id, &recording.id)
                    .await?;
                recording.id
            }
        };

        if !entry.uploaded {
            let blob = self.store.load_blob(local_id).await?;
            self.backend
                .upload_audio(&remote_id, &blob, &entry.file_name, &entry.mime_type)
                .await?;
            self.backend
                .update_duration(&remote_id, entry.duration_seconds)
                .await?;
        }

        self.store
            .mark_uploaded(local_id, &remote_id, Some(&session_id))
            .await?;

        info!("Local recording {} uploaded as {}", local_id, remote_id);

        Ok(Uploaded {
            remote_id,
            session_id,
        })
    }

    /// Start transcription with bounded retry. Total failure is downgraded
    /// to a warning: the upload already succeeded and must not be reverted.
    async fn drive_transcription_start(&self, local_id: &str, uploaded: &Uploaded) {
        if self.transcription_url.trim().is_empty() {
            warn!(
                "Transcription service is not configured; recording {} uploaded without transcription",
                uploaded.remote_id
            );
            self.succeed(
                local_id,
                Some("transcription service is not configured".to_string()),
            )
            .await;
            return;
        }

        let delays = &self.tuning.start_retry_delays_secs;
        let budget = delays.len().max(1);
        let mut last_error = String::new();

        for attempt in 0..budget {
            match self
                .backend
                .start_transcription(&uploaded.remote_id, &self.transcription_url)
                .await
            {
                Ok(()) => {
                    self.notify_transcription_started(uploaded).await;
                    self.succeed(local_id, None).await;
                    return;
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(
                        "Transcription start attempt {}/{} failed for {}: {}",
                        attempt + 1,
                        budget,
                        uploaded.remote_id,
                        last_error
                    );

                    if attempt + 1 < budget {
                        let delay = delays.get(attempt).copied().unwrap_or(5);
                        tokio::time::sleep(Duration::from_secs(delay)).await;
                    }
                }
            }
        }

        warn!(
            "Giving up on starting transcription for {}; the recording is safely uploaded and transcription can be retried later",
            uploaded.remote_id
        );
        self.succeed(
            local_id,
            Some(format!("transcription could not be started: {}", last_error)),
        )
        .await;
    }

    async fn notify_transcription_started(&self, uploaded: &Uploaded) {
        let callback = {
            let observer = self.on_transcription_started.lock().await;
            observer.clone()
        };

        if let Some(callback) = callback {
            callback(uploaded.remote_id.clone(), uploaded.session_id.clone()).await;
        }
    }

    async fn set_status(&self, local_id: &str, status: PendingUploadStatus) {
        let mut pending = self.pending.lock().await;
        if let Some(upload) = pending.get_mut(local_id) {
            upload.status = status;
            upload.error = None;
        }
    }

    async fn succeed(&self, local_id: &str, warning: Option<String>) {
        let mut pending = self.pending.lock().await;
        if let Some(upload) = pending.get_mut(local_id) {
            upload.status = PendingUploadStatus::Succeeded;
            upload.error = None;
            upload.warning = warning;
        }
    }

    async fn fail(&self, local_id: &str, message: String) {
        let mut pending = self.pending.lock().await;
        if let Some(upload) = pending.get_mut(local_id) {
            upload.status = PendingUploadStatus::Failed;
            upload.error = Some(message);
        }
    }
}
