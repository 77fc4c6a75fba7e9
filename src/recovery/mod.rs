//! Transcription recovery tracker
//!
//! Watches every in-flight transcription of the signed-in clinician to a
//! terminal state, independent of which session tab is open. Each tracked
//! recording gets its own strictly sequential poll loop; different
//! recordings poll independently. The loop is budget-bounded: a
//! transcription that never leaves "processing" is silently dropped after
//! the attempt budget and stays recoverable through manual sync.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::PipelineTuning;
use crate::remote::{RecordingBackend, TranscriptionStatus};

/// Fired with `(recording_id, session_id)` when a transcription completes.
pub type TranscriptionCompleteCallback =
    Arc<dyn Fn(String, String) -> BoxFuture<'static, ()> + Send + Sync>;

/// Fired with `(recording_id, error)` when a transcription fails.
pub type TranscriptionErrorCallback =
    Arc<dyn Fn(String, String) -> BoxFuture<'static, ()> + Send + Sync>;

struct Tracked {
    session_id: String,
    task: JoinHandle<()>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedTranscription {
    pub recording_id: String,
    pub error: String,
}

/// Terminal outcomes plus the in-flight count, for the status surface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TranscriptionTrackingSnapshot {
    pub tracking: usize,
    pub completed: Vec<String>,
    pub failed: Vec<FailedTranscription>,
}

#[derive(Default)]
struct Outcomes {
    completed: Vec<String>,
    failed: Vec<FailedTranscription>,
}

/// Global per-user transcription watcher with an explicit
/// `init`/`teardown` lifecycle tied to sign-in and sign-out.
pub struct TranscriptionRecovery {
    shared: Arc<RecoveryShared>,
}

struct RecoveryShared {
    backend: Arc<dyn RecordingBackend>,
    tuning: PipelineTuning,
    transcription_url: String,
    user_id: Mutex<Option<String>>,
    tracked: Mutex<HashMap<String, Tracked>>,
    outcomes: Mutex<Outcomes>,
    on_complete: Mutex<Option<TranscriptionCompleteCallback>>,
    on_error: Mutex<Option<TranscriptionErrorCallback>>,
}

impl TranscriptionRecovery {
    pub fn new(
        backend: Arc<dyn RecordingBackend>,
        tuning: PipelineTuning,
        transcription_url: String,
    ) -> Self {
        Self {
            shared: Arc::new(RecoveryShared {
                backend,
                tuning,
                transcription_url,
                user_id: Mutex::new(None),
                tracked: Mutex::new(HashMap::new()),
                outcomes: Mutex::new(Outcomes::default()),
                on_complete: Mutex::new(None),
                on_error: Mutex::new(None),
            }),
        }
    }

    /// Begin tracking for a signed-in user.
    pub async fn init(&self, user_id: &str) {
        let mut current = self.shared.user_id.lock().await;
        *current = Some(user_id.to_string());
        info!("Transcription recovery active for user {}", user_id);
    }

    /// Sign-out: abort every poll task and forget all state.
    pub async fn teardown(&self) {
        {
            let mut current = self.shared.user_id.lock().await;
            *current = None;
        }

        let mut tracked = self.shared.tracked.lock().await;
        for (recording_id, entry) in tracked.drain() {
            entry.task.abort();
            info!("Stopped tracking transcription for {}", recording_id);
        }

        let mut outcomes = self.shared.outcomes.lock().await;
        *outcomes = Outcomes::default();
    }

    pub async fn set_on_complete(&self, callback: TranscriptionCompleteCallback) {
        let mut observer = self.shared.on_complete.lock().await;
        *observer = Some(callback);
    }

    pub async fn set_on_error(&self, callback: TranscriptionErrorCallback) {
        let mut observer = self.shared.on_error.lock().await;
        *observer = Some(callback);
    }

    /// Track a recording until its transcription reaches a terminal state.
    /// Idempotent: a recording already being tracked is left alone.
    pub async fn add_transcription(&self, recording_id: &str, session_id: &str) {
        {
            let user = self.shared.user_id.lock().await;
            if user.is_none() {
                warn!(
                    "Transcription recovery is not initialized; not tracking {}",
                    recording_id
                );
                return;
            }
        }

        let mut tracked = self.shared.tracked.lock().await;
        if tracked.contains_key(recording_id) {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let poll_recording_id = recording_id.to_string();
        let poll_session_id = session_id.to_string();
        let task = tokio::spawn(async move {
            shared
                .poll_recording(poll_recording_id, poll_session_id)
                .await;
        });

        tracked.insert(
            recording_id.to_string(),
            Tracked {
                session_id: session_id.to_string(),
                task,
            },
        );

        info!("Tracking transcription for recording {}", recording_id);
    }

    pub async fn is_tracking(&self, recording_id: &str) -> bool {
        let tracked = self.shared.tracked.lock().await;
        tracked.contains_key(recording_id)
    }

    pub async fn session_for(&self, recording_id: &str) -> Option<String> {
        let tracked = self.shared.tracked.lock().await;
        tracked.get(recording_id).map(|t| t.session_id.clone())
    }

    pub async fn snapshot(&self) -> TranscriptionTrackingSnapshot {
        let tracking = {
            let tracked = self.shared.tracked.lock().await;
            tracked.len()
        };

        let outcomes = self.shared.outcomes.lock().await;
        TranscriptionTrackingSnapshot {
            tracking,
            completed: outcomes.completed.clone(),
            failed: outcomes.failed.clone(),
        }
    }
}

impl RecoveryShared {
    /// One recording's poll loop. Strictly sequential: poll N+1 never
    /// starts before poll N's response is processed.
    async fn poll_recording(&self, recording_id: String, session_id: String) {
        let poll_interval = Duration::from_millis(self.tuning.poll_interval_ms);
        let error_backoff = Duration::from_millis(self.tuning.poll_error_backoff_ms);

        // Completed status polls. Transport failures are counted apart so
        // they do not prematurely classify the transcription as stuck,
        // while still guaranteeing the loop terminates offline.
        let mut attempts: u32 = 0;
        let mut transport_errors: u32 = 0;

        loop {
            tokio::time::sleep(poll_interval).await;

            let next_attempt = attempts + 1;

            // A long-stuck "processing" is nudged with an explicit re-pull
            // from the transcription provider.
            if next_attempt > self.tuning.manual_sync_after_attempts
                && self.tuning.manual_sync_every > 0
                && next_attempt % self.tuning.manual_sync_every == 0
            {
                if let Err(e) = self
                    .backend
                    .sync_transcription(&recording_id, &self.transcription_url)
                    .await
                {
                    warn!("Transcription sync failed for {}: {}", recording_id, e);
                }
            }

            // Covers missed completion notifications from the provider.
            let force_sync = next_attempt > self.tuning.resync_after_attempts;

            match self
                .backend
                .transcription_status(&recording_id, &self.transcription_url, force_sync)
                .await
            {
                Ok(info) => {
                    attempts = next_attempt;

                    match info.status {
                        TranscriptionStatus::Completed => {
                            info!(
                                "Transcription completed for recording {} after {} polls",
                                recording_id, attempts
                            );
                            self.record_completed(&recording_id, &session_id).await;
                            break;
                        }
                        TranscriptionStatus::Failed => {
                            let message = info
                                .error
                                .unwrap_or_else(|| "transcription failed".to_string());
                            warn!(
                                "Transcription failed for recording {}: {}",
                                recording_id, message
                            );
                            self.record_failed(&recording_id, message).await;
                            break;
                        }
                        TranscriptionStatus::Pending | TranscriptionStatus::Processing => {
                            if attempts >= self.tuning.max_poll_attempts {
                                // Deliberately silent: the recording stays
                                // in its "processing" display state and
                                // manual sync remains available.
                                info!(
                                    "Giving up on transcription {} after {} polls",
                                    recording_id, attempts
                                );
                                break;
                            }
                        }
                    }
                }
                Err(e) if e.is_retryable() => {
                    transport_errors += 1;
                    if transport_errors >= self.tuning.max_poll_attempts {
                        warn!(
                            "Stopping transcription tracking for {} after {} transport failures",
                            recording_id, transport_errors
                        );
                        break;
                    }

                    warn!(
                        "Transcription status poll failed for {} ({}), retrying in {:?}",
                        recording_id, e, error_backoff
                    );
                    tokio::time::sleep(error_backoff).await;
                }
                Err(e) => {
                    warn!(
                        "Cannot poll transcription for {}: {}; tracking stopped",
                        recording_id, e
                    );
                    break;
                }
            }
        }

        let mut tracked = self.tracked.lock().await;
        tracked.remove(&recording_id);
    }

    async fn record_completed(&self, recording_id: &str, session_id: &str) {
        {
            let mut outcomes = self.outcomes.lock().await;
            outcomes.completed.push(recording_id.to_string());
        }

        let callback = {
            let observer = self.on_complete.lock().await;
            observer.clone()
        };
        if let Some(callback) = callback {
            callback(recording_id.to_string(), session_id.to_string()).await;
        }
    }

    async fn record_failed(&self, recording_id: &str, message: String) {
        {
            let mut outcomes = self.outcomes.lock().await;
            outcomes.failed.push(FailedTranscription {
                recording_id: recording_id.to_string(),
                error: message.clone(),
            });
        }

        let callback = {
            let observer = self.on_error.lock().await;
            observer.clone()
        };
        if let Some(callback) = callback {
            callback(recording_id.to_string(), message).await;
        }
    }
}
