use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::PersistenceError;

/// One captured-but-not-confirmed-uploaded recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalRecordingEntry {
    /// Locally generated id, stable across upload retries
    pub id: String,
    pub file_name: String,
    pub duration_seconds: f64,
    pub mime_type: String,
    /// Epoch seconds
    pub created_at: i64,
    /// Therapy session this recording belongs to, once known
    pub session_id: Option<String>,
    pub uploaded: bool,
    pub upload_error: Option<String>,
    /// Set once the remote record exists. `uploaded == true` implies this
    /// is present.
    pub remote_recording_id: Option<String>,
    /// True for mid-recording checkpoint snapshots
    pub checkpoint: bool,
}

/// Parameters for a new entry.
pub struct SaveRecording<'a> {
    pub blob: &'a [u8],
    pub file_name: String,
    pub duration_seconds: f64,
    pub mime_type: String,
    pub session_id: Option<String>,
    pub checkpoint: bool,
}

/// Directory-backed recording store: one JSON metadata sidecar plus one
/// audio blob file per entry. Entries are never overwritten in place; every
/// save gets a fresh id, and the checkpoint protocol deletes the previous
/// checkpoint before writing its replacement.
pub struct LocalRecordingStore {
    dir: PathBuf,
}

impl LocalRecordingStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;

        info!("Local recording store at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn blob_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.audio", id))
    }

    /// Persist a new recording. The blob lands first; the metadata sidecar
    /// is the commit point, so a crash in between leaves no visible entry.
    pub async fn save(&self, recording: SaveRecording<'_>) -> Result<String, PersistenceError> {
        let id = Uuid::new_v4().to_string();

        let entry = LocalRecordingEntry {
            id: id.clone(),
            file_name: recording.file_name,
            duration_seconds: recording.duration_seconds,
            mime_type: recording.mime_type,
            created_at: chrono::Utc::now().timestamp(),
            session_id: recording.session_id,
            uploaded: false,
            upload_error: None,
            remote_recording_id: None,
            checkpoint: recording.checkpoint,
        };

        fs::write(self.blob_path(&id), recording.blob).await?;
        fs::write(self.entry_path(&id), serde_json::to_vec_pretty(&entry)?).await?;

        debug!(
            "Saved local recording {} ({} bytes, checkpoint={})",
            id,
            recording.blob.len(),
            entry.checkpoint
        );
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Result<Option<LocalRecordingEntry>, PersistenceError> {
        match fs::read(self.entry_path(id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn load_blob(&self, id: &str) -> Result<Vec<u8>, PersistenceError> {
        match fs::read(self.blob_path(id)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PersistenceError::NotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Record a confirmed upload. Clears any previous upload error.
    pub async fn mark_uploaded(
        &self,
        id: &str,
        remote_recording_id: &str,
        session_id: Option<&str>,
    ) -> Result<(), PersistenceError> {
        self.update(id, |entry| {
            entry.uploaded = true;
            entry.upload_error = None;
            entry.remote_recording_id = Some(remote_recording_id.to_string());
            if let Some(session_id) = session_id {
                entry.session_id = Some(session_id.to_string());
            }
        })
        .await
    }

    /// Record a failed upload. The entry is deliberately kept so the
    /// recording stays recoverable.
    pub async fn mark_upload_failed(
        &self,
        id: &str,
        message: &str,
    ) -> Result<(), PersistenceError> {
        self.update(id, |entry| {
            entry.uploaded = false;
            entry.upload_error = Some(message.to_string());
        })
        .await
    }

    /// Remember the remote record created for this entry, so a retry can
    /// resume from upload instead of creating a duplicate.
    pub async fn set_remote_recording_id(
        &self,
        id: &str,
        remote_recording_id: &str,
    ) -> Result<(), PersistenceError> {
        self.update(id, |entry| {
            entry.remote_recording_id = Some(remote_recording_id.to_string());
        })
        .await
    }

    pub async fn set_duration_seconds(
        &self,
        id: &str,
        duration_seconds: f64,
    ) -> Result<(), PersistenceError> {
        self.update(id, |entry| {
            entry.duration_seconds = duration_seconds;
        })
        .await
    }

    /// All entries whose upload was never confirmed, oldest first. Used at
    /// startup to find orphaned recordings from a prior run.
    pub async fn list_unuploaded(&self) -> Result<Vec<LocalRecordingEntry>, PersistenceError> {
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&self.dir).await?;

        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if path.file_name().and_then(|n| n.to_str()) == Some("suspend-marker.json") {
                continue;
            }

            let bytes = fs::read(&path).await?;
            let entry: LocalRecordingEntry = serde_json::from_slice(&bytes)?;
            if !entry.uploaded {
                entries.push(entry);
            }
        }

        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    /// Idempotent delete of entry and blob.
    pub async fn delete(&self, id: &str) -> Result<(), PersistenceError> {
        remove_if_exists(self.entry_path(id)).await?;
        remove_if_exists(self.blob_path(id)).await?;
        debug!("Deleted local recording {}", id);
        Ok(())
    }

    /// Checkpoint protocol: delete the previous checkpoint for the active
    /// recording, then write the new one. Callers hold at most one
    /// outstanding checkpoint id per recording, so at any moment a single
    /// checkpoint entry exists.
    pub async fn replace_checkpoint(
        &self,
        previous: Option<&str>,
        recording: SaveRecording<'_>,
    ) -> Result<String, PersistenceError> {
        if let Some(previous) = previous {
            self.delete(previous).await?;
        }

        self.save(SaveRecording {
            checkpoint: true,
            ..recording
        })
        .await
    }

    async fn update<F>(&self, id: &str, apply: F) -> Result<(), PersistenceError>
    where
        F: FnOnce(&mut LocalRecordingEntry),
    {
        let mut entry = self
            .get(id)
            .await?
            .ok_or_else(|| PersistenceError::NotFound(id.to_string()))?;

        apply(&mut entry);
        fs::write(self.entry_path(id), serde_json::to_vec_pretty(&entry)?).await?;
        Ok(())
    }
}

async fn remove_if_exists(path: PathBuf) -> Result<(), PersistenceError> {
    match fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
