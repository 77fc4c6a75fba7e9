use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;

const MARKER_FILE: &str = "suspend-marker.json";

/// Metadata breadcrumb written when the process is asked to suspend while a
/// recording is active.
///
/// This is only a startup hint ("a recording may need recovery"); audio is
/// never reconstructed from it. The periodic checkpoint entry is the sole
/// recovery source for audio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspendMarker {
    pub chunks_count: usize,
    pub mime_type: String,
    pub session_id: Option<String>,
    pub duration_seconds: f64,
    /// Epoch seconds at suspend time
    pub timestamp: i64,
}

impl SuspendMarker {
    /// Best-effort synchronous write. Suspend handlers cannot await, so
    /// this goes through std::fs directly.
    pub fn write_sync(&self, dir: &Path) -> Result<(), PersistenceError> {
        let bytes = serde_json::to_vec_pretty(self)?;
        std::fs::write(dir.join(MARKER_FILE), bytes)?;
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Option<Self>, PersistenceError> {
        match std::fs::read(dir.join(MARKER_FILE)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn clear(dir: &Path) -> Result<(), PersistenceError> {
        match std::fs::remove_file(dir.join(MARKER_FILE)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
