// Local recording store: durability, upload bookkeeping and the
// delete-before-write checkpoint protocol.

mod common;

use anyhow::Result;
use tempfile::TempDir;

use common::wav_blob;
use verba_sessions::store::{LocalRecordingStore, SaveRecording, SuspendMarker};

fn save_request<'a>(blob: &'a [u8], session_id: Option<&str>, checkpoint: bool) -> SaveRecording<'a> {
    SaveRecording {
        blob,
        file_name: "session.wav".to_string(),
        duration_seconds: 2.0,
        mime_type: "audio/wav".to_string(),
        session_id: session_id.map(str::to_string),
        checkpoint,
    }
}

#[tokio::test]
async fn round_trip_returns_byte_identical_blob() -> Result<()> {
    let dir = TempDir::new()?;
    let store = LocalRecordingStore::open(dir.path()).await?;

    let blob = wav_blob(2.0);
    let id = store.save(save_request(&blob, Some("s-1"), false)).await?;

    let entry = store.get(&id).await?.expect("entry exists");
    assert_eq!(entry.id, id);
    assert_eq!(entry.session_id.as_deref(), Some("s-1"));
    assert!(!entry.uploaded);
    assert!(entry.upload_error.is_none());
    assert!(entry.remote_recording_id.is_none());

    let loaded = store.load_blob(&id).await?;
    assert_eq!(loaded, blob);

    Ok(())
}

#[tokio::test]
async fn entries_survive_reopening_the_store() -> Result<()> {
    let dir = TempDir::new()?;

    let id = {
        let store = LocalRecordingStore::open(dir.path()).await?;
        store.save(save_request(&wav_blob(1.0), Some("s-1"), false)).await?
    };

    let reopened = LocalRecordingStore::open(dir.path()).await?;
    let entry = reopened.get(&id).await?.expect("entry survives restart");
    assert_eq!(entry.session_id.as_deref(), Some("s-1"));
    assert_eq!(reopened.list_unuploaded().await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn mark_uploaded_sets_remote_id_and_clears_error() -> Result<()> {
    let dir = TempDir::new()?;
    let store = LocalRecordingStore::open(dir.path()).await?;

    let id = store.save(save_request(&wav_blob(1.0), Some("s-1"), false)).await?;

    store.mark_upload_failed(&id, "network unreachable").await?;
    let entry = store.get(&id).await?.unwrap();
    assert!(!entry.uploaded);
    assert_eq!(entry.upload_error.as_deref(), Some("network unreachable"));

    store.mark_uploaded(&id, "remote-1", Some("s-1")).await?;
    let entry = store.get(&id).await?.unwrap();
    assert!(entry.uploaded);
    assert!(entry.upload_error.is_none());
    // An uploaded entry always carries the remote record it became.
    assert_eq!(entry.remote_recording_id.as_deref(), Some("remote-1"));

    Ok(())
}

#[tokio::test]
async fn list_unuploaded_skips_confirmed_entries() -> Result<()> {
    let dir = TempDir::new()?;
    let store = LocalRecordingStore::open(dir.path()).await?;

    let uploaded = store.save(save_request(&wav_blob(1.0), Some("s-1"), false)).await?;
    let failed = store.save(save_request(&wav_blob(1.0), Some("s-2"), false)).await?;
    let fresh = store.save(save_request(&wav_blob(1.0), None, false)).await?;

    store.mark_uploaded(&uploaded, "remote-1", None).await?;
    store.mark_upload_failed(&failed, "quota exceeded").await?;

    let unuploaded = store.list_unuploaded().await?;
    let ids: Vec<&str> = unuploaded.iter().map(|e| e.id.as_str()).collect();

    assert_eq!(unuploaded.len(), 2);
    assert!(ids.contains(&failed.as_str()));
    assert!(ids.contains(&fresh.as_str()));

    Ok(())
}

#[tokio::test]
async fn replace_checkpoint_keeps_a_single_entry() -> Result<()> {
    let dir = TempDir::new()?;
    let store = LocalRecordingStore::open(dir.path()).await?;

    let first = store
        .replace_checkpoint(None, save_request(&wav_blob(1.0), Some("s-1"), true))
        .await?;
    let second = store
        .replace_checkpoint(Some(&first), save_request(&wav_blob(2.0), Some("s-1"), true))
        .await?;

    assert_ne!(first, second);
    assert!(store.get(&first).await?.is_none());

    let entries = store.list_unuploaded().await?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, second);
    assert!(entries[0].checkpoint);

    Ok(())
}

#[tokio::test]
async fn delete_removes_entry_and_blob_idempotently() -> Result<()> {
    let dir = TempDir::new()?;
    let store = LocalRecordingStore::open(dir.path()).await?;

    let id = store.save(save_request(&wav_blob(1.0), None, false)).await?;
    store.delete(&id).await?;

    assert!(store.get(&id).await?.is_none());
    assert!(store.load_blob(&id).await.is_err());

    // Deleting again is not an error.
    store.delete(&id).await?;

    Ok(())
}

#[tokio::test]
async fn suspend_marker_write_load_clear() -> Result<()> {
    let dir = TempDir::new()?;
    let store = LocalRecordingStore::open(dir.path()).await?;

    assert!(SuspendMarker::load(store.dir())?.is_none());

    let marker = SuspendMarker {
        chunks_count: 42,
        mime_type: "audio/wav".to_string(),
        session_id: Some("s-1".to_string()),
        duration_seconds: 123.4,
        timestamp: 1_760_000_000,
    };
    marker.write_sync(store.dir())?;

    let loaded = SuspendMarker::load(store.dir())?.expect("marker exists");
    assert_eq!(loaded.chunks_count, 42);
    assert_eq!(loaded.session_id.as_deref(), Some("s-1"));

    // The marker file never shows up as a recording.
    assert!(store.list_unuploaded().await?.is_empty());

    SuspendMarker::clear(store.dir())?;
    assert!(SuspendMarker::load(store.dir())?.is_none());
    SuspendMarker::clear(store.dir())?;

    Ok(())
}
