// Background upload queue: persist-first durability, failure recovery,
// retry without duplicate remote records and the transcription-start
// warning downgrade.

mod common;

use std::sync::{Arc, Mutex};

use anyhow::Result;
use tempfile::TempDir;

use common::{wav_blob, wait_for, MockBackend};
use verba_sessions::config::PipelineTuning;
use verba_sessions::error::UploadError;
use verba_sessions::store::{LocalRecordingStore, SaveRecording};
use verba_sessions::upload::{PendingUploadStatus, UploadQueue, UploadRequest};

async fn make_queue(
    backend: Arc<MockBackend>,
    transcription_url: &str,
) -> (TempDir, Arc<LocalRecordingStore>, Arc<UploadQueue>) {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(LocalRecordingStore::open(dir.path()).await.unwrap());
    let queue = Arc::new(UploadQueue::new(
        Arc::clone(&store),
        backend,
        PipelineTuning::default(),
        "clinician-1".to_string(),
        transcription_url.to_string(),
    ));
    (dir, store, queue)
}

fn request(session_id: &str) -> UploadRequest {
    UploadRequest {
        blob: wav_blob(2.0),
        mime_type: "audio/wav".to_string(),
        duration_seconds: 2.0,
        session_id: session_id.to_string(),
        file_name: Some("session.wav".to_string()),
    }
}

#[tokio::test(start_paused = true)]
async fn successful_pipeline_marks_entry_uploaded() -> Result<()> {
    let backend = MockBackend::new();
    let (_dir, store, queue) = make_queue(Arc::clone(&backend), "http://stt").await;

    let started: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let observer = Arc::clone(&started);
    queue
        .set_on_transcription_started(Arc::new(move |recording_id, session_id| {
            let observer = Arc::clone(&observer);
            Box::pin(async move {
                observer.lock().unwrap().push((recording_id, session_id));
            })
        }))
        .await;

    let local_id = queue.queue_upload(request("s-1")).await?;

    let q = Arc::clone(&queue);
    wait_for(|| {
        let q = Arc::clone(&q);
        async move { q.counts().await.succeeded == 1 }
    })
    .await;

    let entry = store.get(&local_id).await?.expect("entry kept until reconciled");
    assert!(entry.uploaded);
    assert!(entry.upload_error.is_none());
    assert_eq!(entry.remote_recording_id.as_deref(), Some("remote-1"));

    let calls = backend.calls();
    assert_eq!(calls.create, 1);
    assert_eq!(calls.upload, 1);
    assert_eq!(calls.update_duration, 1);
    assert_eq!(calls.start, 1);

    assert_eq!(backend.uploaded_bytes("remote-1").unwrap(), wav_blob(2.0));
    assert_eq!(
        started.lock().unwrap().as_slice(),
        &[("remote-1".to_string(), "s-1".to_string())]
    );

    Ok(())
}

#[tokio::test]
async fn invalid_requests_fail_fast_and_persist_nothing() -> Result<()> {
    let backend = MockBackend::new();
    let (_dir, store, queue) = make_queue(backend, "http://stt").await;

    let empty_blob = UploadRequest {
        blob: Vec::new(),
        ..request("s-1")
    };
    assert!(matches!(
        queue.queue_upload(empty_blob).await,
        Err(UploadError::Invalid(_))
    ));

    let bad_duration = UploadRequest {
        duration_seconds: f64::NAN,
        ..request("s-1")
    };
    assert!(matches!(
        queue.queue_upload(bad_duration).await,
        Err(UploadError::Invalid(_))
    ));

    let no_session = request("  ");
    assert!(matches!(
        queue.queue_upload(no_session).await,
        Err(UploadError::Invalid(_))
    ));

    assert!(store.list_unuploaded().await?.is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn outage_keeps_entry_recoverable_then_sweep_uploads_it() -> Result<()> {
    let backend = MockBackend::new();
    let (_dir, store, queue) = make_queue(Arc::clone(&backend), "http://stt").await;

    backend.fail_next_uploads(1000);
    let local_id = queue.queue_upload(request("s-1")).await?;

    let q = Arc::clone(&queue);
    wait_for(|| {
        let q = Arc::clone(&q);
        async move { q.counts().await.failed == 1 }
    })
    .await;

    // Exactly one recoverable entry: not uploaded, error recorded.
    let unuploaded = store.list_unuploaded().await?;
    assert_eq!(unuploaded.len(), 1);
    assert_eq!(unuploaded[0].id, local_id);
    assert!(!unuploaded[0].uploaded);
    assert!(unuploaded[0].upload_error.as_deref().unwrap().contains("network"));

    // Connectivity returns.
    backend.fail_next_uploads(0);
    assert_eq!(queue.retry_unuploaded(None).await, 1);

    let q = Arc::clone(&queue);
    wait_for(|| {
        let q = Arc::clone(&q);
        async move { q.counts().await.succeeded == 1 }
    })
    .await;

    let entry = store.get(&local_id).await?.unwrap();
    assert!(entry.uploaded);
    assert!(entry.upload_error.is_none());

    // The remote record from the first attempt was reused, not duplicated.
    assert_eq!(backend.calls().create, 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn retry_reuses_the_existing_remote_record() -> Result<()> {
    let backend = MockBackend::new();
    let (_dir, store, queue) = make_queue(Arc::clone(&backend), "http://stt").await;

    backend.fail_next_uploads(1);
    let local_id = queue.queue_upload(request("s-1")).await?;

    let q = Arc::clone(&queue);
    wait_for(|| {
        let q = Arc::clone(&q);
        async move { q.counts().await.failed == 1 }
    })
    .await;

    queue.retry_upload(&local_id).await?;

    let q = Arc::clone(&queue);
    wait_for(|| {
        let q = Arc::clone(&q);
        async move { q.counts().await.succeeded == 1 }
    })
    .await;

    let calls = backend.calls();
    assert_eq!(calls.create, 1, "a second remote record must never be created");
    assert_eq!(calls.upload, 2);

    let entry = store.get(&local_id).await?.unwrap();
    assert_eq!(entry.remote_recording_id.as_deref(), Some("remote-1"));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_transcription_start_is_a_warning_not_an_upload_failure() -> Result<()> {
    let backend = MockBackend::new();
    let (_dir, store, queue) = make_queue(Arc::clone(&backend), "http://stt").await;

    backend.fail_next_starts(100);
    let local_id = queue.queue_upload(request("s-1")).await?;

    let q = Arc::clone(&queue);
    wait_for(|| {
        let q = Arc::clone(&q);
        async move { q.counts().await.succeeded == 1 }
    })
    .await;

    // Bounded retry: one attempt per configured delay slot.
    assert_eq!(backend.calls().start, 3);

    let entry = store.get(&local_id).await?.unwrap();
    assert!(entry.uploaded, "upload success is never reverted");
    assert!(entry.upload_error.is_none());

    let uploads = queue.snapshot().await;
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].status, PendingUploadStatus::Succeeded);
    assert!(uploads[0].error.is_none());
    assert!(uploads[0]
        .warning
        .as_deref()
        .unwrap()
        .contains("transcription"));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unconfigured_transcription_service_is_tolerated() -> Result<()> {
    let backend = MockBackend::new();
    let (_dir, store, queue) = make_queue(Arc::clone(&backend), "").await;

    let local_id = queue.queue_upload(request("s-1")).await?;

    let q = Arc::clone(&queue);
    wait_for(|| {
        let q = Arc::clone(&q);
        async move { q.counts().await.succeeded == 1 }
    })
    .await;

    assert_eq!(backend.calls().start, 0);
    assert!(store.get(&local_id).await?.unwrap().uploaded);

    let uploads = queue.snapshot().await;
    assert!(uploads[0].warning.as_deref().unwrap().contains("not configured"));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn concurrent_retries_never_upload_twice() -> Result<()> {
    let backend = MockBackend::new();
    let (_dir, _store, queue) = make_queue(Arc::clone(&backend), "http://stt").await;

    backend.fail_next_creates(1);
    let local_id = queue.queue_upload(request("s-1")).await?;

    let q = Arc::clone(&queue);
    wait_for(|| {
        let q = Arc::clone(&q);
        async move { q.counts().await.failed == 1 }
    })
    .await;

    // Two near-simultaneous retries of the same recording.
    queue.retry_upload(&local_id).await?;
    queue.retry_upload(&local_id).await?;

    let q = Arc::clone(&queue);
    wait_for(|| {
        let q = Arc::clone(&q);
        async move { q.counts().await.succeeded == 1 }
    })
    .await;

    assert_eq!(backend.calls().upload, 1, "in-flight dedup by local id");

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn sweep_skips_sessionless_entries_and_the_active_checkpoint() -> Result<()> {
    let backend = MockBackend::new();
    let (_dir, store, queue) = make_queue(backend, "http://stt").await;

    let sessionless = store
        .save(SaveRecording {
            blob: &wav_blob(1.0),
            file_name: "orphan.wav".to_string(),
            duration_seconds: 1.0,
            mime_type: "audio/wav".to_string(),
            session_id: None,
            checkpoint: false,
        })
        .await?;

    let checkpoint = store
        .save(SaveRecording {
            blob: &wav_blob(1.0),
            file_name: "checkpoint.wav".to_string(),
            duration_seconds: 1.0,
            mime_type: "audio/wav".to_string(),
            session_id: Some("s-1".to_string()),
            checkpoint: true,
        })
        .await?;

    assert_eq!(queue.retry_unuploaded(Some(&checkpoint)).await, 0);

    // Both entries are still there, untouched.
    assert_eq!(store.list_unuploaded().await?.len(), 2);
    assert!(store.get(&sessionless).await?.is_some());

    // A sessionless entry cannot be retried directly either.
    assert!(matches!(
        queue.retry_upload(&sessionless).await,
        Err(UploadError::Invalid(_))
    ));

    Ok(())
}
