use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use verba_sessions::capture::MicrophoneFactory;
use verba_sessions::recovery::TranscriptionRecovery;
use verba_sessions::remote::{HttpRecordingBackend, RecordingBackend};
use verba_sessions::session::{LifecycleEvent, SessionPipeline};
use verba_sessions::store::LocalRecordingStore;
use verba_sessions::upload::UploadQueue;
use verba_sessions::{create_router, AppState, Config};

#[derive(Parser, Debug)]
#[command(name = "verba-sessions")]
#[command(about = "Resilient therapy-session recording and upload pipeline")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config/verba-sessions")]
    config: String,

    /// Override the configured HTTP bind address
    #[arg(long)]
    bind: Option<String>,

    /// Override the configured HTTP port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    info!("{} starting", cfg.service.name);

    if cfg.backend.transcription_url.trim().is_empty() {
        warn!("Transcription service URL is not configured; uploads will succeed without transcription");
    }

    let store = Arc::new(LocalRecordingStore::open(&cfg.storage.recordings_dir).await?);
    let backend: Arc<dyn RecordingBackend> =
        Arc::new(HttpRecordingBackend::new(cfg.backend.api_url.clone()));

    let uploads = Arc::new(UploadQueue::new(
        Arc::clone(&store),
        Arc::clone(&backend),
        cfg.pipeline.clone(),
        cfg.backend.user_id.clone(),
        cfg.backend.transcription_url.clone(),
    ));

    let recovery = Arc::new(TranscriptionRecovery::new(
        Arc::clone(&backend),
        cfg.pipeline.clone(),
        cfg.backend.transcription_url.clone(),
    ));
    recovery.init(&cfg.backend.user_id).await;

    let pipeline = Arc::new(SessionPipeline::new(
        Box::new(MicrophoneFactory),
        cfg.recorder.clone(),
        store,
        backend,
        uploads,
        recovery,
        cfg.pipeline.clone(),
        cfg.backend.transcription_url.clone(),
    ));
    pipeline.connect_observers().await;

    // Surface anything a prior run left behind. Retrying is left to the
    // user (or the retry-all endpoint); audio is never deleted here.
    match pipeline.scan_recovery().await {
        Ok(scan) => {
            if let Some(marker) = &scan.suspend_marker {
                warn!(
                    "A recording may need recovery: suspended with {:.1}s captured",
                    marker.duration_seconds
                );
            }
            if !scan.orphans.is_empty() {
                warn!(
                    "{} unuploaded recordings from a prior run await recovery",
                    scan.orphans.len()
                );
            }
        }
        Err(e) => warn!("Recovery scan failed: {}", e),
    }

    let state = AppState::new(Arc::clone(&pipeline));
    let router = create_router(state);

    let bind = args.bind.unwrap_or(cfg.service.http.bind);
    let port = args.port.unwrap_or(cfg.service.http.port);
    let addr = format!("{}:{}", bind, port);

    info!("HTTP server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&pipeline)))
        .await?;

    Ok(())
}

/// Ctrl-C is this service's suspend signal: checkpoint the active capture
/// before tearing everything down.
async fn shutdown_signal(pipeline: Arc<SessionPipeline>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }

    info!("Shutdown requested");
    pipeline
        .handle_lifecycle(LifecycleEvent::SuspendRequested)
        .await;
    pipeline.shutdown().await;
}
