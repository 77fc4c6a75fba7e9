use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub recorder: RecorderConfig,
    #[serde(default)]
    pub pipeline: PipelineTuning,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding not-yet-confirmed-uploaded recordings and the
    /// suspend marker. Survives restarts.
    pub recordings_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the clinic backend (records, blob storage).
    pub api_url: String,

    /// Base URL of the transcription service. Empty means not configured:
    /// uploads still succeed and transcription is skipped with a warning.
    #[serde(default)]
    pub transcription_url: String,

    /// Signed-in clinician the recordings belong to.
    pub user_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecorderConfig {
    pub sample_rate: u32,
    pub channels: u16,

    /// Hard ceiling on a single recording. Hitting it flags the result as
    /// partial instead of discarding it.
    pub max_duration_secs: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            max_duration_secs: 4 * 3600,
        }
    }
}

/// Tuning knobs for the upload/transcription pipeline. The defaults are
/// calibrated against the hosted transcription provider's latency profile;
/// all of them are configurable.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineTuning {
    /// Seconds between checkpoint snapshots of an active recording.
    pub checkpoint_interval_secs: u64,

    /// Milliseconds between transcription status polls.
    pub poll_interval_ms: u64,

    /// Backoff after a transport failure while polling.
    pub poll_error_backoff_ms: u64,

    /// Status polls per recording before tracking gives up.
    pub max_poll_attempts: u32,

    /// Polls after which every status request asks the backend to re-pull
    /// from the transcription provider.
    pub resync_after_attempts: u32,

    /// Polls after which an explicit sync call is issued periodically.
    pub manual_sync_after_attempts: u32,

    /// Cadence of those explicit sync calls.
    pub manual_sync_every: u32,

    /// Delays between transcription start attempts. The number of entries
    /// is the attempt budget.
    pub start_retry_delays_secs: Vec<u64>,
}

impl Default for PipelineTuning {
    fn default() -> Self {
        Self {
            checkpoint_interval_secs: 600, // 10 minutes
            poll_interval_ms: 2000,
            poll_error_backoff_ms: 5000,
            max_poll_attempts: 120,
            resync_after_attempts: 15,
            manual_sync_after_attempts: 30,
            manual_sync_every: 10,
            start_retry_delays_secs: vec![5, 15, 45],
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
