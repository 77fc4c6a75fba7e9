use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::backend::{AudioFrame, CaptureBackend, CaptureBackendFactory, CaptureConfig};
use crate::error::CaptureError;

/// Microphone capture backend.
///
/// The cpal stream is not Send, so it lives on a dedicated worker thread;
/// frames cross over on the async channel and dropping the sender when the
/// thread exits is what closes the channel for the recorder.
pub struct MicrophoneBackend {
    config: CaptureConfig,
    stop: Arc<AtomicBool>,
    worker: Option<std::thread::JoinHandle<()>>,
    capturing: bool,
}

impl MicrophoneBackend {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
            capturing: false,
        }
    }
}

#[async_trait::async_trait]
impl CaptureBackend for MicrophoneBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError> {
        if self.capturing {
            return Err(CaptureError::Stream("backend already capturing".to_string()));
        }

        let (frame_tx, frame_rx) = mpsc::channel(64);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        let stop = Arc::new(AtomicBool::new(false));
        self.stop = Arc::clone(&stop);

        let config = self.config.clone();
        let worker = std::thread::spawn(move || run_capture(config, frame_tx, ready_tx, stop));

        // Wait for the worker to report whether the device came up.
        let ready = tokio::task::spawn_blocking(move || ready_rx.recv())
            .await
            .map_err(|e| CaptureError::Stream(e.to_string()))?
            .map_err(|_| CaptureError::Stream("capture thread exited before start".to_string()))?;
        ready?;

        self.worker = Some(worker);
        self.capturing = true;
        Ok(frame_rx)
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        if !self.capturing {
            return Ok(());
        }

        self.stop.store(true, Ordering::SeqCst);

        if let Some(worker) = self.worker.take() {
            // Bounded by the worker's shutdown poll loop.
            let _ = tokio::task::spawn_blocking(move || worker.join()).await;
        }

        self.capturing = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "microphone"
    }
}

/// Acquires the default input device per recording attempt.
pub struct MicrophoneFactory;

impl CaptureBackendFactory for MicrophoneFactory {
    fn create(&self, config: &CaptureConfig) -> Result<Box<dyn CaptureBackend>, CaptureError> {
        Ok(Box::new(MicrophoneBackend::new(config.clone())))
    }
}

/// Groups captured samples into fixed-size frames and ships them to the
/// recorder. Runs inside the cpal callback, so it must never block.
struct FrameAssembler {
    tx: mpsc::Sender<AudioFrame>,
    pending: Vec<i16>,
    samples_per_frame: usize,
    sample_rate: u32,
    channels: u16,
    samples_sent: u64,
}

impl FrameAssembler {
    fn push(&mut self, input: &[i16]) {
        self.pending.extend_from_slice(input);

        while self.pending.len() >= self.samples_per_frame {
            let samples: Vec<i16> = self.pending.drain(..self.samples_per_frame).collect();
            let timestamp_ms =
                self.samples_sent * 1000 / (self.sample_rate as u64 * self.channels as u64);
            self.samples_sent += samples.len() as u64;

            let frame = AudioFrame {
                samples,
                sample_rate: self.sample_rate,
                channels: self.channels,
                timestamp_ms,
            };

            if self.tx.try_send(frame).is_err() {
                warn!("Recorder is not keeping up, dropping a capture frame");
            }
        }
    }
}

/// Picks the input device for a recording attempt. The default device wins
/// unless it looks like a loopback/monitor source, in which case the first
/// real microphone input is preferred.
fn pick_input_device(host: &cpal::Host) -> Option<cpal::Device> {
    let default_device = host.default_input_device()?;

    let default_name = device_display_name(&default_device);
    if !looks_like_loopback(&default_name) {
        return Some(default_device);
    }

    warn!(
        "Default device '{}' looks like loopback, trying to pick a microphone input",
        default_name
    );

    if let Ok(mut devices) = host.input_devices() {
        if let Some(alternative) =
            devices.find(|d| !looks_like_loopback(&device_display_name(d)))
        {
            return Some(alternative);
        }
    }

    Some(default_device)
}

fn device_display_name(device: &cpal::Device) -> String {
    device
        .name()
        .unwrap_or_else(|_| "unknown input".to_string())
}

fn looks_like_loopback(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    ["stereo mix", "what u hear", "wave out", "loopback", "monitor"]
        .iter()
        .any(|p| lower.contains(p))
}

fn run_capture(
    config: CaptureConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
    ready_tx: std::sync::mpsc::Sender<Result<(), CaptureError>>,
    stop: Arc<AtomicBool>,
) {
    let host = cpal::default_host();

    let Some(device) = pick_input_device(&host) else {
        let _ = ready_tx.send(Err(CaptureError::DeviceUnavailable(
            "no input device available".to_string(),
        )));
        return;
    };

    let device_name = device_display_name(&device);

    let supported = match device.default_input_config() {
        Ok(c) => c,
        Err(e) => {
            let _ = ready_tx.send(Err(CaptureError::DeviceUnavailable(e.to_string())));
            return;
        }
    };

    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();
    let samples_per_frame =
        (sample_rate as u64 * channels as u64 * config.buffer_duration_ms / 1000).max(1) as usize;

    let mut assembler = FrameAssembler {
        tx: frame_tx,
        pending: Vec::new(),
        samples_per_frame,
        sample_rate,
        channels,
        samples_sent: 0,
    };

    let err_fn = |err| error!("an error occurred on capture stream: {}", err);

    let stream = match supported.sample_format() {
        cpal::SampleFormat::I16 => device.build_input_stream(
            &supported.into(),
            move |data: &[i16], _: &_| assembler.push(data),
            err_fn,
            None,
        ),
        cpal::SampleFormat::F32 => device.build_input_stream(
            &supported.into(),
            move |data: &[f32], _: &_| {
                let converted: Vec<i16> = data
                    .iter()
                    .map(|&x| (x.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                    .collect();
                assembler.push(&converted);
            },
            err_fn,
            None,
        ),
        other => {
            let _ = ready_tx.send(Err(CaptureError::Stream(format!(
                "unsupported sample format {:?}",
                other
            ))));
            return;
        }
    };

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(CaptureError::DeviceUnavailable(e.to_string())));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(CaptureError::Stream(e.to_string())));
        return;
    }

    let _ = ready_tx.send(Ok(()));
    info!(
        "Microphone capture running on '{}' ({} Hz, {} ch)",
        device_name, sample_rate, channels
    );

    while !stop.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(50));
    }

    drop(stream);
}
