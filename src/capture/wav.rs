use std::io::Cursor;

use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

pub const WAV_MIME: &str = "audio/wav";

/// Encode an i16 PCM buffer into a complete in-memory WAV blob.
pub fn encode_wav(samples: &[i16], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            WavWriter::new(&mut cursor, spec).context("Failed to create WAV writer")?;

        for &sample in samples {
            writer
                .write_sample(sample)
                .context("Failed to write sample to WAV blob")?;
        }

        writer.finalize().context("Failed to finalize WAV blob")?;
    }

    Ok(cursor.into_inner())
}

/// Read the playable duration of a WAV blob.
///
/// Used when requeueing a recovered recording whose stored duration
/// metadata is missing or stale; the blob itself is authoritative.
pub fn wav_duration_seconds(bytes: &[u8]) -> Result<f64> {
    let reader = WavReader::new(Cursor::new(bytes)).context("Failed to parse WAV blob")?;
    let spec = reader.spec();

    Ok(reader.duration() as f64 / spec.sample_rate as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_and_probe_round_trip() {
        let samples = vec![0i16; 16000 * 3]; // 3 seconds of mono silence
        let bytes = encode_wav(&samples, 16000, 1).unwrap();

        let duration = wav_duration_seconds(&bytes).unwrap();
        assert!((duration - 3.0).abs() < 0.01);
    }

    #[test]
    fn probe_rejects_garbage() {
        assert!(wav_duration_seconds(&[0u8; 16]).is_err());
    }
}
