//! Audio payloads exchanged with the speech endpoints.

use anyhow::{Context, Result};
use std::io::Cursor;
use std::time::Duration;

/// Captured audio submitted for transcription, plus decoding hints.
#[derive(Debug, Clone)]
pub struct AudioPayload {
    /// WAV-encoded capture (16-bit PCM).
    pub wav: Vec<u8>,
    pub filename: String,
    /// Locale hint forwarded to the transcription service.
    pub language: Option<String>,
}

/// A decoded clip ready for playback: mono samples in `[-1.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioClip {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Decode a WAV body into a mono clip, downmixing channels by averaging.
pub fn decode_wav(bytes: &[u8]) -> Result<AudioClip> {
    let mut reader =
        hound::WavReader::new(Cursor::new(bytes)).context("parsing synthesized WAV audio")?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .context("reading float samples")?,
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max))
                .collect::<Result<_, _>>()
                .context("reading integer samples")?
        }
    };

    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    Ok(AudioClip {
        samples,
        sample_rate: spec.sample_rate,
    })
}
