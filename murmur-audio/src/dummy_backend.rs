//! Device-less fallback used when `backend-cpal` is not compiled in.

use crate::error::{CaptureError, PlaybackError};
use crate::traits::{AudioSink, CaptureBackend, CaptureStream};
use assistant::AudioClip;

pub struct DummyCaptureBackend;

impl DummyCaptureBackend {
    pub fn new() -> Self {
        DummyCaptureBackend
    }
}

impl Default for DummyCaptureBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for DummyCaptureBackend {
    fn open(&mut self) -> Result<CaptureStream, CaptureError> {
        Err(CaptureError::DeviceUnavailable(
            "audio capture is not available in this build (missing 'backend-cpal' feature)"
                .to_string(),
        ))
    }
}

pub struct DummySink;

impl DummySink {
    pub fn new() -> Self {
        DummySink
    }
}

impl Default for DummySink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for DummySink {
    fn start(&mut self, _clip: &AudioClip) -> Result<(), PlaybackError> {
        Err(PlaybackError::Sink(
            "audio playback is not available in this build (missing 'backend-cpal' feature)"
                .to_string(),
        ))
    }

    fn pause(&mut self) -> Result<(), PlaybackError> {
        Err(PlaybackError::NotPlaying)
    }

    fn resume(&mut self) -> Result<(), PlaybackError> {
        Err(PlaybackError::NotPaused)
    }

    fn stop(&mut self) {}

    fn is_finished(&self) -> bool {
        true
    }
}
