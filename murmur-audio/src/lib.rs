//! Audio capabilities for murmur
//!
//! This crate provides:
//! - Microphone capture sessions with a minimum-duration floor and
//!   transcription hand-off
//! - Playback of synthesized clips with a pause/resume/stop state machine
//! - A `cpal` backend for both (feature: `backend-cpal`)

pub mod capture;
pub mod error;
pub mod playback;
pub mod traits;

#[cfg(feature = "backend-cpal")]
pub mod cpal_backend;

#[cfg(not(feature = "backend-cpal"))]
pub mod dummy_backend;

pub use capture::{CaptureConfig, CaptureSession, CaptureStatus};
pub use error::{CaptureError, PlaybackError};
pub use playback::{PlaybackController, PlaybackStatus};
pub use traits::{AudioSink, CaptureBackend, CaptureHandle, CaptureStream};

// Default backend exports
#[cfg(feature = "backend-cpal")]
pub use cpal_backend::{CpalCaptureBackend as DefaultCaptureBackend, CpalSink as DefaultSink};

#[cfg(not(feature = "backend-cpal"))]
pub use dummy_backend::{DummyCaptureBackend as DefaultCaptureBackend, DummySink as DefaultSink};
