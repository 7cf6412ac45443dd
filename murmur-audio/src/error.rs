use std::fmt;

/// Errors from the microphone capture lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// No capture device or permission to use one.
    DeviceUnavailable(String),

    /// The transcription origin cannot carry microphone audio
    /// confidentially (plain HTTP to a non-loopback host).
    InsecureContext,

    /// A capture session is already recording.
    AlreadyRecording,

    /// The finalized capture contained no audio; nothing was sent for
    /// transcription.
    EmptyCapture,

    /// The transcription collaborator failed; carries its reason verbatim.
    Transcription(String),

    /// Backend stream failure.
    Backend(String),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::DeviceUnavailable(msg) => write!(f, "No capture device: {}", msg),
            CaptureError::InsecureContext => {
                write!(f, "Transcription origin is not secure enough for microphone audio")
            }
            CaptureError::AlreadyRecording => write!(f, "A capture session is already recording"),
            CaptureError::EmptyCapture => write!(f, "Capture produced no audio"),
            CaptureError::Transcription(msg) => write!(f, "{}", msg),
            CaptureError::Backend(msg) => write!(f, "Capture backend error: {}", msg),
        }
    }
}

impl std::error::Error for CaptureError {}

/// Errors from the playback state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    /// `pause` is only valid while playing.
    NotPlaying,

    /// `resume` is only valid while paused.
    NotPaused,

    /// Output device or stream failure.
    Sink(String),
}

impl fmt::Display for PlaybackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackError::NotPlaying => write!(f, "Playback is not playing"),
            PlaybackError::NotPaused => write!(f, "Playback is not paused"),
            PlaybackError::Sink(msg) => write!(f, "Audio output error: {}", msg),
        }
    }
}

impl std::error::Error for PlaybackError {}
