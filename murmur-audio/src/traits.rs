use crate::error::{CaptureError, PlaybackError};
use assistant::AudioClip;
use std::sync::mpsc::Receiver;

/// A live microphone stream opened by a [`CaptureBackend`].
///
/// Sample chunks arrive on `chunks` as the device delivers them; dropping
/// the stream (or calling [`CaptureHandle::stop`]) releases the device.
pub struct CaptureStream {
    pub chunks: Receiver<Vec<f32>>,
    pub sample_rate: u32,
    pub handle: Box<dyn CaptureHandle>,
}

/// Controls the lifetime of one open capture stream.
pub trait CaptureHandle: Send {
    /// Stop delivering chunks and release the device.
    fn stop(&mut self);
}

/// Opens microphone capture streams.
pub trait CaptureBackend: Send {
    fn open(&mut self) -> Result<CaptureStream, CaptureError>;
}

/// One playable audio output.
///
/// `start` begins a clip from its beginning; `stop` resets the position.
/// `is_finished` reports whether the current clip has played to its
/// natural end.
pub trait AudioSink: Send {
    fn start(&mut self, clip: &AudioClip) -> Result<(), PlaybackError>;
    fn pause(&mut self) -> Result<(), PlaybackError>;
    fn resume(&mut self) -> Result<(), PlaybackError>;
    fn stop(&mut self);
    fn is_finished(&self) -> bool;
}
