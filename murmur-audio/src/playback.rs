//! Three-state playback over one audio sink.

use crate::error::PlaybackError;
use crate::traits::AudioSink;
use assistant::AudioClip;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Playing,
    Paused,
    Stopped,
}

/// Wraps one [`AudioSink`] and enforces the play/pause/resume/stop state
/// machine. At most one clip is ever audible: starting a new clip stops
/// whatever the sink was doing first.
pub struct PlaybackController {
    sink: Box<dyn AudioSink>,
    status: PlaybackStatus,
}

impl PlaybackController {
    pub fn new(sink: Box<dyn AudioSink>) -> Self {
        Self {
            sink,
            status: PlaybackStatus::Stopped,
        }
    }

    /// Current status, folding in natural end-of-clip: a clip that played
    /// to its end reads as `Stopped`, not `Paused`.
    pub fn status(&mut self) -> PlaybackStatus {
        if self.status == PlaybackStatus::Playing && self.sink.is_finished() {
            debug!("clip played to its end");
            self.sink.stop();
            self.status = PlaybackStatus::Stopped;
        }
        self.status
    }

    /// Start a new clip from its beginning, stopping any previous one.
    pub fn play(&mut self, clip: &AudioClip) -> Result<(), PlaybackError> {
        self.stop();
        self.sink.start(clip)?;
        self.status = PlaybackStatus::Playing;
        info!("playback started, {:?}", clip.duration());
        Ok(())
    }

    /// Only valid while playing.
    pub fn pause(&mut self) -> Result<(), PlaybackError> {
        if self.status() != PlaybackStatus::Playing {
            return Err(PlaybackError::NotPlaying);
        }
        self.sink.pause()?;
        self.status = PlaybackStatus::Paused;
        Ok(())
    }

    /// Only valid while paused.
    pub fn resume(&mut self) -> Result<(), PlaybackError> {
        if self.status() != PlaybackStatus::Paused {
            return Err(PlaybackError::NotPaused);
        }
        self.sink.resume()?;
        self.status = PlaybackStatus::Playing;
        Ok(())
    }

    /// Stop and reset to the beginning. Idempotent.
    pub fn stop(&mut self) {
        self.sink.stop();
        self.status = PlaybackStatus::Stopped;
    }
}
