//! One microphone capture lifecycle: open device, record, enforce the
//! minimum duration, finalize into a WAV payload, transcribe.

use crate::error::CaptureError;
use crate::traits::{CaptureBackend, CaptureStream};
use assistant::{AudioPayload, Transcriber};
use std::io::Cursor;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

/// Where a capture session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    Idle,
    Recording,
    Finalizing,
    Done,
    Error,
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Every finalized capture is at least this long; a `stop` arriving
    /// earlier defers the device stop until the floor has elapsed. Clips
    /// shorter than this transcribe unreliably.
    pub min_duration: Duration,
    /// Locale hint forwarded with the transcription payload.
    pub language: Option<String>,
    /// Whether the transcription origin can carry microphone audio
    /// confidentially (see [`assistant::secure_origin`]).
    pub secure_origin: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            min_duration: Duration::from_millis(2000),
            language: None,
            secure_origin: true,
        }
    }
}

struct ActiveCapture {
    stream: CaptureStream,
    started_at: Instant,
}

/// One capture session. At most one may be recording at a time; `start`
/// while active is rejected with [`CaptureError::AlreadyRecording`].
pub struct CaptureSession {
    backend: Box<dyn CaptureBackend>,
    config: CaptureConfig,
    status: CaptureStatus,
    active: Option<ActiveCapture>,
}

impl CaptureSession {
    pub fn new(backend: Box<dyn CaptureBackend>, config: CaptureConfig) -> Self {
        Self {
            backend,
            config,
            status: CaptureStatus::Idle,
            active: None,
        }
    }

    pub fn status(&self) -> CaptureStatus {
        self.status
    }

    pub fn is_recording(&self) -> bool {
        matches!(
            self.status,
            CaptureStatus::Recording | CaptureStatus::Finalizing
        )
    }

    /// Open the device and begin recording.
    ///
    /// Fails without a state change when a session is already active, the
    /// transcription origin is insecure, or the device cannot be opened.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.is_recording() {
            return Err(CaptureError::AlreadyRecording);
        }
        if !self.config.secure_origin {
            return Err(CaptureError::InsecureContext);
        }

        let stream = self.backend.open()?;
        debug!("capture stream open at {} Hz", stream.sample_rate);
        self.active = Some(ActiveCapture {
            stream,
            started_at: Instant::now(),
        });
        self.status = CaptureStatus::Recording;
        info!("capture started");
        Ok(())
    }

    /// Stop recording, finalize and transcribe.
    ///
    /// If less than the minimum duration has elapsed since `start`, the
    /// device keeps recording until the floor is reached. The device and
    /// buffered chunks are released before this returns, success or not.
    pub async fn stop(&mut self, transcriber: &dyn Transcriber) -> Result<String, CaptureError> {
        if self.status != CaptureStatus::Recording {
            return Err(CaptureError::Backend(
                "stop called without an active capture".to_string(),
            ));
        }
        self.status = CaptureStatus::Finalizing;

        let elapsed = self
            .active
            .as_ref()
            .map(|a| a.started_at.elapsed())
            .unwrap_or_default();
        if elapsed < self.config.min_duration {
            let remaining = self.config.min_duration - elapsed;
            debug!("deferring device stop for {:?} to honor the minimum duration", remaining);
            sleep(remaining).await;
        }

        let mut active = match self.active.take() {
            Some(a) => a,
            None => {
                self.status = CaptureStatus::Error;
                return Err(CaptureError::Backend("capture stream lost".to_string()));
            }
        };
        active.stream.handle.stop();

        let mut samples = Vec::new();
        while let Ok(chunk) = active.stream.chunks.try_recv() {
            samples.extend(chunk);
        }
        let sample_rate = active.stream.sample_rate;
        drop(active);

        if samples.is_empty() {
            warn!("capture finalized with no audio; skipping transcription");
            self.status = CaptureStatus::Error;
            return Err(CaptureError::EmptyCapture);
        }
        info!(
            "capture finalized: {} samples ({:.1}s)",
            samples.len(),
            samples.len() as f64 / sample_rate.max(1) as f64
        );

        let wav = encode_wav(&samples, sample_rate)
            .map_err(|e| {
                self.status = CaptureStatus::Error;
                CaptureError::Backend(e.to_string())
            })?;

        let payload = AudioPayload {
            wav,
            filename: "capture.wav".to_string(),
            language: self.config.language.clone(),
        };

        match transcriber.transcribe(payload).await {
            Ok(text) => {
                self.status = CaptureStatus::Done;
                Ok(text)
            }
            Err(e) => {
                self.status = CaptureStatus::Error;
                Err(CaptureError::Transcription(e.to_string()))
            }
        }
    }

    /// Abandon any active capture and release the device.
    pub fn teardown(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.stream.handle.stop();
            info!("capture torn down");
        }
        self.status = CaptureStatus::Idle;
    }
}

/// Encode mono samples as 16-bit PCM WAV.
fn encode_wav(samples: &[f32], sample_rate: u32) -> anyhow::Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            let clamped = sample.clamp(-1.0, 1.0);
            writer.write_sample((clamped * i16::MAX as f32) as i16)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::CaptureHandle;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};

    struct FakeHandle {
        stopped: Arc<AtomicBool>,
    }

    impl CaptureHandle for FakeHandle {
        fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    struct FakeBackend {
        chunks: Vec<Vec<f32>>,
        fail_open: bool,
        stopped: Arc<AtomicBool>,
    }

    impl FakeBackend {
        fn with_chunks(chunks: Vec<Vec<f32>>) -> (Self, Arc<AtomicBool>) {
            let stopped = Arc::new(AtomicBool::new(false));
            (
                Self {
                    chunks,
                    fail_open: false,
                    stopped: stopped.clone(),
                },
                stopped,
            )
        }

        fn unavailable() -> Self {
            Self {
                chunks: Vec::new(),
                fail_open: true,
                stopped: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl CaptureBackend for FakeBackend {
        fn open(&mut self) -> Result<CaptureStream, CaptureError> {
            if self.fail_open {
                return Err(CaptureError::DeviceUnavailable("no device".to_string()));
            }
            let (tx, rx) = mpsc::channel();
            for chunk in self.chunks.drain(..) {
                tx.send(chunk).unwrap();
            }
            Ok(CaptureStream {
                chunks: rx,
                sample_rate: 16000,
                handle: Box::new(FakeHandle {
                    stopped: self.stopped.clone(),
                }),
            })
        }
    }

    #[derive(Default)]
    struct FakeTranscriber {
        fail_with: Option<String>,
        received: Mutex<Vec<AudioPayload>>,
    }

    #[async_trait]
    impl Transcriber for FakeTranscriber {
        async fn transcribe(&self, payload: AudioPayload) -> anyhow::Result<String> {
            self.received.lock().unwrap().push(payload);
            match &self.fail_with {
                Some(reason) => Err(anyhow::anyhow!(reason.clone())),
                None => Ok("turn on the lights".to_string()),
            }
        }
    }

    fn session_with_audio() -> (CaptureSession, Arc<AtomicBool>) {
        let (backend, stopped) = FakeBackend::with_chunks(vec![vec![0.1; 800], vec![-0.2; 800]]);
        let config = CaptureConfig {
            min_duration: Duration::from_millis(2000),
            language: Some("en".to_string()),
            secure_origin: true,
        };
        (CaptureSession::new(Box::new(backend), config), stopped)
    }

    #[tokio::test(start_paused = true)]
    async fn records_and_transcribes() {
        let (mut session, stopped) = session_with_audio();
        let transcriber = FakeTranscriber::default();

        session.start().unwrap();
        assert_eq!(session.status(), CaptureStatus::Recording);

        let text = session.stop(&transcriber).await.unwrap();
        assert_eq!(text, "turn on the lights");
        assert_eq!(session.status(), CaptureStatus::Done);
        assert!(stopped.load(Ordering::SeqCst));

        let received = transcriber.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].language.as_deref(), Some("en"));
        // The payload is a decodable WAV carrying all accumulated samples.
        let clip = assistant::decode_wav(&received[0].wav).unwrap();
        assert_eq!(clip.samples.len(), 1600);
        assert_eq!(clip.sample_rate, 16000);
    }

    #[tokio::test(start_paused = true)]
    async fn early_stop_waits_out_the_minimum_duration() {
        let (mut session, _stopped) = session_with_audio();
        let transcriber = FakeTranscriber::default();

        session.start().unwrap();
        let started = Instant::now();
        sleep(Duration::from_millis(500)).await;

        session.stop(&transcriber).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_after_the_floor_does_not_wait() {
        let (mut session, _stopped) = session_with_audio();
        let transcriber = FakeTranscriber::default();

        session.start().unwrap();
        sleep(Duration::from_millis(2500)).await;
        let before = Instant::now();

        session.stop(&transcriber).await.unwrap();
        assert!(before.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn unavailable_device_leaves_the_session_idle() {
        let mut session = CaptureSession::new(
            Box::new(FakeBackend::unavailable()),
            CaptureConfig::default(),
        );
        let err = session.start().unwrap_err();
        assert!(matches!(err, CaptureError::DeviceUnavailable(_)));
        assert_eq!(session.status(), CaptureStatus::Idle);
    }

    #[tokio::test]
    async fn insecure_origin_is_rejected_before_the_device_opens() {
        let (backend, _) = FakeBackend::with_chunks(vec![]);
        let config = CaptureConfig {
            secure_origin: false,
            ..CaptureConfig::default()
        };
        let mut session = CaptureSession::new(Box::new(backend), config);
        assert_eq!(session.start().unwrap_err(), CaptureError::InsecureContext);
        assert_eq!(session.status(), CaptureStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_while_recording_is_rejected() {
        let (mut session, _stopped) = session_with_audio();
        session.start().unwrap();
        assert_eq!(session.start().unwrap_err(), CaptureError::AlreadyRecording);
        assert_eq!(session.status(), CaptureStatus::Recording);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_capture_never_reaches_the_transcriber() {
        let (backend, stopped) = FakeBackend::with_chunks(vec![]);
        let config = CaptureConfig {
            min_duration: Duration::ZERO,
            ..CaptureConfig::default()
        };
        let mut session = CaptureSession::new(Box::new(backend), config);
        let transcriber = FakeTranscriber::default();

        session.start().unwrap();
        let err = session.stop(&transcriber).await.unwrap_err();
        assert_eq!(err, CaptureError::EmptyCapture);
        assert_eq!(session.status(), CaptureStatus::Error);
        assert!(stopped.load(Ordering::SeqCst));
        assert!(transcriber.received.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transcriber_failure_is_surfaced_verbatim() {
        let (mut session, _stopped) = session_with_audio();
        let transcriber = FakeTranscriber {
            fail_with: Some("whisper service unreachable".to_string()),
            ..FakeTranscriber::default()
        };

        session.start().unwrap();
        let err = session.stop(&transcriber).await.unwrap_err();
        assert_eq!(
            err,
            CaptureError::Transcription("whisper service unreachable".to_string())
        );
        assert_eq!(session.status(), CaptureStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_releases_the_device() {
        let (mut session, stopped) = session_with_audio();
        session.start().unwrap();
        session.teardown();
        assert_eq!(session.status(), CaptureStatus::Idle);
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn session_can_record_again_after_done() {
        let transcriber = FakeTranscriber::default();
        let (backend, _) = FakeBackend::with_chunks(vec![vec![0.1; 100]]);
        let config = CaptureConfig {
            min_duration: Duration::ZERO,
            ..CaptureConfig::default()
        };
        let mut session = CaptureSession::new(Box::new(backend), config);

        session.start().unwrap();
        session.stop(&transcriber).await.unwrap();
        assert_eq!(session.status(), CaptureStatus::Done);

        // The fake backend has no more chunks, so this run ends empty, but
        // starting again is allowed once the previous run is terminal.
        session.start().unwrap();
        assert_eq!(session.status(), CaptureStatus::Recording);
    }
}
