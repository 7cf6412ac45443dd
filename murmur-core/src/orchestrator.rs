//! Drives the full interaction loop: typed and spoken submissions in,
//! streamed response text out, optional speech synthesis and playback.
//!
//! The [`Orchestrator`] handle is cheap to use from UI code: every method
//! posts a command onto an unbounded channel, and a processor task owns all
//! mutable state. At most one [`Submission`] is live at a time; a newer one
//! supersedes the old by cancelling its token, so a stale stream can never
//! interleave tokens into the new response.

use std::sync::Arc;
use std::time::Duration;

use assistant::{AudioClip, ChatService, Synthesizer, Transcriber};
use futures::StreamExt;
use murmur_audio::{
    AudioSink, CaptureBackend, CaptureConfig, CaptureError, CaptureSession, PlaybackController,
    PlaybackStatus,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::submission::{Submission, SubmissionSource};

/// How often the processor reconciles playback that ran to its natural end
/// while in [`Phase::Speaking`].
const PLAYBACK_POLL: Duration = Duration::from_millis(200);

/// Where the live submission currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No submission in flight.
    Idle,
    /// Response tokens are streaming in.
    Submitting,
    /// The finished response is being turned into audio.
    Synthesizing,
    /// Synthesized audio is playing.
    Speaking,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Submitting => "submitting",
            Phase::Synthesizing => "synthesizing",
            Phase::Speaking => "speaking",
        };
        f.write_str(name)
    }
}

/// Everything an observer can watch change, published on a `watch` channel
/// after each mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub phase: Phase,
    /// Visible response text: streamed tokens so far, or the finished
    /// response, or a fallback message after a stream failure.
    pub response: String,
    pub capturing: bool,
    pub playback: PlaybackStatus,
    pub voice_enabled: bool,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            response: String::new(),
            capturing: false,
            playback: PlaybackStatus::Stopped,
            voice_enabled: true,
        }
    }
}

/// Emitted to the orchestrator's event receiver as the interaction advances.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorEvent {
    PhaseChanged(Phase),
    /// One streamed token of the live response, in arrival order.
    Token(String),
    /// The live response finished streaming; carries the full text.
    ResponseComplete(String),
    /// The response stream failed; carries the fallback text that now ends
    /// the visible response.
    ResponseFailed(String),
    CaptureStarted,
    CaptureFailed(CaptureError),
    /// A finished capture transcribed to this text, which is then submitted
    /// exactly like typed input.
    TranscriptReady(String),
    /// Synthesis failed; the response text is unaffected.
    SynthesisFailed(String),
    PlaybackChanged(PlaybackStatus),
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub voice_enabled: bool,
    pub capture: CaptureConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            voice_enabled: true,
            capture: CaptureConfig::default(),
        }
    }
}

enum Command {
    Submit { text: String, source: SubmissionSource },
    StopSubmission,
    StartCapture,
    StopCapture,
    PausePlayback,
    ResumePlayback,
    StopPlayback,
    SetVoiceEnabled(bool),
}

/// Results reported back by tasks spawned on behalf of a submission or a
/// capture. Submission-tagged events are dropped unless `id` still names
/// the live, uncancelled submission.
enum TaskEvent {
    Token { id: u64, text: String },
    StreamComplete { id: u64 },
    StreamFailed { id: u64, reason: String },
    SynthesisReady { id: u64, clip: AudioClip },
    SynthesisFailed { id: u64, reason: String },
    CaptureFinished {
        session: CaptureSession,
        result: Result<String, CaptureError>,
    },
}

/// Handle to a running interaction processor. All methods are
/// fire-and-forget; results come back through [`Orchestrator::next_event`]
/// and the snapshot watch channel.
pub struct Orchestrator {
    cmd_tx: mpsc::UnboundedSender<Command>,
    event_rx: mpsc::UnboundedReceiver<OrchestratorEvent>,
    snapshot_rx: watch::Receiver<Snapshot>,
    #[allow(dead_code)]
    processor: JoinHandle<()>,
}

impl Orchestrator {
    pub fn new(
        chat: Arc<dyn ChatService + Send + Sync>,
        transcriber: Arc<dyn Transcriber + Send + Sync>,
        synthesizer: Arc<dyn Synthesizer + Send + Sync>,
        capture_backend: Box<dyn CaptureBackend>,
        sink: Box<dyn AudioSink>,
        config: OrchestratorConfig,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot {
            voice_enabled: config.voice_enabled,
            ..Snapshot::default()
        });

        let processor = Processor {
            chat,
            transcriber,
            synthesizer,
            playback: PlaybackController::new(sink),
            capture: CaptureSlot::Ready(CaptureSession::new(capture_backend, config.capture)),
            voice_enabled: config.voice_enabled,
            phase: Phase::Idle,
            live: None,
            response: String::new(),
            next_id: 0,
            cmd_rx,
            task_rx,
            task_tx,
            event_tx,
            snapshot_tx,
        };
        let processor = tokio::spawn(processor.run());

        Self {
            cmd_tx,
            event_rx,
            snapshot_rx,
            processor,
        }
    }

    /// Submit typed text. Empty or whitespace-only text is ignored; any
    /// live submission is superseded before the new one starts.
    pub fn submit(&self, text: impl Into<String>) {
        self.send(Command::Submit {
            text: text.into(),
            source: SubmissionSource::Typed,
        });
    }

    /// Cancel the live submission, if any. No further events for it will
    /// be emitted.
    pub fn stop_submission(&self) {
        self.send(Command::StopSubmission);
    }

    pub fn start_capture(&self) {
        self.send(Command::StartCapture);
    }

    pub fn stop_capture(&self) {
        self.send(Command::StopCapture);
    }

    pub fn pause_playback(&self) {
        self.send(Command::PausePlayback);
    }

    pub fn resume_playback(&self) {
        self.send(Command::ResumePlayback);
    }

    pub fn stop_playback(&self) {
        self.send(Command::StopPlayback);
    }

    pub fn set_voice_enabled(&self, enabled: bool) {
        self.send(Command::SetVoiceEnabled(enabled));
    }

    pub async fn next_event(&mut self) -> Option<OrchestratorEvent> {
        self.event_rx.recv().await
    }

    pub fn try_next_event(&mut self) -> Option<OrchestratorEvent> {
        self.event_rx.try_recv().ok()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.snapshot_rx.clone()
    }

    fn send(&self, cmd: Command) {
        if self.cmd_tx.send(cmd).is_err() {
            warn!("interaction processor is gone; command dropped");
        }
    }
}

/// The capture session leaves the processor while a deferred stop and
/// transcription run, and comes back with the result.
enum CaptureSlot {
    Ready(CaptureSession),
    Finalizing,
}

struct Processor {
    chat: Arc<dyn ChatService + Send + Sync>,
    transcriber: Arc<dyn Transcriber + Send + Sync>,
    synthesizer: Arc<dyn Synthesizer + Send + Sync>,
    playback: PlaybackController,
    capture: CaptureSlot,
    voice_enabled: bool,
    phase: Phase,
    live: Option<Submission>,
    response: String,
    next_id: u64,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    task_rx: mpsc::UnboundedReceiver<TaskEvent>,
    task_tx: mpsc::UnboundedSender<TaskEvent>,
    event_tx: mpsc::UnboundedSender<OrchestratorEvent>,
    snapshot_tx: watch::Sender<Snapshot>,
}

impl Processor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    self.handle_command(cmd);
                }
                Some(task) = self.task_rx.recv() => {
                    self.handle_task(task);
                }
                _ = tokio::time::sleep(PLAYBACK_POLL), if self.phase == Phase::Speaking => {
                    if self.playback.status() == PlaybackStatus::Stopped {
                        debug!("playback ran to its end");
                        self.emit(OrchestratorEvent::PlaybackChanged(PlaybackStatus::Stopped));
                        self.live = None;
                        self.set_phase(Phase::Idle);
                    }
                }
            }
            self.publish();
        }
        debug!("interaction processor stopped");
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Submit { text, source } => self.handle_submit(text, source),
            Command::StopSubmission => self.handle_stop_submission(),
            Command::StartCapture => self.handle_start_capture(),
            Command::StopCapture => self.handle_stop_capture(),
            Command::PausePlayback => {
                if let Err(e) = self.playback.pause() {
                    debug!("pause rejected: {e}");
                } else {
                    self.emit(OrchestratorEvent::PlaybackChanged(PlaybackStatus::Paused));
                }
            }
            Command::ResumePlayback => {
                if let Err(e) = self.playback.resume() {
                    debug!("resume rejected: {e}");
                } else {
                    self.emit(OrchestratorEvent::PlaybackChanged(PlaybackStatus::Playing));
                }
            }
            Command::StopPlayback => {
                self.playback.stop();
                self.emit(OrchestratorEvent::PlaybackChanged(PlaybackStatus::Stopped));
                if self.phase == Phase::Speaking {
                    self.live = None;
                    self.set_phase(Phase::Idle);
                }
            }
            Command::SetVoiceEnabled(enabled) => {
                self.voice_enabled = enabled;
                info!(enabled, "voice output toggled");
            }
        }
    }

    fn handle_task(&mut self, task: TaskEvent) {
        match task {
            TaskEvent::Token { id, text } => {
                if !self.is_live(id) {
                    return;
                }
                self.response.push_str(&text);
                self.emit(OrchestratorEvent::Token(text));
            }
            TaskEvent::StreamComplete { id } => {
                if !self.is_live(id) {
                    return;
                }
                self.emit(OrchestratorEvent::ResponseComplete(self.response.clone()));
                if !self.voice_enabled || self.response.trim().is_empty() {
                    self.live = None;
                    self.set_phase(Phase::Idle);
                    return;
                }
                self.set_phase(Phase::Synthesizing);
                self.spawn_synthesis(id);
            }
            TaskEvent::StreamFailed { id, reason } => {
                if !self.is_live(id) {
                    return;
                }
                warn!("response stream failed: {reason}");
                let fallback = fallback_response(&reason);
                if !self.response.is_empty() {
                    self.response.push('\n');
                }
                self.response.push_str(&fallback);
                self.emit(OrchestratorEvent::ResponseFailed(fallback));
                self.live = None;
                self.set_phase(Phase::Idle);
            }
            TaskEvent::SynthesisReady { id, clip } => {
                if !self.is_live(id) {
                    return;
                }
                if clip.is_empty() {
                    debug!("synthesis produced no audio");
                    self.live = None;
                    self.set_phase(Phase::Idle);
                    return;
                }
                match self.playback.play(&clip) {
                    Ok(()) => {
                        self.emit(OrchestratorEvent::PlaybackChanged(PlaybackStatus::Playing));
                        self.set_phase(Phase::Speaking);
                    }
                    Err(e) => {
                        error!("audio output failed: {e}");
                        self.live = None;
                        self.set_phase(Phase::Idle);
                    }
                }
            }
            TaskEvent::SynthesisFailed { id, reason } => {
                if !self.is_live(id) {
                    return;
                }
                warn!("synthesis failed: {reason}");
                self.emit(OrchestratorEvent::SynthesisFailed(reason));
                self.live = None;
                self.set_phase(Phase::Idle);
            }
            TaskEvent::CaptureFinished { session, result } => {
                self.capture = CaptureSlot::Ready(session);
                match result {
                    Ok(text) => {
                        self.emit(OrchestratorEvent::TranscriptReady(text.clone()));
                        self.handle_submit(text, SubmissionSource::Transcribed);
                    }
                    Err(e) => {
                        warn!("capture failed: {e}");
                        self.emit(OrchestratorEvent::CaptureFailed(e));
                    }
                }
            }
        }
    }

    /// Supersede any live submission and start streaming a new one. The
    /// old submission's token is cancelled and playback stopped before the
    /// new stream is spawned, so no stale token can land in the new
    /// response.
    fn handle_submit(&mut self, text: String, source: SubmissionSource) {
        let text = text.trim();
        if text.is_empty() {
            debug!("ignoring empty submission");
            return;
        }
        if let Some(prev) = self.live.take() {
            info!(superseded = prev.id, "superseding live submission");
            prev.cancel.cancel();
        }
        self.playback.stop();
        self.response.clear();

        self.next_id += 1;
        let submission = Submission::new(self.next_id, source, text.to_string());
        self.set_phase(Phase::Submitting);
        self.spawn_stream(&submission);
        self.live = Some(submission);
    }

    fn handle_stop_submission(&mut self) {
        let Some(live) = self.live.take() else {
            debug!("no live submission to stop");
            return;
        };
        info!(id = live.id, "submission stopped by the user");
        live.cancel.cancel();
        self.playback.stop();
        self.set_phase(Phase::Idle);
    }

    fn handle_start_capture(&mut self) {
        let result = match &mut self.capture {
            CaptureSlot::Ready(session) => session.start(),
            CaptureSlot::Finalizing => Err(CaptureError::AlreadyRecording),
        };
        match result {
            Ok(()) => self.emit(OrchestratorEvent::CaptureStarted),
            Err(e) => {
                warn!("capture did not start: {e}");
                self.emit(OrchestratorEvent::CaptureFailed(e));
            }
        }
    }

    /// Finalizing a capture can block on the minimum-duration floor and on
    /// the transcription request, so the session moves into a task and
    /// comes back with [`TaskEvent::CaptureFinished`].
    fn handle_stop_capture(&mut self) {
        let CaptureSlot::Ready(session) = std::mem::replace(&mut self.capture, CaptureSlot::Finalizing)
        else {
            debug!("capture already finalizing");
            return;
        };
        if !session.is_recording() {
            debug!("no capture to stop");
            self.capture = CaptureSlot::Ready(session);
            return;
        }
        let mut session = session;
        let transcriber = Arc::clone(&self.transcriber);
        let task_tx = self.task_tx.clone();
        tokio::spawn(async move {
            let result = session.stop(transcriber.as_ref()).await;
            let _ = task_tx.send(TaskEvent::CaptureFinished { session, result });
        });
    }

    fn spawn_stream(&self, submission: &Submission) {
        let chat = Arc::clone(&self.chat);
        let text = submission.text.clone();
        let id = submission.id;
        let cancel = submission.cancel.clone();
        let task_tx = self.task_tx.clone();
        tokio::spawn(async move {
            let mut stream = tokio::select! {
                _ = cancel.cancelled() => return,
                opened = chat.stream_chat(&text) => match opened {
                    Ok(stream) => stream,
                    Err(e) => {
                        if !cancel.is_cancelled() {
                            let _ = task_tx.send(TaskEvent::StreamFailed {
                                id,
                                reason: e.to_string(),
                            });
                        }
                        return;
                    }
                },
            };
            loop {
                tokio::select! {
                    // Dropping the stream here releases its source.
                    _ = cancel.cancelled() => return,
                    item = stream.next() => match item {
                        Some(Ok(token)) => {
                            if task_tx.send(TaskEvent::Token { id, text: token }).is_err() {
                                return;
                            }
                        }
                        Some(Err(e)) => {
                            let _ = task_tx.send(TaskEvent::StreamFailed {
                                id,
                                reason: e.to_string(),
                            });
                            return;
                        }
                        None => {
                            let _ = task_tx.send(TaskEvent::StreamComplete { id });
                            return;
                        }
                    },
                }
            }
        });
    }

    fn spawn_synthesis(&self, id: u64) {
        let Some(live) = &self.live else { return };
        let synthesizer = Arc::clone(&self.synthesizer);
        let text = self.response.clone();
        let cancel = live.cancel.clone();
        let task_tx = self.task_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                result = synthesizer.synthesize(&text) => {
                    let event = match result {
                        Ok(clip) => TaskEvent::SynthesisReady { id, clip },
                        Err(e) => TaskEvent::SynthesisFailed {
                            id,
                            reason: e.to_string(),
                        },
                    };
                    if !cancel.is_cancelled() {
                        let _ = task_tx.send(event);
                    }
                }
            }
        });
    }

    /// True when `id` names the live, uncancelled submission. Checked
    /// before every submission-tagged effect so a superseded stream can
    /// never emit.
    fn is_live(&self, id: u64) -> bool {
        self.live
            .as_ref()
            .is_some_and(|live| live.id == id && !live.is_cancelled())
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            debug!(from = %self.phase, to = %phase, "phase change");
            self.phase = phase;
            self.emit(OrchestratorEvent::PhaseChanged(phase));
        }
    }

    fn emit(&self, event: OrchestratorEvent) {
        let _ = self.event_tx.send(event);
    }

    fn publish(&mut self) {
        let capturing = match &self.capture {
            CaptureSlot::Ready(session) => session.is_recording(),
            CaptureSlot::Finalizing => true,
        };
        let snapshot = Snapshot {
            phase: self.phase,
            response: self.response.clone(),
            capturing,
            playback: self.playback.status(),
            voice_enabled: self.voice_enabled,
        };
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

/// Deterministic text shown in place of a response when its stream fails.
fn fallback_response(reason: &str) -> String {
    format!("Sorry, I couldn't finish that response ({reason}).")
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use assistant::{AudioPayload, TokenStream};
    use async_trait::async_trait;
    use futures::stream;
    use murmur_audio::{CaptureHandle, CaptureStream, PlaybackError};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
    use tokio_stream::wrappers::UnboundedReceiverStream;

    enum Script {
        /// Yield these items, then end the stream.
        Finite(Vec<Result<String>>),
        /// Never end on its own; items arrive through the channel.
        Live(UnboundedReceiver<Result<String>>),
        /// Fail to open the stream at all.
        Refuse(String),
    }

    struct ScriptedChat {
        scripts: Mutex<VecDeque<Script>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedChat {
        fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn tokens(items: &[&str]) -> Script {
            Script::Finite(items.iter().map(|t| Ok(t.to_string())).collect())
        }

        fn live() -> (Script, UnboundedSender<Result<String>>) {
            let (tx, rx) = unbounded_channel();
            (Script::Live(rx), tx)
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatService for ScriptedChat {
        async fn stream_chat(&self, message: &str) -> Result<TokenStream> {
            self.prompts.lock().unwrap().push(message.to_string());
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .expect("unscripted stream_chat call");
            match script {
                Script::Finite(items) => Ok(Box::pin(stream::iter(items))),
                Script::Live(rx) => Ok(Box::pin(UnboundedReceiverStream::new(rx))),
                Script::Refuse(reason) => Err(anyhow!(reason)),
            }
        }

        async fn chat(&self, _message: &str) -> Result<String> {
            unimplemented!("tests stream")
        }
    }

    struct FakeTranscriber {
        result: Result<String, String>,
    }

    #[async_trait]
    impl Transcriber for FakeTranscriber {
        async fn transcribe(&self, _payload: AudioPayload) -> Result<String> {
            match &self.result {
                Ok(text) => Ok(text.clone()),
                Err(reason) => Err(anyhow!(reason.clone())),
            }
        }
    }

    struct FakeSynthesizer {
        result: Result<AudioClip, String>,
        calls: AtomicUsize,
    }

    impl FakeSynthesizer {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                result: Ok(AudioClip {
                    samples: vec![0.25; 800],
                    sample_rate: 16_000,
                }),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(reason: &str) -> Arc<Self> {
            Arc::new(Self {
                result: Err(reason.to_string()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Synthesizer for FakeSynthesizer {
        async fn synthesize(&self, _text: &str) -> Result<AudioClip> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.result {
                Ok(clip) => Ok(clip.clone()),
                Err(reason) => Err(anyhow!(reason.clone())),
            }
        }
    }

    struct FakeHandle {
        stopped: Arc<AtomicBool>,
    }

    impl CaptureHandle for FakeHandle {
        fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    struct FakeBackend {
        fail: Option<CaptureError>,
    }

    impl CaptureBackend for FakeBackend {
        fn open(&mut self) -> Result<CaptureStream, CaptureError> {
            if let Some(e) = self.fail.take() {
                return Err(e);
            }
            let (tx, rx) = std::sync::mpsc::channel();
            tx.send(vec![0.1_f32; 1600]).unwrap();
            drop(tx);
            Ok(CaptureStream {
                chunks: rx,
                sample_rate: 16_000,
                handle: Box::new(FakeHandle {
                    stopped: Arc::new(AtomicBool::new(false)),
                }),
            })
        }
    }

    struct SilentSink {
        playing: bool,
    }

    impl AudioSink for SilentSink {
        fn start(&mut self, _clip: &AudioClip) -> Result<(), PlaybackError> {
            self.playing = true;
            Ok(())
        }

        fn pause(&mut self) -> Result<(), PlaybackError> {
            Ok(())
        }

        fn resume(&mut self) -> Result<(), PlaybackError> {
            Ok(())
        }

        fn stop(&mut self) {
            self.playing = false;
        }

        fn is_finished(&self) -> bool {
            !self.playing
        }
    }

    fn orchestrator(
        chat: Arc<ScriptedChat>,
        synthesizer: Arc<FakeSynthesizer>,
        voice_enabled: bool,
    ) -> Orchestrator {
        orchestrator_with_capture(chat, synthesizer, voice_enabled, FakeBackend { fail: None })
    }

    fn orchestrator_with_capture(
        chat: Arc<ScriptedChat>,
        synthesizer: Arc<FakeSynthesizer>,
        voice_enabled: bool,
        backend: FakeBackend,
    ) -> Orchestrator {
        Orchestrator::new(
            chat,
            Arc::new(FakeTranscriber {
                result: Ok("what's the weather".to_string()),
            }),
            synthesizer,
            Box::new(backend),
            Box::new(SilentSink { playing: false }),
            OrchestratorConfig {
                voice_enabled,
                capture: CaptureConfig {
                    min_duration: Duration::ZERO,
                    ..CaptureConfig::default()
                },
            },
        )
    }

    /// Drain events until `stop` matches, returning everything seen
    /// including the match.
    async fn events_until(
        orch: &mut Orchestrator,
        stop: impl Fn(&OrchestratorEvent) -> bool,
    ) -> Vec<OrchestratorEvent> {
        let mut seen = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), orch.next_event())
                .await
                .expect("timed out waiting for an event")
                .expect("event channel closed");
            let done = stop(&event);
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    #[tokio::test]
    async fn tokens_stream_in_order_and_finish_idle_without_voice() {
        let chat = ScriptedChat::new(vec![ScriptedChat::tokens(&["Hi", "!"])]);
        let mut orch = orchestrator(chat, FakeSynthesizer::ok(), false);
        orch.submit("hello");

        let events = events_until(&mut orch, |e| {
            matches!(e, OrchestratorEvent::PhaseChanged(Phase::Idle))
        })
        .await;

        let tokens: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                OrchestratorEvent::Token(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(tokens, ["Hi", "!"]);
        assert!(events.contains(&OrchestratorEvent::ResponseComplete("Hi!".to_string())));
        assert_eq!(orch.snapshot().response, "Hi!");
        assert_eq!(orch.snapshot().phase, Phase::Idle);
    }

    #[tokio::test]
    async fn a_finished_response_is_synthesized_and_spoken() {
        let chat = ScriptedChat::new(vec![ScriptedChat::tokens(&["Hi", "!"])]);
        let synthesizer = FakeSynthesizer::ok();
        let mut orch = orchestrator(chat, Arc::clone(&synthesizer), true);
        orch.submit("hello");

        let events = events_until(&mut orch, |e| {
            matches!(e, OrchestratorEvent::PhaseChanged(Phase::Speaking))
        })
        .await;

        assert!(events.contains(&OrchestratorEvent::PhaseChanged(Phase::Synthesizing)));
        assert!(events.contains(&OrchestratorEvent::PlaybackChanged(PlaybackStatus::Playing)));
        assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(orch.snapshot().playback, PlaybackStatus::Playing);
    }

    #[tokio::test]
    async fn empty_submissions_are_ignored() {
        let chat = ScriptedChat::new(vec![ScriptedChat::tokens(&["ok"])]);
        let mut orch = orchestrator(Arc::clone(&chat), FakeSynthesizer::ok(), false);
        orch.submit("   ");
        orch.submit("");
        orch.submit("real");

        events_until(&mut orch, |e| {
            matches!(e, OrchestratorEvent::PhaseChanged(Phase::Idle))
        })
        .await;
        assert_eq!(chat.prompts(), ["real"]);
    }

    #[tokio::test]
    async fn a_newer_submission_silences_the_superseded_stream() {
        let (live, live_tx) = ScriptedChat::live();
        let chat = ScriptedChat::new(vec![live, ScriptedChat::tokens(&["B1"])]);
        let mut orch = orchestrator(Arc::clone(&chat), FakeSynthesizer::ok(), false);

        orch.submit("first");
        live_tx.send(Ok("A1".to_string())).unwrap();
        events_until(&mut orch, |e| {
            matches!(e, OrchestratorEvent::Token(t) if t == "A1")
        })
        .await;
        assert_eq!(orch.snapshot().response, "A1");

        let mut watch = orch.watch();
        orch.submit("second");
        // The response leaves "A1" only once the supersession has been
        // processed, which is when the first token is cancelled.
        watch.wait_for(|s| s.response != "A1").await.unwrap();
        // Late tokens from the first stream must never surface.
        let _ = live_tx.send(Ok("A2".to_string()));

        let events = events_until(&mut orch, |e| {
            matches!(e, OrchestratorEvent::ResponseComplete(_))
        })
        .await;
        let tokens: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                OrchestratorEvent::Token(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(tokens, ["B1"]);
        assert_eq!(orch.snapshot().response, "B1");
        assert_eq!(chat.prompts(), ["first", "second"]);
    }

    #[tokio::test]
    async fn stream_failure_ends_with_a_fallback_response() {
        let chat = ScriptedChat::new(vec![Script::Finite(vec![
            Ok("partial".to_string()),
            Err(anyhow!("connection reset")),
        ])]);
        let mut orch = orchestrator(chat, FakeSynthesizer::ok(), true);
        orch.submit("hello");

        let events = events_until(&mut orch, |e| {
            matches!(e, OrchestratorEvent::PhaseChanged(Phase::Idle))
        })
        .await;

        let fallback = events
            .iter()
            .find_map(|e| match e {
                OrchestratorEvent::ResponseFailed(text) => Some(text.clone()),
                _ => None,
            })
            .expect("a fallback response");
        assert!(fallback.contains("connection reset"));
        let snapshot = orch.snapshot();
        assert!(snapshot.response.starts_with("partial"));
        assert!(snapshot.response.ends_with(&fallback));
        assert_eq!(snapshot.phase, Phase::Idle);
        // A failed stream is never synthesized.
        assert_eq!(snapshot.playback, PlaybackStatus::Stopped);
    }

    #[tokio::test]
    async fn refused_stream_is_reported_the_same_way() {
        let chat = ScriptedChat::new(vec![Script::Refuse("service offline".to_string())]);
        let mut orch = orchestrator(chat, FakeSynthesizer::ok(), false);
        orch.submit("hello");

        let events = events_until(&mut orch, |e| {
            matches!(e, OrchestratorEvent::PhaseChanged(Phase::Idle))
        })
        .await;
        assert!(events.iter().any(
            |e| matches!(e, OrchestratorEvent::ResponseFailed(text) if text.contains("service offline"))
        ));
    }

    #[tokio::test]
    async fn synthesis_failure_keeps_the_response_and_returns_to_idle() {
        let chat = ScriptedChat::new(vec![ScriptedChat::tokens(&["Hi", "!"])]);
        let mut orch = orchestrator(chat, FakeSynthesizer::failing("voice model missing"), true);
        orch.submit("hello");

        let events = events_until(&mut orch, |e| {
            matches!(e, OrchestratorEvent::PhaseChanged(Phase::Idle))
        })
        .await;

        let failures: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, OrchestratorEvent::SynthesisFailed(_)))
            .collect();
        assert_eq!(failures.len(), 1);
        let snapshot = orch.snapshot();
        assert_eq!(snapshot.response, "Hi!");
        assert_eq!(snapshot.phase, Phase::Idle);
        assert_eq!(snapshot.playback, PlaybackStatus::Stopped);
    }

    #[tokio::test]
    async fn stopping_a_submission_is_silent() {
        let (live, live_tx) = ScriptedChat::live();
        let chat = ScriptedChat::new(vec![live]);
        let mut orch = orchestrator(chat, FakeSynthesizer::ok(), false);

        orch.submit("first");
        live_tx.send(Ok("A1".to_string())).unwrap();
        events_until(&mut orch, |e| {
            matches!(e, OrchestratorEvent::Token(t) if t == "A1")
        })
        .await;

        orch.stop_submission();
        let events = events_until(&mut orch, |e| {
            matches!(e, OrchestratorEvent::PhaseChanged(Phase::Idle))
        })
        .await;
        let _ = live_tx.send(Ok("A2".to_string()));

        assert!(!events
            .iter()
            .any(|e| matches!(e, OrchestratorEvent::ResponseFailed(_))));
        // Give any stale token a chance to (incorrectly) land.
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert!(orch.try_next_event().is_none());
        assert_eq!(orch.snapshot().response, "A1");
    }

    #[tokio::test]
    async fn transcripts_are_submitted_like_typed_text() {
        let chat = ScriptedChat::new(vec![ScriptedChat::tokens(&["Sunny."])]);
        let mut orch = orchestrator(Arc::clone(&chat), FakeSynthesizer::ok(), false);

        orch.start_capture();
        events_until(&mut orch, |e| {
            matches!(e, OrchestratorEvent::CaptureStarted)
        })
        .await;
        assert!(orch.snapshot().capturing);

        orch.stop_capture();
        let events = events_until(&mut orch, |e| {
            matches!(e, OrchestratorEvent::PhaseChanged(Phase::Idle))
        })
        .await;

        assert!(events.contains(&OrchestratorEvent::TranscriptReady(
            "what's the weather".to_string()
        )));
        assert_eq!(chat.prompts(), ["what's the weather"]);
        assert_eq!(orch.snapshot().response, "Sunny.");
        assert!(!orch.snapshot().capturing);
    }

    #[tokio::test]
    async fn an_unavailable_device_surfaces_and_leaves_everything_idle() {
        let chat = ScriptedChat::new(vec![]);
        let mut orch = orchestrator_with_capture(
            Arc::clone(&chat),
            FakeSynthesizer::ok(),
            false,
            FakeBackend {
                fail: Some(CaptureError::DeviceUnavailable("no microphone".to_string())),
            },
        );

        orch.start_capture();
        let events = events_until(&mut orch, |e| {
            matches!(e, OrchestratorEvent::CaptureFailed(_))
        })
        .await;

        assert!(events.contains(&OrchestratorEvent::CaptureFailed(
            CaptureError::DeviceUnavailable("no microphone".to_string())
        )));
        let snapshot = orch.snapshot();
        assert!(!snapshot.capturing);
        assert_eq!(snapshot.phase, Phase::Idle);
        assert!(chat.prompts().is_empty());
    }

    #[tokio::test]
    async fn stopping_playback_while_speaking_returns_to_idle() {
        let chat = ScriptedChat::new(vec![ScriptedChat::tokens(&["Hi"])]);
        let mut orch = orchestrator(chat, FakeSynthesizer::ok(), true);
        orch.submit("hello");
        events_until(&mut orch, |e| {
            matches!(e, OrchestratorEvent::PhaseChanged(Phase::Speaking))
        })
        .await;

        orch.stop_playback();
        events_until(&mut orch, |e| {
            matches!(e, OrchestratorEvent::PhaseChanged(Phase::Idle))
        })
        .await;
        assert_eq!(orch.snapshot().playback, PlaybackStatus::Stopped);
    }
}
