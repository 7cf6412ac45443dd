use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use clap_derive::Parser;
use config::{PathManager, Settings, load_env_file};

use assistant::HttpAssistant;
use clap::Parser;
use murmur_audio::{CaptureConfig, DefaultCaptureBackend, DefaultSink};
use murmur_core::{Orchestrator, OrchestratorConfig, OrchestratorEvent, Phase};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base URL of the assistant service
    #[arg(long, env = "ASSISTANT_URL")]
    url: Option<String>,

    /// Locale hint for transcription (e.g. "en")
    #[arg(long)]
    language: Option<String>,

    /// Do not speak responses aloud
    #[arg(long)]
    no_voice: bool,

    /// Minimum microphone capture length in milliseconds
    #[arg(long)]
    min_capture_ms: Option<u64>,

    #[arg(long, short)]
    tracing: bool,
}

// Application state
struct AppState {
    orchestrator: Orchestrator,
    assistant: Arc<HttpAssistant>,
    voice_enabled: bool,
}

fn setup_tracing(enable: bool) {
    if enable {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(Level::TRACE)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .expect("Setting default subscriber failed");
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(Level::ERROR)
            .with_writer(|| std::io::sink())
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .expect("Setting default subscriber failed");
    }
}

fn print_status_bar(url: &str, voice_enabled: bool) {
    let terminal_width: usize = 80;
    let voice = if voice_enabled { "voice on" } else { "voice off" };
    let status = format!(" {} • {} ", url, voice);
    let padding = terminal_width.saturating_sub(status.len());
    let left_pad = padding / 2;
    let right_pad = padding - left_pad;

    println!("┌{}┐", "─".repeat(terminal_width - 2));
    println!("│{}{}{}│", " ".repeat(left_pad), status, " ".repeat(right_pad));
    println!("└{}┘", "─".repeat(terminal_width - 2));
}

/// Discard events queued while we sat at the prompt (e.g. playback that
/// ran to its end), so they don't get mixed into the next interaction.
fn flush_stale_events(state: &mut AppState) {
    while state.orchestrator.try_next_event().is_some() {}
}

/// Print the interaction as it unfolds, returning once the processor is
/// idle again or has moved on to speaking the response.
async fn follow_interaction(state: &mut AppState) {
    loop {
        let Some(event) = state.orchestrator.next_event().await else {
            return;
        };
        match event {
            OrchestratorEvent::Token(token) => {
                print!("{}", token);
                let _ = io::stdout().flush();
            }
            OrchestratorEvent::ResponseComplete(_) => println!(),
            OrchestratorEvent::ResponseFailed(text) => println!("{}", text),
            OrchestratorEvent::TranscriptReady(text) => {
                if text.trim().is_empty() {
                    println!("(heard nothing)");
                    return;
                }
                println!("You said: {}", text);
            }
            OrchestratorEvent::SynthesisFailed(reason) => {
                eprintln!("(voice unavailable: {})", reason);
            }
            OrchestratorEvent::CaptureFailed(e) => {
                eprintln!("Capture failed: {}", e);
                return;
            }
            OrchestratorEvent::PhaseChanged(Phase::Idle)
            | OrchestratorEvent::PhaseChanged(Phase::Speaking) => return,
            _ => {}
        }
    }
}

// Slash command parsing and handling
mod commands {
    use super::*;

    pub enum Command {
        Quit,
        Help,
        Listen,
        StopListening,
        Pause,
        Resume,
        Silence,
        Voice(bool),
        Status,
        Tools,
    }

    pub enum CommandResult {
        Continue,
        Exit,
    }

    impl Command {
        pub fn parse(input: &str) -> Result<Self, String> {
            if !input.starts_with('/') {
                return Err("Not a command".to_string());
            }

            let parts: Vec<&str> = input[1..].split_whitespace().collect();
            if parts.is_empty() {
                return Err("Empty command".to_string());
            }

            match parts[0] {
                "quit" | "exit" => Ok(Command::Quit),
                "help" => Ok(Command::Help),
                "listen" => Ok(Command::Listen),
                "stop" => Ok(Command::StopListening),
                "pause" => Ok(Command::Pause),
                "resume" => Ok(Command::Resume),
                "silence" => Ok(Command::Silence),
                "voice" => match parts.get(1).copied() {
                    Some("on") => Ok(Command::Voice(true)),
                    Some("off") => Ok(Command::Voice(false)),
                    _ => Err("Usage: /voice <on|off>".to_string()),
                },
                "status" => Ok(Command::Status),
                "tools" => Ok(Command::Tools),
                _ => Err(format!(
                    "Unknown command: /{}. Type /help for available commands.",
                    parts[0]
                )),
            }
        }

        pub async fn execute(self, state: &mut AppState) -> CommandResult {
            match self {
                Command::Quit => {
                    println!("Goodbye!");
                    CommandResult::Exit
                }
                Command::Help => {
                    print_help();
                    println!();
                    CommandResult::Continue
                }
                Command::Listen => {
                    flush_stale_events(state);
                    state.orchestrator.start_capture();
                    loop {
                        match state.orchestrator.next_event().await {
                            Some(OrchestratorEvent::CaptureStarted) => {
                                println!("Listening... type /stop when you're done.");
                                break;
                            }
                            Some(OrchestratorEvent::CaptureFailed(e)) => {
                                eprintln!("Capture failed: {}", e);
                                break;
                            }
                            Some(_) => continue,
                            None => break,
                        }
                    }
                    println!();
                    CommandResult::Continue
                }
                Command::StopListening => {
                    if !state.orchestrator.snapshot().capturing {
                        println!("Not listening.");
                        println!();
                        return CommandResult::Continue;
                    }
                    state.orchestrator.stop_capture();
                    follow_interaction(state).await;
                    println!();
                    CommandResult::Continue
                }
                Command::Pause => {
                    state.orchestrator.pause_playback();
                    println!();
                    CommandResult::Continue
                }
                Command::Resume => {
                    state.orchestrator.resume_playback();
                    println!();
                    CommandResult::Continue
                }
                Command::Silence => {
                    state.orchestrator.stop_playback();
                    println!();
                    CommandResult::Continue
                }
                Command::Voice(enabled) => {
                    state.voice_enabled = enabled;
                    state.orchestrator.set_voice_enabled(enabled);
                    println!("Voice {}.", if enabled { "on" } else { "off" });
                    println!();
                    CommandResult::Continue
                }
                Command::Status => {
                    let snapshot = state.orchestrator.snapshot();
                    println!("Phase: {}", snapshot.phase);
                    println!("Playback: {:?}", snapshot.playback);
                    println!("Capturing: {}", snapshot.capturing);
                    match state.assistant.services_status().await {
                        Ok(services) => {
                            for (name, details) in services {
                                println!("  {}: {}", name, details);
                            }
                        }
                        Err(e) => eprintln!("Could not fetch service status: {}", e),
                    }
                    println!();
                    CommandResult::Continue
                }
                Command::Tools => {
                    match state.assistant.tools().await {
                        Ok(tools) => {
                            for tool in tools {
                                println!("  {} - {}", tool.name, tool.description);
                            }
                        }
                        Err(e) => eprintln!("Could not fetch tools: {}", e),
                    }
                    println!();
                    CommandResult::Continue
                }
            }
        }
    }

    fn print_help() {
        println!("Available commands:");
        println!("  /listen                - Start recording from the microphone");
        println!("  /stop                  - Stop recording and transcribe");
        println!("  /pause, /resume        - Pause or resume spoken playback");
        println!("  /silence               - Stop spoken playback");
        println!("  /voice <on|off>        - Toggle speaking responses aloud");
        println!("  /status                - Show interaction and service status");
        println!("  /tools                 - List tools the assistant can use");
        println!("  /quit, /exit           - Exit");
        println!("  /help                  - Show this help message");
        println!("  Ctrl+D                 - Exit");
    }
}

#[tokio::main]
async fn main() {
    load_env_file();
    let args = Args::parse();

    setup_tracing(args.tracing);

    let settings = Settings::load();
    let url = args.url.unwrap_or(settings.assistant_url);
    let language = args.language.or(settings.language);
    let voice_enabled = !args.no_voice && settings.voice_enabled;
    let min_capture_ms = args.min_capture_ms.unwrap_or(settings.min_capture_ms);

    if let Err(e) = PathManager::ensure_dirs_exist() {
        eprintln!("Warning: could not create data directories: {}", e);
    }

    let assistant = Arc::new(HttpAssistant::new(&url));
    match assistant.health().await {
        Ok(health) => println!("Connected to {} ({})", url, health.status),
        Err(e) => eprintln!("Warning: assistant at {} is unreachable: {}", url, e),
    }

    let orchestrator = Orchestrator::new(
        Arc::clone(&assistant) as _,
        Arc::clone(&assistant) as _,
        Arc::clone(&assistant) as _,
        Box::new(DefaultCaptureBackend::new()),
        Box::new(DefaultSink::new()),
        OrchestratorConfig {
            voice_enabled,
            capture: CaptureConfig {
                min_duration: Duration::from_millis(min_capture_ms),
                language,
                secure_origin: assistant::secure_origin(&url),
            },
        },
    );

    let mut state = AppState {
        orchestrator,
        assistant,
        voice_enabled,
    };

    println!();
    println!("Type /help for commands, Ctrl+D or /quit to exit.");
    println!();

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print_status_bar(state.assistant.base_url(), state.voice_enabled);
        print!("> ");
        io::stdout().flush().unwrap();

        let line = match lines.next() {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                eprintln!("Error reading input: {}", e);
                break;
            }
            None => {
                println!();
                println!("Goodbye!");
                break;
            }
        };

        let input = line.trim();

        if input.is_empty() {
            continue;
        }

        // Try to parse as command
        if input.starts_with('/') {
            match commands::Command::parse(input) {
                Ok(cmd) => match cmd.execute(&mut state).await {
                    commands::CommandResult::Exit => break,
                    commands::CommandResult::Continue => continue,
                },
                Err(err) => {
                    println!("{}", err);
                    println!();
                    continue;
                }
            }
        }

        // Regular message
        flush_stale_events(&mut state);
        state.orchestrator.submit(input);
        follow_interaction(&mut state).await;

        println!();
    }
}
