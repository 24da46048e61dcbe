//! `talk`: run an interactive voice session.
//!
//! The session speaks through the default output device and listens on the
//! default microphone. Typed lines are sent as user turns; lines starting
//! with `/` are session commands.

use std::sync::Arc;

use anyhow::{Context, Result};
use fitcoach_realtime::backend::{AutoplayPolicy, LocalMediaDevices, WebRtcTransportFactory};
use fitcoach_realtime::config::MaxTokens;
use fitcoach_realtime::{
    HttpNegotiator, RealtimeSettings, SessionConfig, SessionEvent, SessionOrchestrator,
    TranscriptRole, UserGesture, VoiceState,
};

use crate::commands::TalkArgs;
use crate::utils::input::{InputEvent, spawn_line_reader};

const PROMPT: &str = "> ";

const HELP: &str = "\
Commands:
  /audio    enable coach audio (after playback was blocked)
  /cancel   interrupt the coach
  /status   show connection and audio diagnostics
  /help     show this help
  /quit     end the session
Anything else is sent to the coach as text.";

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TalkCommand {
    Say(String),
    Audio,
    Cancel,
    Status,
    Help,
    Quit,
    Unknown(String),
    Empty,
}

impl TalkCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Self::Say(line.to_string());
        };
        match command.to_ascii_lowercase().as_str() {
            "audio" => Self::Audio,
            "cancel" | "stop" => Self::Cancel,
            "status" => Self::Status,
            "help" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            _ => Self::Unknown(line.to_string()),
        }
    }
}

/// Terminal line for a session event, if it should be shown.
pub fn render_event(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::Transcript {
            role,
            text,
            is_final: true,
        } => {
            let speaker = match role {
                TranscriptRole::User => "you",
                TranscriptRole::Assistant => "coach",
            };
            Some(format!("{speaker}: {}", text.trim()))
        }
        SessionEvent::Transcript { .. } | SessionEvent::StateChanged { .. } => None,
        SessionEvent::Error(message) => Some(format!("error: {message}")),
        SessionEvent::AutoplayBlocked => {
            Some("coach audio is blocked; type /audio to enable it".to_string())
        }
        SessionEvent::HealthWarning(warning) => Some(format!("warning: {warning}")),
    }
}

/// Per-session configuration from the command line, over the configured defaults.
pub fn session_config(settings: &RealtimeSettings, args: &TalkArgs) -> SessionConfig {
    let mut config = settings.default_session_config();
    if let Some(model) = &args.model {
        config.model.clone_from(model);
    }
    if let Some(voice) = &args.voice {
        config.voice.clone_from(voice);
    }
    if let Some(temperature) = args.temperature {
        config = config.with_temperature(temperature);
    }
    if let Some(max_tokens) = args.max_tokens {
        config = config.with_max_tokens(MaxTokens::Limit(max_tokens));
    }
    if let Some(instructions) = &args.instructions {
        config = config.with_instructions(instructions.clone());
    }
    config
}

pub async fn execute(settings: RealtimeSettings, args: TalkArgs) -> Result<()> {
    let policy = if args.require_gesture {
        AutoplayPolicy::RequireGesture
    } else {
        AutoplayPolicy::Allowed
    };
    let negotiator = HttpNegotiator::new(&settings);
    let config = session_config(&settings, &args);

    let orchestrator = SessionOrchestrator::new(
        settings,
        Arc::new(WebRtcTransportFactory::new()),
        Arc::new(negotiator),
        Arc::new(LocalMediaDevices::new(policy)),
    );
    orchestrator.set_user_name(args.name.clone());

    let _events = orchestrator.subscribe(|event| {
        if let SessionEvent::StateChanged { from, to } = event {
            tracing::debug!(%from, %to, "Voice state changed");
        }
        if let Some(line) = render_event(event) {
            println!("{line}");
        }
    });

    println!("Connecting to your {} coach...", args.mode);
    orchestrator
        .start_session(args.mode, config)
        .await
        .context("Could not start the voice session")?;
    println!("Connected. Speak or type a message; /help lists commands.");

    let result = run_loop(&orchestrator).await;
    orchestrator.stop_session().await;
    println!("Session ended.");
    result
}

async fn run_loop(orchestrator: &SessionOrchestrator) -> Result<()> {
    let mut input = spawn_line_reader(PROMPT).context("Failed to start the input reader")?;
    let mut state = orchestrator.watch_state();

    loop {
        let event = tokio::select! {
            event = input.recv() => event.unwrap_or(InputEvent::Eof),
            _ = tokio::signal::ctrl_c() => InputEvent::Interrupted,
            changed = state.changed() => {
                if changed.is_err() || !state.borrow_and_update().is_active() {
                    return session_outcome(orchestrator);
                }
                continue;
            }
        };

        let line = match event {
            InputEvent::Line(line) => line,
            InputEvent::Interrupted | InputEvent::Eof => return Ok(()),
        };

        match TalkCommand::parse(&line) {
            TalkCommand::Empty => {}
            TalkCommand::Say(text) => match orchestrator.send_text(&text).await {
                Ok(true) => {}
                Ok(false) => println!("(message not sent; the control channel is not open)"),
                Err(err) => println!("(message not sent: {})", err.user_message()),
            },
            TalkCommand::Cancel => {
                if let Err(err) = orchestrator.cancel_response().await {
                    tracing::debug!(error = %err, "Cancel ignored");
                }
            }
            TalkCommand::Audio => match orchestrator.enable_audio(UserGesture::new()) {
                Ok(()) => println!("Coach audio enabled."),
                Err(err) => println!("Could not enable audio: {err}"),
            },
            TalkCommand::Status => {
                let report = orchestrator.health_report();
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            TalkCommand::Help => println!("{HELP}"),
            TalkCommand::Unknown(command) => {
                println!("Unknown command {command}; /help lists commands.");
            }
            TalkCommand::Quit => return Ok(()),
        }
    }
}

/// The session left the active states on its own.
fn session_outcome(orchestrator: &SessionOrchestrator) -> Result<()> {
    match orchestrator.last_error_message() {
        Some(message) if orchestrator.state() == VoiceState::Error => {
            anyhow::bail!("Voice session ended: {message}")
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fitcoach_realtime::{CoachMode, HealthWarning};

    fn args() -> TalkArgs {
        TalkArgs {
            mode: CoachMode::Training,
            name: None,
            model: None,
            voice: Some("verse".into()),
            temperature: Some(0.6),
            max_tokens: None,
            instructions: Some("Metric units only.".into()),
            require_gesture: false,
        }
    }

    #[test]
    fn parses_session_commands() {
        assert_eq!(TalkCommand::parse("  "), TalkCommand::Empty);
        assert_eq!(TalkCommand::parse("/QUIT"), TalkCommand::Quit);
        assert_eq!(TalkCommand::parse("/audio"), TalkCommand::Audio);
        assert_eq!(
            TalkCommand::parse(" how many sets? "),
            TalkCommand::Say("how many sets?".into())
        );
        assert_eq!(
            TalkCommand::parse("/dance"),
            TalkCommand::Unknown("/dance".into())
        );
    }

    #[test]
    fn only_final_transcripts_are_printed() {
        let delta = SessionEvent::Transcript {
            role: TranscriptRole::Assistant,
            text: "Let".into(),
            is_final: false,
        };
        let done = SessionEvent::Transcript {
            role: TranscriptRole::Assistant,
            text: "Let's warm up. ".into(),
            is_final: true,
        };

        assert_eq!(render_event(&delta), None);
        assert_eq!(render_event(&done).as_deref(), Some("coach: Let's warm up."));
        assert_eq!(
            render_event(&SessionEvent::StateChanged {
                from: VoiceState::Idle,
                to: VoiceState::Connecting,
            }),
            None
        );
    }

    #[test]
    fn warnings_and_errors_are_printed() {
        let warning = SessionEvent::HealthWarning(HealthWarning::SpeechStale { idle_secs: 301 });
        assert_eq!(
            render_event(&warning).as_deref(),
            Some("warning: no user speech detected for 301s")
        );
        assert!(render_event(&SessionEvent::AutoplayBlocked).is_some());
    }

    #[test]
    fn session_config_overrides_defaults() {
        let settings = RealtimeSettings::new("https://coach.example.test", "key");
        let config = session_config(&settings, &args());

        assert_eq!(config.model, settings.default_model);
        assert_eq!(config.voice, "verse");
        assert_eq!(config.temperature, Some(0.6));
        assert_eq!(config.instructions.as_deref(), Some("Metric units only."));
    }
}
