//! CLI subcommand definitions.

use clap::{Args, Subcommand};
use fitcoach_realtime::CoachMode;

#[derive(Subcommand)]
pub enum Commands {
    /// Start a voice session with the coach
    ///
    /// Speak into the default microphone or type a message and press enter.
    /// Type /help inside the session for the available commands.
    Talk(TalkArgs),

    /// Check the realtime service configuration without connecting
    CheckConfig,

    /// List the available coaching modes
    Modes,
}

#[derive(Args, Debug, Clone)]
pub struct TalkArgs {
    /// Coaching mode: general, training, nutrition or fasting
    #[arg(short, long, default_value = "general")]
    pub mode: CoachMode,

    /// Your name, used to personalise the greeting
    #[arg(short, long)]
    pub name: Option<String>,

    /// Realtime model (defaults to the configured model)
    #[arg(long)]
    pub model: Option<String>,

    /// Coach voice (defaults to the configured voice)
    #[arg(long)]
    pub voice: Option<String>,

    /// Sampling temperature
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Cap on response length in tokens
    #[arg(long = "max-tokens")]
    pub max_tokens: Option<u32>,

    /// Extra instructions appended to the coaching prompt
    #[arg(long)]
    pub instructions: Option<String>,

    /// Hold coach audio until /audio is typed
    #[arg(long = "require-gesture")]
    pub require_gesture: bool,
}

#[cfg(test)]
mod tests {
    use crate::parser::Cli;
    use clap::Parser;

    use super::*;

    #[test]
    fn test_talk_defaults() {
        let cli = Cli::parse_from(["fitcoach", "talk"]);
        let Some(Commands::Talk(args)) = cli.command else {
            panic!("expected talk command");
        };
        assert_eq!(args.mode, CoachMode::General);
        assert!(args.name.is_none());
        assert!(!args.require_gesture);
    }

    #[test]
    fn test_talk_options() {
        let cli = Cli::parse_from([
            "fitcoach",
            "talk",
            "--mode",
            "Nutrition",
            "--name",
            "Sam",
            "--temperature",
            "0.7",
            "--max-tokens",
            "300",
            "--require-gesture",
        ]);
        let Some(Commands::Talk(args)) = cli.command else {
            panic!("expected talk command");
        };
        assert_eq!(args.mode, CoachMode::Nutrition);
        assert_eq!(args.name.as_deref(), Some("Sam"));
        assert_eq!(args.temperature, Some(0.7));
        assert_eq!(args.max_tokens, Some(300));
        assert!(args.require_gesture);
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        assert!(Cli::try_parse_from(["fitcoach", "talk", "--mode", "yoga"]).is_err());
    }

    #[test]
    fn test_check_config_parses() {
        let cli = Cli::parse_from(["fitcoach", "check-config"]);
        assert!(matches!(cli.command, Some(Commands::CheckConfig)));
    }
}
