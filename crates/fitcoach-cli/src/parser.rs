//! Main CLI parser and top-level argument handling.

use clap::Parser;

use crate::commands::Commands;

/// Command-line interface for the fitcoach voice coach.
#[derive(Parser)]
#[command(name = "fitcoach")]
#[command(about = "Talk to a realtime fitness coach from the terminal")]
#[command(version)]
pub struct Cli {
    /// Override the realtime service base URL for this invocation
    #[arg(long = "url", global = true)]
    pub url: Option<String>,

    /// Override the realtime service access key for this invocation
    #[arg(long = "key", global = true)]
    pub key: Option<String>,

    /// Log filter directive (e.g. `fitcoach_realtime=debug`)
    #[arg(long = "log", env = "RUST_LOG", global = true)]
    pub log: Option<String>,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Tracing filter for this invocation. An explicit `--log` wins over `--verbose`.
    pub fn log_filter(&self) -> String {
        match (&self.log, self.verbose) {
            (Some(directive), _) => directive.clone(),
            (None, true) => "fitcoach_realtime=debug,fitcoach_cli=debug,info".to_string(),
            (None, false) => "warn".to_string(),
        }
    }
}
