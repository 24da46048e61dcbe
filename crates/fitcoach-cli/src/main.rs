//! CLI entry point - the composition root.
//!
//! Settings come from the environment (optionally a `.env` file) with
//! command-line overrides; handlers wire the realtime session together.

use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use fitcoach_cli::handlers::{self, resolve_settings};
use fitcoach_cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(cli.log_filter()))
        .with_writer(std::io::stderr)
        .init();

    let url = cli.url.as_deref();
    let key = cli.key.as_deref();

    match cli.command {
        Some(Commands::Talk(args)) => {
            let settings = resolve_settings(url, key)?;
            handlers::talk::execute(settings, args).await?;
        }
        Some(Commands::CheckConfig) => handlers::check_config::execute(url, key)?,
        Some(Commands::Modes) => handlers::modes::execute(),
        None => Cli::command().print_help()?,
    }

    Ok(())
}
