//! Command handlers.
//!
//! Each handler is a thin wrapper that resolves settings, calls into
//! `fitcoach-realtime` and formats the result for the terminal.

pub mod check_config;
pub mod modes;
pub mod talk;

use fitcoach_realtime::RealtimeSettings;
use fitcoach_realtime::config::{ENV_ACCESS_KEY, ENV_BASE_URL};
use fitcoach_realtime::error::ConfigError;

/// Resolve connection settings, letting command-line overrides shadow the
/// environment.
pub fn resolve_settings(
    url: Option<&str>,
    key: Option<&str>,
) -> Result<RealtimeSettings, ConfigError> {
    resolve_with(url, key, |name| std::env::var(name).ok())
}

fn resolve_with<F>(url: Option<&str>, key: Option<&str>, env: F) -> Result<RealtimeSettings, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    RealtimeSettings::from_lookup(|name| match name {
        ENV_BASE_URL if url.is_some() => url.map(str::to_string),
        ENV_ACCESS_KEY if key.is_some() => key.map(str::to_string),
        other => env(other),
    })
}
