//! `check-config`: validate connection settings without opening a session.

use anyhow::Result;
use fitcoach_realtime::RealtimeSettings;

use super::resolve_settings;

pub fn execute(url: Option<&str>, key: Option<&str>) -> Result<()> {
    let settings = resolve_settings(url, key)?;
    println!("{}", describe(&settings));
    Ok(())
}

/// Human-readable summary with the access key masked.
pub fn describe(settings: &RealtimeSettings) -> String {
    let timeouts = settings.timeouts;
    format!(
        "Realtime service configuration OK\n  \
         negotiation: {}\n  \
         access key:  {}\n  \
         model:       {}\n  \
         voice:       {}\n  \
         timeouts:    connect {}s, channel {}s, ack {}s",
        settings.negotiation_url(),
        mask_key(&settings.access_key),
        settings.default_model,
        settings.default_voice,
        timeouts.connect.as_secs(),
        timeouts.channel_open.as_secs(),
        timeouts.config_ack.as_secs(),
    )
}

fn mask_key(key: &str) -> String {
    let count = key.chars().count();
    if count <= 8 {
        return "****".to_string();
    }
    let tail: String = key.chars().skip(count - 4).collect();
    format!("****{tail}")
}
