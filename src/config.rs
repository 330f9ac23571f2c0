use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// SQLite database holding the linked-device session. Created on first
    /// run; deleting it forces a fresh QR pairing.
    #[serde(default = "default_session_path")]
    pub session_path: PathBuf,
    /// Transport-side ceiling for a single delivery attempt. WhatsApp Web can
    /// take a while to ack when the phone is offline, so this is minutes, not
    /// seconds.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    3000
}
fn default_session_path() -> PathBuf {
    PathBuf::from("data/warelay-session.db")
}
fn default_send_timeout() -> u64 {
    180
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            session_path: default_session_path(),
            send_timeout_secs: default_send_timeout(),
        }
    }
}

/// Load config from TOML file with env var overrides.
pub fn load(path: &str) -> anyhow::Result<RelayConfig> {
    let content = if std::path::Path::new(path).exists() {
        std::fs::read_to_string(path)?
    } else {
        tracing::warn!("Config file not found at {}, using defaults", path);
        String::new()
    };

    let mut config: RelayConfig = toml::from_str(&content)?;

    // PORT (not WARELAY_PORT) for parity with the deployment environments
    // this service runs under.
    if let Ok(v) = std::env::var("PORT") {
        config.port = v.parse()?;
    }
    if let Ok(v) = std::env::var("WARELAY_HOST") {
        config.host = v;
    }
    if let Ok(v) = std::env::var("WARELAY_SESSION_PATH") {
        config.session_path = PathBuf::from(v);
    }

    Ok(config)
}
