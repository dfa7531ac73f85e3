//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::AppPaths;

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// A required setting is missing or unusable.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ---------------------------------------------------------------------------
// ClientConfig
// ---------------------------------------------------------------------------

/// Credentials, languages and service address for one translation client.
///
/// Immutable once handed to a client.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Sent as the `ClientId` header during session negotiation.
    pub client_id: String,
    /// Sent as the `ClientSecret` header during session negotiation.
    pub client_secret: String,
    /// Language spoken in the captured audio (e.g. `"en"`).
    pub source_lang: String,
    /// Language to translate into (e.g. `"es"`).
    pub target_lang: String,
    /// Base address of the HTTP API, without trailing path.
    pub api_url: String,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("source_lang", &self.source_lang)
            .field("target_lang", &self.target_lang)
            .field("api_url", &self.api_url)
            .finish()
    }
}

impl ClientConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        source_lang: impl Into<String>,
        target_lang: impl Into<String>,
        api_url: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
            api_url: api_url.into(),
        }
    }

    /// Check that every field needed to open a session is present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("client.client_id", &self.client_id),
            ("client.client_secret", &self.client_secret),
            ("client.source_lang", &self.source_lang),
            ("client.target_lang", &self.target_lang),
            ("client.api_url", &self.api_url),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing(field));
            }
        }

        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                field: "client.api_url",
                reason: format!("expected an http(s) URL, got {:?}", self.api_url),
            });
        }

        Ok(())
    }

    /// Override fields from `TRANSLATE_*` environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let fields: [(&str, &mut String); 5] = [
            ("TRANSLATE_CLIENT_ID", &mut self.client_id),
            ("TRANSLATE_CLIENT_SECRET", &mut self.client_secret),
            ("TRANSLATE_SOURCE_LANG", &mut self.source_lang),
            ("TRANSLATE_TARGET_LANG", &mut self.target_lang),
            ("TRANSLATE_API_URL", &mut self.api_url),
        ];
        for (key, slot) in fields {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *slot = value;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ChannelConfig
// ---------------------------------------------------------------------------

/// Transport and protocol timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Timeout for the session negotiation request.
    pub request_timeout_secs: u64,
    /// Timeout for opening the message channel.
    pub connect_timeout_secs: u64,
    /// Pause between channel open and the task configuration message.
    pub settle_delay_ms: u64,
    /// Close code sent when the client shuts the channel.
    pub close_code: u16,
    /// Outbound messages that may queue before new audio frames are dropped.
    pub outbound_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            connect_timeout_secs: 30,
            settle_delay_ms: 500,
            close_code: 1000,
            outbound_capacity: 64,
        }
    }
}

impl ChannelConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

// ---------------------------------------------------------------------------
// PlaybackConfig
// ---------------------------------------------------------------------------

/// Translated-audio playback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Gain for translated audio (0.0 – 1.0).
    pub volume: f32,
    /// Upper bound on audio queued ahead of the playhead.
    pub max_buffered_secs: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            volume: 1.0,
            max_buffered_secs: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level configuration, serialised as `settings.toml`.
///
/// ```rust,no_run
/// use translate_bridge::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let mut config = AppConfig::load().unwrap();
/// config.client.apply_env_overrides();
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub client: ClientConfig,
    pub channel: ChannelConfig,
    pub playback: PlaybackConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path.
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.client.validate()?;

        if self.channel.outbound_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "channel.outbound_capacity",
                reason: "must be at least 1".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.playback.volume) {
            return Err(ConfigError::Invalid {
                field: "playback.volume",
                reason: format!("{} is outside 0.0..=1.0", self.playback.volume),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
