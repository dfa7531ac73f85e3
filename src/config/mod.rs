//! Configuration module.
//!
//! Provides `AppConfig` (top-level settings), the `ClientConfig` handed to a
//! translation client, transport/playback sub-configs, `AppPaths` for the
//! platform config directory, and TOML persistence via `AppConfig::load` /
//! `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{AppConfig, ChannelConfig, ClientConfig, ConfigError, PlaybackConfig};
