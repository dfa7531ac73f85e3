//! Streaming translation pipeline.
//!
//! # Architecture
//!
//! ```text
//! TranslationClient::start(source)
//!        │
//!        ▼
//! orchestrator task  ← single writer of connection state, delivers callbacks
//!        │
//!        ├─ SessionNegotiator::create_session      → Connecting
//!        ├─ ChannelConnector::connect               → Connected
//!        │     └─ +500 ms: set_task
//!        ├─ ChannelEvent::Message → ProtocolClient  → output device / handler
//!        └─ stop | close | failure → teardown       → Disconnected
//!
//! capture thread → AudioUplink → resample → FrameAssembler → input_audio_data
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use translate_bridge::audio::{MicrophoneSource, SpeakerOutput};
//! use translate_bridge::config::AppConfig;
//! use translate_bridge::pipeline::TranslationClient;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load()?;
//!     let (speaker, _out_stream) = SpeakerOutput::open(config.playback.max_buffered_secs)?;
//!     let (mic, _in_stream) = MicrophoneSource::open()?;
//!
//!     let client = TranslationClient::with_defaults(
//!         config.client.clone(),
//!         config.channel.clone(),
//!         Arc::new(speaker),
//!     )?;
//!     client.start(Arc::new(mic));
//!     tokio::signal::ctrl_c().await?;
//!     client.stop();
//!     Ok(())
//! }
//! ```

pub mod events;
pub mod lifecycle;
pub mod protocol_client;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use crate::protocol::TranscriptionEvent;
pub use events::{
    ClientError, NoopHandler, Notification, TranslationHandler, CLIENT_ERROR_CODE,
};
pub use lifecycle::TranslationClient;
pub use protocol_client::ProtocolClient;
pub use state::{ConnectionState, StateCell};
