//! Protocol side of a translation run: outbound messages on the open channel
//! and dispatch of inbound ones.

use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;

use crate::audio::OutputDevice;
use crate::config::ClientConfig;
use crate::protocol::{ChannelError, ChannelHandle, EncodeError, InboundMessage, OutboundMessage};

use super::events::{ClientError, Notification};

/// Reason sent with the close frame at teardown.
pub const CLOSE_REASON: &str = "stop";

/// Why an outbound message did not reach the channel queue.
#[derive(Debug, Error)]
pub enum SendError {
    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Queue an outbound message goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lane {
    /// Bounded; refused when full.
    Audio,
    /// Unbounded; only refused once the channel is closing.
    Control,
}

/// Owns the channel handle for the current run and the output device that
/// plays translated audio.
pub struct ProtocolClient {
    channel: RwLock<Option<ChannelHandle>>,
    output: Arc<dyn OutputDevice>,
    close_code: u16,
}

impl ProtocolClient {
    /// `close_code` goes out with every close frame this client requests.
    pub fn new(output: Arc<dyn OutputDevice>, close_code: u16) -> Self {
        Self {
            channel: RwLock::new(None),
            output,
            close_code,
        }
    }

    pub fn output(&self) -> &Arc<dyn OutputDevice> {
        &self.output
    }

    /// Install the handle of a freshly opened channel.
    pub fn attach(&self, handle: ChannelHandle) {
        let previous = self
            .channel
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(stale) = previous {
            log::warn!("protocol: replacing a channel that was never shut down");
            stale.close(self.close_code, CLOSE_REASON);
        }
    }

    /// Remove and return the current handle.
    pub fn detach(&self) -> Option<ChannelHandle> {
        self.channel
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn is_attached(&self) -> bool {
        self.channel
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn send(&self, message: &OutboundMessage, lane: Lane) -> Result<(), SendError> {
        let text = message.encode()?;
        let channel = self.channel.read().unwrap_or_else(PoisonError::into_inner);
        let handle = channel.as_ref().ok_or(ChannelError::Closed)?;
        match lane {
            Lane::Audio => handle.send(text)?,
            Lane::Control => handle.send_control(text)?,
        }
        Ok(())
    }

    /// Send `set_task` for the configured language pair.
    pub fn send_set_task(&self, config: &ClientConfig) -> bool {
        let message = OutboundMessage::set_task(&config.source_lang, &config.target_lang);
        match self.send(&message, Lane::Control) {
            Ok(()) => {
                log::info!(
                    "protocol: set_task sent ({} -> {})",
                    config.source_lang,
                    config.target_lang
                );
                true
            }
            Err(e) => {
                log::warn!("protocol: set_task not sent: {e}");
                false
            }
        }
    }

    /// Send one audio frame.  Dropped silently when no channel is attached,
    /// dropped with a warning when the outbound queue is full.
    pub fn send_audio(&self, frame: &[u8]) -> bool {
        match self.send(&OutboundMessage::input_audio(frame), Lane::Audio) {
            Ok(()) => true,
            Err(SendError::Channel(ChannelError::Closed)) => false,
            Err(e) => {
                log::warn!("protocol: audio frame dropped: {e}");
                false
            }
        }
    }

    /// Send `end_task` and close the channel.  No-op when nothing is
    /// attached.  `end_task` rides the control lane, so a backlog of audio
    /// cannot push it out.
    pub fn shutdown(&self) {
        let Some(handle) = self.detach() else {
            return;
        };
        let sent = OutboundMessage::end_task()
            .encode()
            .map_err(SendError::from)
            .and_then(|text| handle.send_control(text).map_err(SendError::from));
        if let Err(e) = sent {
            log::warn!("protocol: end_task not sent: {e}");
        }
        handle.close(self.close_code, CLOSE_REASON);
        log::debug!("protocol: channel close requested ({})", self.close_code);
    }

    /// Decode one inbound frame.  Audio is written to the output device when
    /// `translating`; transcriptions and errors come back as notifications.
    /// Malformed frames are logged and dropped.
    pub fn handle_inbound(&self, text: &str, translating: bool) -> Option<Notification> {
        let message = match InboundMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("protocol: dropping inbound message: {e}");
                return None;
            }
        };

        match message {
            InboundMessage::OutputAudio(pcm) => {
                if translating && !pcm.is_empty() {
                    if let Err(e) = self.output.write(&pcm) {
                        log::warn!("protocol: playback write failed: {e}");
                    }
                }
                None
            }
            InboundMessage::Transcription(Some(event)) => {
                log::debug!(
                    "protocol: transcription [{}] final={}",
                    event.language_code,
                    event.is_final
                );
                Some(Notification::Transcription(event))
            }
            InboundMessage::Transcription(None) => None,
            InboundMessage::Error(desc) => {
                log::error!("protocol: server error: {desc}");
                Some(Notification::Error(ClientError::new(desc)))
            }
            InboundMessage::Unrecognized(kind) => {
                log::debug!("protocol: ignoring `{kind}` message");
                None
            }
        }
    }
}
