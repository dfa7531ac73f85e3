//! Translation channel protocol.
//!
//! - [`messages`]: JSON wire types (`set_task`, `input_audio_data`, ...)
//! - [`channel`]: the duplex WebSocket transport and its handle

pub mod channel;
pub mod messages;

pub use channel::{
    ChannelConnector, ChannelError, ChannelEvent, ChannelHandle, ChannelTransport, CloseRequest,
    WebSocketConnector,
};
pub use messages::{
    DecodeError, EncodeError, InboundMessage, OutboundMessage, TaskConfig, TranscriptionEvent,
};
