//! Live speech translation bridge.
//!
//! Streams audio from a capture source to a cloud translation service over a
//! WebSocket, plays the translated speech back and relays transcriptions.

pub mod audio;
pub mod config;
pub mod pipeline;
pub mod protocol;
pub mod session;
