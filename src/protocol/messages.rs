//! JSON message types for the translation channel.
//!
//! Every message is an object whose `message_type` field selects the variant
//! and whose `data` field carries the payload:
//!
//! - **Outbound** ([`OutboundMessage`]): `set_task`, `input_audio_data`,
//!   `end_task`
//! - **Inbound** ([`InboundMessage`]): `output_audio_data`,
//!   `partial_transcription`, `validated_transcription`,
//!   `translated_transcription`, `error`
//!
//! Audio travels as base64 PCM16LE in `data.data`.

use base64::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::audio::INPUT_SAMPLE_RATE;

/// Transcription kinds the client subscribes to in `set_task`.
pub const ALLOWED_MESSAGE_TYPES: [&str; 3] = [
    "partial_transcription",
    "validated_transcription",
    "translated_transcription",
];

const PCM_FORMAT: &str = "pcm_s16le";

// =============================================================================
// Errors
// =============================================================================

/// Failure to serialise an outbound message.
#[derive(Debug, Error)]
#[error("failed to encode message: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

/// Failure to make sense of an inbound message.  Always non-fatal: the
/// message is logged and dropped.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid base64 audio: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("`{message_type}` message is missing `{field}`")]
    MissingField {
        message_type: String,
        field: &'static str,
    },
}

// =============================================================================
// Outbound Messages (Client to Server)
// =============================================================================

/// Messages the client sends.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "message_type", content = "data", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Configure the translation pipeline.  Sent once per connection.
    SetTask(TaskConfig),
    /// One fixed-length frame of 16 kHz mono PCM16LE.
    #[serde(rename = "input_audio_data")]
    InputAudio(AudioPayload),
    /// Finish the task.  Sent once during teardown.
    EndTask { force: bool },
}

impl OutboundMessage {
    /// `set_task` for the given language pair.
    pub fn set_task(source_lang: &str, target_lang: &str) -> Self {
        OutboundMessage::SetTask(TaskConfig::new(source_lang, target_lang))
    }

    /// `input_audio_data` carrying `pcm` base64-encoded.
    pub fn input_audio(pcm: &[u8]) -> Self {
        OutboundMessage::InputAudio(AudioPayload {
            data: BASE64_STANDARD.encode(pcm),
        })
    }

    /// Non-forced `end_task`.
    pub fn end_task() -> Self {
        OutboundMessage::EndTask { force: false }
    }

    pub fn message_type(&self) -> &'static str {
        match self {
            OutboundMessage::SetTask(_) => "set_task",
            OutboundMessage::InputAudio(_) => "input_audio_data",
            OutboundMessage::EndTask { .. } => "end_task",
        }
    }

    /// Serialise to the wire text.
    pub fn encode(&self) -> Result<String, EncodeError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Base64 PCM payload of `input_audio_data` / `output_audio_data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioPayload {
    pub data: String,
}

/// `set_task` payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskConfig {
    pub input_stream: InputStream,
    pub output_stream: OutputStream,
    pub pipeline: PipelineConfig,
}

impl TaskConfig {
    pub fn new(source_lang: &str, target_lang: &str) -> Self {
        Self {
            input_stream: InputStream {
                content_type: "audio",
                source: StreamSource {
                    kind: "ws",
                    format: PCM_FORMAT,
                    sample_rate: INPUT_SAMPLE_RATE,
                    channels: 1,
                },
            },
            output_stream: OutputStream {
                content_type: "audio",
                target: StreamTarget {
                    kind: "ws",
                    format: PCM_FORMAT,
                },
            },
            pipeline: PipelineConfig {
                transcription: TranscriptionConfig {
                    source_language: source_lang.to_string(),
                },
                translations: vec![TranslationConfig {
                    target_language: target_lang.to_string(),
                    speech_generation: SpeechGeneration {
                        voice_cloning: false,
                    },
                }],
                allowed_message_types: ALLOWED_MESSAGE_TYPES.to_vec(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputStream {
    pub content_type: &'static str,
    pub source: StreamSource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamSource {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub format: &'static str,
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputStream {
    pub content_type: &'static str,
    pub target: StreamTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamTarget {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub format: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineConfig {
    pub transcription: TranscriptionConfig,
    pub translations: Vec<TranslationConfig>,
    pub allowed_message_types: Vec<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptionConfig {
    pub source_language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslationConfig {
    pub target_language: String,
    pub speech_generation: SpeechGeneration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeechGeneration {
    pub voice_cloning: bool,
}

// =============================================================================
// Inbound Messages (Server to Client)
// =============================================================================

/// A transcription relayed to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptionEvent {
    pub text: String,
    pub language_code: String,
    /// `false` only for `partial_transcription`.
    pub is_final: bool,
}

/// Messages the server sends.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Decoded 24 kHz mono PCM16LE for playback.  May be empty.
    OutputAudio(Vec<u8>),
    /// A transcription, or `None` when the message had no `transcription`
    /// object.
    Transcription(Option<TranscriptionEvent>),
    /// Server-reported error description (`"unknown"` when absent).
    Error(String),
    /// Any other `message_type`, kept for logging.
    Unrecognized(String),
}

/// Fields may be absent or `null`; both read as empty.
#[derive(Deserialize)]
struct TranscriptionBody {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    language: Option<String>,
}

impl InboundMessage {
    /// Parse one text frame from the channel.
    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        let json: Value = serde_json::from_str(text)?;
        let message_type = json
            .get("message_type")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let data = json.get("data");

        match message_type {
            "output_audio_data" => {
                let data = data.ok_or_else(|| missing(message_type, "data"))?;
                let encoded = data.get("data").and_then(Value::as_str).unwrap_or_default();
                let pcm = if encoded.is_empty() {
                    Vec::new()
                } else {
                    BASE64_STANDARD.decode(encoded)?
                };
                Ok(InboundMessage::OutputAudio(pcm))
            }
            "error" => {
                let desc = data
                    .and_then(|d| d.get("desc"))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                Ok(InboundMessage::Error(desc.to_string()))
            }
            t if t.ends_with("transcription") => {
                let data = data.ok_or_else(|| missing(message_type, "data"))?;
                let event = match data.get("transcription") {
                    Some(v) if v.is_object() => {
                        let body = TranscriptionBody::deserialize(v)?;
                        Some(TranscriptionEvent {
                            text: body.text.unwrap_or_default(),
                            language_code: body.language.unwrap_or_default(),
                            is_final: t != "partial_transcription",
                        })
                    }
                    _ => None,
                };
                Ok(InboundMessage::Transcription(event))
            }
            other => Ok(InboundMessage::Unrecognized(other.to_string())),
        }
    }
}

fn missing(message_type: &str, field: &'static str) -> DecodeError {
    DecodeError::MissingField {
        message_type: message_type.to_string(),
        field,
    }
}

// =============================================================================
// Tests
// =============================================================================
