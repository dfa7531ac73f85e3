//! Audio pipeline: capture → resample → frame assembly, and playback.
//!
//! # Pipeline
//!
//! ```text
//! SourceTrack → CaptureSink::on_data → resample (→ 16 kHz mono PCM16)
//!             → FrameAssembler (320 ms / 10 240 B frames) → protocol
//!
//! protocol → 24 kHz mono PCM16 → OutputDevice::write → speaker
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use translate_bridge::audio::{resample, FrameAssembler, PcmFormat};
//!
//! let captured = vec![0u8; 48_000 * 2 * 2 / 10]; // 100 ms, 48 kHz stereo
//! let pcm = resample(&captured, PcmFormat::new(48_000, 2), PcmFormat::PROTOCOL_INPUT);
//! assert_eq!(pcm.len(), 1_600 * 2);
//!
//! let mut asm = FrameAssembler::default();
//! assert!(asm.push_and_drain(&pcm).is_empty()); // not a full frame yet
//! ```

pub mod buffer;
pub mod capture;
pub mod playback;
pub mod resample;

pub use buffer::{
    new_shared_assembler, AudioFrame, FrameAssembler, SharedFrameAssembler, FRAME_DURATION_MS,
    OUTGOING_FRAME_BYTES,
};
pub use capture::{
    CaptureError, CaptureSink, CapturedAudio, MicrophoneSource, SourceTrack, StreamHandle,
};
pub use playback::{OutputDevice, PlaybackError, PlaybackQueue, SpeakerOutput};
pub use resample::{
    downmix_to_mono, resample, PcmFormat, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE,
};
