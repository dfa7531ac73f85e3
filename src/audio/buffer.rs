//! Outgoing frame assembly.
//!
//! Capture callbacks deliver buffers of arbitrary length; the service wants
//! fixed 320 ms frames.  [`FrameAssembler`] accumulates resampled bytes in a
//! pending buffer and cuts complete frames off its front, leaving the
//! remainder in place for the next call.
//!
//! # Example
//!
//! ```rust
//! use translate_bridge::audio::{FrameAssembler, OUTGOING_FRAME_BYTES};
//!
//! let mut asm = FrameAssembler::new(OUTGOING_FRAME_BYTES);
//! asm.push(&[0u8; 4_000]);
//! assert!(asm.drain().is_empty());
//!
//! asm.push(&[0u8; 6_240]);
//! let frames = asm.drain();
//! assert_eq!(frames.len(), 1);
//! assert_eq!(frames[0].len(), 10_240);
//! assert_eq!(asm.pending_len(), 0);
//! ```

use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};

use super::resample::{BYTES_PER_SAMPLE, INPUT_SAMPLE_RATE};

// ---------------------------------------------------------------------------
// Frame geometry
// ---------------------------------------------------------------------------

/// Duration of one outgoing frame.
pub const FRAME_DURATION_MS: u32 = 320;

/// Samples per outgoing frame at the protocol input rate.
pub const FRAME_SAMPLES: usize = (INPUT_SAMPLE_RATE * FRAME_DURATION_MS / 1000) as usize;

/// Exact byte length of every outgoing frame (320 ms × 16 kHz × 2 B).
pub const OUTGOING_FRAME_BYTES: usize = FRAME_SAMPLES * BYTES_PER_SAMPLE;

/// One immutable slice of PCM16LE mono audio.
///
/// Outgoing frames are always exactly the assembler's frame size; incoming
/// (translated) frames are whatever length the service delivers.
pub type AudioFrame = Bytes;

// ---------------------------------------------------------------------------
// FrameAssembler
// ---------------------------------------------------------------------------

/// Accumulates bytes and emits fixed-size frames.
///
/// ## Ordering
///
/// Bytes leave in exactly the order they were pushed.  A partial frame stays
/// at the front of the pending buffer untouched until enough bytes arrive to
/// complete it.
#[derive(Debug)]
pub struct FrameAssembler {
    pending: BytesMut,
    frame_bytes: usize,
}

impl FrameAssembler {
    /// Create an assembler that emits frames of `frame_bytes` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `frame_bytes == 0`.
    pub fn new(frame_bytes: usize) -> Self {
        assert!(frame_bytes > 0, "FrameAssembler frame size must be > 0");
        Self {
            pending: BytesMut::with_capacity(frame_bytes * 2),
            frame_bytes,
        }
    }

    /// Append `bytes` to the end of the pending buffer.
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Cut every complete frame off the front of the pending buffer.
    ///
    /// Returns an empty vector when less than one frame is buffered.
    pub fn drain(&mut self) -> Vec<AudioFrame> {
        let count = self.pending.len() / self.frame_bytes;
        let mut frames = Vec::with_capacity(count);
        for _ in 0..count {
            frames.push(self.pending.split_to(self.frame_bytes).freeze());
        }
        frames
    }

    /// Convenience for the capture path: `push` then `drain`.
    pub fn push_and_drain(&mut self, bytes: &[u8]) -> Vec<AudioFrame> {
        self.push(bytes);
        self.drain()
    }

    /// Discard everything buffered.
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    /// Bytes buffered but not yet emitted as a frame.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Size of every emitted frame.
    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new(OUTGOING_FRAME_BYTES)
    }
}

// ---------------------------------------------------------------------------
// SharedFrameAssembler
// ---------------------------------------------------------------------------

/// Assembler shared between the capture thread (push/drain) and teardown
/// (reset).  Critical sections are short and never cross an `.await`.
pub type SharedFrameAssembler = Arc<Mutex<FrameAssembler>>;

/// Construct a [`SharedFrameAssembler`] with the protocol frame size.
pub fn new_shared_assembler() -> SharedFrameAssembler {
    Arc::new(Mutex::new(FrameAssembler::default()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // ---- Geometry ------------------------------------------------------------

    #[test]
    fn protocol_frame_is_10240_bytes() {
        assert_eq!(FRAME_SAMPLES, 5_120);
        assert_eq!(OUTGOING_FRAME_BYTES, 10_240);
        assert_eq!(FrameAssembler::default().frame_bytes(), 10_240);
    }

    // ---- Push / drain --------------------------------------------------------

    #[test]
    fn two_unequal_writes_make_one_frame() {
        let mut asm = FrameAssembler::default();
        asm.push(&vec![1u8; 4_000]);
        assert!(asm.drain().is_empty());
        assert_eq!(asm.pending_len(), 4_000);

        asm.push(&vec![2u8; 6_240]);
        let frames = asm.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), OUTGOING_FRAME_BYTES);
        assert_eq!(asm.pending_len(), 0);
        assert!(frames[0][..4_000].iter().all(|&b| b == 1));
        assert!(frames[0][4_000..].iter().all(|&b| b == 2));
    }

    #[test]
    fn remainder_is_kept_in_order() {
        let mut asm = FrameAssembler::new(4);
        asm.push(&[1, 2, 3, 4, 5, 6]);
        let frames = asm.drain();
        assert_eq!(frames, vec![Bytes::from_static(&[1, 2, 3, 4])]);
        assert_eq!(asm.pending_len(), 2);

        asm.push(&[7, 8, 9]);
        let frames = asm.drain();
        assert_eq!(frames, vec![Bytes::from_static(&[5, 6, 7, 8])]);
        assert_eq!(asm.pending_len(), 1);
    }

    #[test]
    fn one_large_push_yields_several_frames() {
        let mut asm = FrameAssembler::new(3);
        let data: Vec<u8> = (0..11).collect();
        let frames = asm.push_and_drain(&data);
        assert_eq!(frames.len(), 3);
        let joined: Vec<u8> = frames.iter().flat_map(|f| f.iter().copied()).collect();
        assert_eq!(joined, (0..9).collect::<Vec<u8>>());
        assert_eq!(asm.pending_len(), 2);
    }

    #[test]
    fn total_output_is_floor_of_input() {
        let mut asm = FrameAssembler::new(7);
        let mut emitted = Vec::new();
        let mut total = 0usize;
        for (i, len) in [3usize, 0, 11, 5, 1, 20, 2].into_iter().enumerate() {
            let chunk: Vec<u8> = (0..len).map(|j| (i * 31 + j) as u8).collect();
            total += len;
            for frame in asm.push_and_drain(&chunk) {
                assert_eq!(frame.len(), 7);
                emitted.extend_from_slice(&frame);
            }
        }
        assert_eq!(emitted.len(), total / 7 * 7);
        assert_eq!(asm.pending_len(), total % 7);
    }

    #[test]
    fn drain_empty_returns_nothing() {
        let mut asm = FrameAssembler::default();
        assert!(asm.drain().is_empty());
    }

    // ---- Reset ---------------------------------------------------------------

    #[test]
    fn reset_discards_pending_bytes() {
        let mut asm = FrameAssembler::new(4);
        asm.push(&[1, 2, 3]);
        asm.reset();
        assert_eq!(asm.pending_len(), 0);

        asm.push(&[9, 9, 9, 9]);
        assert_eq!(asm.drain(), vec![Bytes::from_static(&[9, 9, 9, 9])]);
    }

    #[test]
    fn shared_assembler_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SharedFrameAssembler>();
    }

    // ---- Panic guard ---------------------------------------------------------

    #[test]
    #[should_panic(expected = "FrameAssembler frame size must be > 0")]
    fn zero_frame_size_panics() {
        let _ = FrameAssembler::new(0);
    }
}
