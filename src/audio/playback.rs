//! Playback-side boundary and the `cpal` speaker output.
//!
//! Translated audio arrives as 24 kHz mono PCM16LE in pieces of whatever size
//! the service chooses.  An [`OutputDevice`] accepts those pieces and plays
//! them back in order.
//!
//! [`SpeakerOutput`] converts each piece to the device's native rate and
//! channel layout, queues it in a bounded [`PlaybackQueue`] and lets the
//! cpal output callback pull from the queue.  When the queue overflows, the
//! oldest audio is dropped so latency stays bounded.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use super::capture::StreamHandle;
use super::resample::{bytes_to_samples, resample, PcmFormat};

// ---------------------------------------------------------------------------
// PlaybackError
// ---------------------------------------------------------------------------

/// Errors raised by an output device.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("no output device found on the default audio host")]
    NoDevice,

    #[error("failed to query default output config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("output device is not playing")]
    NotPlaying,
}

// ---------------------------------------------------------------------------
// OutputDevice trait
// ---------------------------------------------------------------------------

/// Sequential player for PCM16LE audio at the protocol output format.
pub trait OutputDevice: Send + Sync {
    /// Begin accepting audio.
    fn start(&self) -> Result<(), PlaybackError>;

    /// Queue `pcm` (24 kHz mono PCM16LE) behind everything already written.
    fn write(&self, pcm: &[u8]) -> Result<(), PlaybackError>;

    /// Stop playback and drop anything still queued.
    fn stop(&self) -> Result<(), PlaybackError>;

    /// Gain applied to translated audio, `0.0..=1.0`.
    fn set_volume(&self, volume: f32);
}

// ---------------------------------------------------------------------------
// PlaybackQueue
// ---------------------------------------------------------------------------

/// Bounded FIFO of interleaved device samples.
///
/// ## Overflow behaviour
///
/// When a push would exceed `capacity`, the oldest samples are discarded.
#[derive(Debug)]
pub struct PlaybackQueue {
    samples: VecDeque<i16>,
    capacity: usize,
    playing: bool,
    volume: f32,
}

impl PlaybackQueue {
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "PlaybackQueue capacity must be > 0");
        Self {
            samples: VecDeque::with_capacity(capacity.min(1 << 16)),
            capacity,
            playing: false,
            volume: 1.0,
        }
    }

    pub fn start(&mut self) {
        self.playing = true;
    }

    /// Stop and clear.
    pub fn stop(&mut self) {
        self.playing = false;
        self.samples.clear();
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Append samples; returns how many old samples were dropped to make room.
    pub fn push(&mut self, samples: &[i16]) -> usize {
        let incoming = if samples.len() > self.capacity {
            &samples[samples.len() - self.capacity..]
        } else {
            samples
        };
        let skipped = samples.len() - incoming.len();

        let overflow = (self.samples.len() + incoming.len()).saturating_sub(self.capacity);
        self.samples.drain(..overflow);
        self.samples.extend(incoming.iter().copied());
        overflow + skipped
    }

    /// Fill a device buffer, padding with silence when empty or stopped.
    pub fn fill(&mut self, out: &mut [f32]) {
        if !self.playing {
            out.fill(0.0);
            return;
        }
        for slot in out.iter_mut() {
            *slot = match self.samples.pop_front() {
                Some(s) => s as f32 / i16::MAX as f32 * self.volume,
                None => 0.0,
            };
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

// ---------------------------------------------------------------------------
// SpeakerOutput
// ---------------------------------------------------------------------------

/// [`OutputDevice`] backed by the system default output device.
#[derive(Clone)]
pub struct SpeakerOutput {
    queue: Arc<Mutex<PlaybackQueue>>,
    device_format: PcmFormat,
}

impl SpeakerOutput {
    /// Open the default output device.  At most `max_buffered_secs` of audio
    /// is queued ahead of the playhead.
    pub fn open(max_buffered_secs: u32) -> Result<(Self, StreamHandle), PlaybackError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(PlaybackError::NoDevice)?;

        let supported = device.default_output_config()?;
        let device_format = PcmFormat::new(supported.sample_rate().0, supported.channels());
        let config: cpal::StreamConfig = supported.into();

        let capacity = (device_format.sample_rate as usize)
            * device_format.channels as usize
            * max_buffered_secs.max(1) as usize;
        let queue = Arc::new(Mutex::new(PlaybackQueue::new(capacity)));

        let callback_queue = Arc::clone(&queue);
        let stream = device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                // Never block the audio thread; a contended tick plays silence.
                match callback_queue.try_lock() {
                    Ok(mut q) => q.fill(data),
                    Err(_) => data.fill(0.0),
                }
            },
            |err: cpal::StreamError| {
                log::error!("playback: cpal stream error: {err}");
            },
            None,
        )?;

        stream.play()?;
        log::info!(
            "playback: speaker open ({} Hz, {} ch)",
            device_format.sample_rate,
            device_format.channels
        );

        Ok((
            Self {
                queue,
                device_format,
            },
            StreamHandle::new(stream),
        ))
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, PlaybackQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl OutputDevice for SpeakerOutput {
    fn start(&self) -> Result<(), PlaybackError> {
        self.queue().start();
        Ok(())
    }

    fn write(&self, pcm: &[u8]) -> Result<(), PlaybackError> {
        let converted = resample(pcm, PcmFormat::PROTOCOL_OUTPUT, self.device_format);
        let samples = bytes_to_samples(&converted);

        let mut queue = self.queue();
        if !queue.is_playing() {
            return Err(PlaybackError::NotPlaying);
        }
        let dropped = queue.push(&samples);
        if dropped > 0 {
            log::warn!("playback: queue full, dropped {dropped} samples");
        }
        Ok(())
    }

    fn stop(&self) -> Result<(), PlaybackError> {
        self.queue().stop();
        Ok(())
    }

    fn set_volume(&self, volume: f32) {
        self.queue().set_volume(volume);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // ---- Push / overflow ---------------------------------------------------

    #[test]
    fn push_within_capacity_keeps_everything() {
        let mut q = PlaybackQueue::new(8);
        assert_eq!(q.push(&[1, 2, 3]), 0);
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut q = PlaybackQueue::new(4);
        q.start();
        q.push(&[1, 2, 3]);
        assert_eq!(q.push(&[4, 5, 6]), 2);
        assert_eq!(q.len(), 4);

        let mut out = [0.0f32; 4];
        q.set_volume(1.0);
        q.fill(&mut out);
        let back: Vec<i16> = out.iter().map(|s| (s * i16::MAX as f32).round() as i16).collect();
        assert_eq!(back, vec![3, 4, 5, 6]);
    }

    #[test]
    fn oversized_push_keeps_newest_tail() {
        let mut q = PlaybackQueue::new(3);
        assert_eq!(q.push(&[1, 2, 3, 4, 5]), 2);
        assert_eq!(q.len(), 3);
    }

    // ---- Fill --------------------------------------------------------------

    #[test]
    fn fill_pads_with_silence() {
        let mut q = PlaybackQueue::new(8);
        q.start();
        q.push(&[i16::MAX]);
        let mut out = [9.0f32; 3];
        q.fill(&mut out);
        assert!((out[0] - 1.0).abs() < 1e-6);
        assert_eq!(&out[1..], &[0.0, 0.0]);
        assert!(q.is_empty());
    }

    #[test]
    fn fill_is_silent_when_stopped() {
        let mut q = PlaybackQueue::new(8);
        q.push(&[i16::MAX, i16::MAX]);
        let mut out = [1.0f32; 2];
        q.fill(&mut out);
        assert_eq!(out, [0.0, 0.0]);
        // Nothing consumed while stopped.
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn volume_scales_and_clamps() {
        let mut q = PlaybackQueue::new(8);
        q.start();
        q.set_volume(0.5);
        q.push(&[i16::MAX]);
        let mut out = [0.0f32; 1];
        q.fill(&mut out);
        assert!((out[0] - 0.5).abs() < 1e-6);

        q.set_volume(3.0);
        assert_eq!(q.volume(), 1.0);
        q.set_volume(-1.0);
        assert_eq!(q.volume(), 0.0);
    }

    #[test]
    fn stop_clears_queue() {
        let mut q = PlaybackQueue::new(8);
        q.start();
        q.push(&[1, 2, 3]);
        q.stop();
        assert!(!q.is_playing());
        assert!(q.is_empty());
    }

    #[test]
    #[should_panic(expected = "PlaybackQueue capacity must be > 0")]
    fn zero_capacity_panics() {
        let _ = PlaybackQueue::new(0);
    }
}
