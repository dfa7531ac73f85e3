//! Capture-side boundary and the `cpal` microphone source.
//!
//! The translation client never talks to an audio device directly.  It is
//! handed a [`SourceTrack`] (something that produces PCM frames and whose
//! audible playback can be muted) and attaches a [`CaptureSink`] to it for
//! the lifetime of a session.
//!
//! [`MicrophoneSource`] is the bundled implementation backed by the system
//! default input device.  The returned [`StreamHandle`] is a RAII guard;
//! dropping it stops the hardware stream.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

// ---------------------------------------------------------------------------
// CapturedAudio
// ---------------------------------------------------------------------------

/// One buffer of interleaved PCM as delivered by a capture source.
#[derive(Debug, Clone, Copy)]
pub struct CapturedAudio<'a> {
    /// Raw interleaved little-endian sample bytes.
    pub data: &'a [u8],
    /// Bits per sample; only 16 is accepted by the translation client.
    pub bits_per_sample: u16,
    /// Sample rate of `data` in Hz.
    pub sample_rate: u32,
    /// Number of interleaved channels.
    pub channels: u16,
    /// Frames (samples per channel) in `data`.
    pub frames: usize,
    /// Source-defined capture timestamp.
    pub timestamp: i64,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Receives captured audio.  Called on the source's own thread; must not
/// block.
pub trait CaptureSink: Send + Sync {
    fn on_data(&self, audio: CapturedAudio<'_>);
}

/// An audio source whose frames can be tapped and whose audible output can
/// be muted while its translation plays instead.
pub trait SourceTrack: Send + Sync {
    /// Set the audible volume of the original audio (`0.0` mutes, `1.0` is
    /// full volume).
    fn set_volume(&self, volume: f64);

    /// Start delivering frames to `sink`, replacing any previous sink.
    fn add_sink(&self, sink: Arc<dyn CaptureSink>) -> Result<(), CaptureError>;

    /// Stop delivering frames.
    fn remove_sink(&self) -> Result<(), CaptureError>;
}

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while setting up or running audio capture.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("capture source rejected sink change: {0}")]
    Sink(String),
}

// ---------------------------------------------------------------------------
// StreamHandle
// ---------------------------------------------------------------------------

/// RAII guard that keeps a cpal stream alive.
pub struct StreamHandle {
    _stream: cpal::Stream,
}

impl StreamHandle {
    pub(crate) fn new(stream: cpal::Stream) -> Self {
        Self { _stream: stream }
    }
}

// ---------------------------------------------------------------------------
// Sample conversion
// ---------------------------------------------------------------------------

/// Convert `f32` samples in `[-1.0, 1.0]` to PCM16LE bytes, clamping
/// out-of-range input.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

// ---------------------------------------------------------------------------
// SinkSlot
// ---------------------------------------------------------------------------

/// The currently attached sink plus the track volume, shared with the
/// device callback.
#[derive(Default)]
struct SinkSlot {
    sink: Mutex<Option<Arc<dyn CaptureSink>>>,
    /// `f32` bits of the current volume.
    volume: AtomicU32,
}

impl SinkSlot {
    fn current(&self) -> Option<Arc<dyn CaptureSink>> {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace(&self, sink: Option<Arc<dyn CaptureSink>>) {
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = sink;
    }
}

// ---------------------------------------------------------------------------
// MicrophoneSource
// ---------------------------------------------------------------------------

/// [`SourceTrack`] backed by the system default input device.
///
/// A microphone has no audible playback of its own, so `set_volume` only
/// records the level; [`is_muted`](Self::is_muted) reports it to the host.
///
/// ```rust,no_run
/// use translate_bridge::audio::MicrophoneSource;
///
/// let (source, _handle) = MicrophoneSource::open().unwrap();
/// // `source` can now be handed to `TranslationClient::start`.
/// ```
#[derive(Clone)]
pub struct MicrophoneSource {
    slot: Arc<SinkSlot>,
    sample_rate: u32,
    channels: u16,
}

impl MicrophoneSource {
    /// Open the default input device and start its stream.
    ///
    /// Frames are dropped until a sink is attached.
    pub fn open() -> Result<(Self, StreamHandle), CaptureError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(CaptureError::NoDevice)?;

        let supported = device.default_input_config()?;
        let channels = supported.channels();
        let sample_rate = supported.sample_rate().0;
        let config: cpal::StreamConfig = supported.into();

        let slot = Arc::new(SinkSlot::default());
        slot.volume.store(1.0f32.to_bits(), Ordering::Relaxed);

        let callback_slot = Arc::clone(&slot);
        let started = Instant::now();

        let stream = device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let Some(sink) = callback_slot.current() else {
                    return;
                };
                let bytes = f32_to_pcm16(data);
                sink.on_data(CapturedAudio {
                    data: &bytes,
                    bits_per_sample: 16,
                    sample_rate,
                    channels,
                    frames: data.len() / channels.max(1) as usize,
                    timestamp: started.elapsed().as_micros() as i64,
                });
            },
            |err: cpal::StreamError| {
                log::error!("capture: cpal stream error: {err}");
            },
            None,
        )?;

        stream.play()?;
        log::info!("capture: microphone open ({sample_rate} Hz, {channels} ch)");

        Ok((
            Self {
                slot,
                sample_rate,
                channels,
            },
            StreamHandle::new(stream),
        ))
    }

    /// Native sample rate of the capture stream in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of interleaved channels delivered per frame.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Last volume set through [`SourceTrack::set_volume`].
    pub fn volume(&self) -> f64 {
        f32::from_bits(self.slot.volume.load(Ordering::Relaxed)) as f64
    }

    pub fn is_muted(&self) -> bool {
        self.volume() == 0.0
    }
}

impl SourceTrack for MicrophoneSource {
    fn set_volume(&self, volume: f64) {
        self.slot
            .volume
            .store((volume as f32).to_bits(), Ordering::Relaxed);
    }

    fn add_sink(&self, sink: Arc<dyn CaptureSink>) -> Result<(), CaptureError> {
        self.slot.replace(Some(sink));
        Ok(())
    }

    fn remove_sink(&self) -> Result<(), CaptureError> {
        self.slot.replace(None);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f32_conversion_scales_and_clamps() {
        let bytes = f32_to_pcm16(&[0.0, 1.0, -1.0, 2.0, -2.0, 0.5]);
        let samples: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|p| i16::from_le_bytes([p[0], p[1]]))
            .collect();
        assert_eq!(samples, vec![0, 32767, -32767, 32767, -32767, 16383]);
    }

    struct CountingSink(std::sync::atomic::AtomicUsize);

    impl CaptureSink for CountingSink {
        fn on_data(&self, audio: CapturedAudio<'_>) {
            self.0.fetch_add(audio.data.len(), Ordering::SeqCst);
        }
    }

    #[test]
    fn sink_slot_attach_and_detach() {
        let slot = SinkSlot::default();
        assert!(slot.current().is_none());

        let sink = Arc::new(CountingSink(Default::default()));
        slot.replace(Some(sink.clone()));
        let attached = slot.current().expect("attached");
        attached.on_data(CapturedAudio {
            data: &[0; 8],
            bits_per_sample: 16,
            sample_rate: 48_000,
            channels: 2,
            frames: 2,
            timestamp: 0,
        });
        assert_eq!(sink.0.load(Ordering::SeqCst), 8);

        slot.replace(None);
        assert!(slot.current().is_none());
    }

    #[test]
    fn captured_audio_is_copy_and_send() {
        fn assert_send<T: Send + Copy>() {}
        assert_send::<CapturedAudio<'static>>();
    }
}
