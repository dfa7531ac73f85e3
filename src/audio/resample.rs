//! PCM16 resampling and channel mixing.
//!
//! The translation service takes **16 kHz mono PCM16LE** and sends back
//! **24 kHz mono PCM16LE**.  Capture devices rarely match either format, so
//! every buffer crossing the boundary goes through [`resample`]:
//!
//! 1. [`downmix_to_mono`]: average interleaved channels into one.
//! 2. Linear interpolation from the source rate to the destination rate.
//! 3. (playback only) duplicate the mono signal into each output channel.
//!
//! All functions here are pure: no state, no I/O.

use std::borrow::Cow;

// ---------------------------------------------------------------------------
// Protocol format constants
// ---------------------------------------------------------------------------

/// Sample rate of audio sent to the service (Hz).
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of translated audio received from the service (Hz).
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Channel count used on both directions of the protocol.
pub const PROTOCOL_CHANNELS: u16 = 1;

/// Bytes per PCM16 sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Sample rate and channel layout of a PCM16LE buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmFormat {
    /// Format of every frame sent to the service.
    pub const PROTOCOL_INPUT: PcmFormat = PcmFormat {
        sample_rate: INPUT_SAMPLE_RATE,
        channels: PROTOCOL_CHANNELS,
    };

    /// Format of every audio payload received from the service.
    pub const PROTOCOL_OUTPUT: PcmFormat = PcmFormat {
        sample_rate: OUTPUT_SAMPLE_RATE,
        channels: PROTOCOL_CHANNELS,
    };

    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }
}

// ---------------------------------------------------------------------------
// Sample <-> byte helpers
// ---------------------------------------------------------------------------

/// Decode little-endian PCM16 bytes into samples.  A trailing odd byte is
/// ignored.
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Encode samples as little-endian PCM16 bytes.
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

// ---------------------------------------------------------------------------
// downmix_to_mono
// ---------------------------------------------------------------------------

/// Mix interleaved PCM16 channels down to mono by integer averaging.
///
/// The sum of the channel samples is computed in `i32` (no overflow for any
/// realistic channel count) and divided with truncation toward zero, so a
/// stereo pair `(-3, 0)` becomes `-1`.
///
/// * `channels == 1` copies the input.
/// * `channels == 0` yields an empty vector.
/// * An incomplete trailing frame is dropped.
pub fn downmix_to_mono(samples: &[i16], channels: u16) -> Vec<i16> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| {
                    let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                    (sum / n as i32) as i16
                })
                .collect()
        }
    }
}

// ---------------------------------------------------------------------------
// resample
// ---------------------------------------------------------------------------

/// Number of output samples produced for `src_samples` input samples:
/// `floor(src_samples * dst_rate / src_rate)`, computed in `u64`.
pub fn target_sample_count(src_samples: usize, src_rate: u32, dst_rate: u32) -> usize {
    if src_rate == 0 {
        return 0;
    }
    (src_samples as u64 * dst_rate as u64 / src_rate as u64) as usize
}

/// Convert a PCM16LE buffer from `src` format to `dst` format.
///
/// * Matching formats return the input borrowed, without copying.
/// * Channels are averaged down to mono first, then the mono signal is
///   linearly interpolated onto `dst_count = floor(n * dst_rate / src_rate)`
///   points spread evenly between the first and last source sample.
/// * `dst_count == 0` yields an empty buffer; `dst_count == 1` yields the
///   first mono sample as is, since the interpolation step would divide by
///   zero.
/// * When `dst.channels > 1` the mono result is duplicated into every
///   output channel.
///
/// ```rust
/// use translate_bridge::audio::{resample, PcmFormat};
///
/// // 48 kHz stereo -> 16 kHz mono: 6 frames become 2 samples.
/// let stereo: Vec<u8> = [100i16, 200, 100, 200, 100, 200, 100, 200, 100, 200, 100, 200]
///     .iter()
///     .flat_map(|s| s.to_le_bytes())
///     .collect();
/// let out = resample(&stereo, PcmFormat::new(48_000, 2), PcmFormat::new(16_000, 1));
/// assert_eq!(out.len(), 2 * 2);
/// assert_eq!(i16::from_le_bytes([out[0], out[1]]), 150);
/// ```
pub fn resample(input: &[u8], src: PcmFormat, dst: PcmFormat) -> Cow<'_, [u8]> {
    if src == dst {
        return Cow::Borrowed(input);
    }

    let samples = bytes_to_samples(input);
    let mono = downmix_to_mono(&samples, src.channels);

    let resampled = if src.sample_rate == dst.sample_rate {
        mono
    } else {
        interpolate(&mono, src.sample_rate, dst.sample_rate)
    };

    let out = match dst.channels {
        0 | 1 => resampled,
        n => resampled
            .iter()
            .flat_map(|&s| std::iter::repeat(s).take(n as usize))
            .collect(),
    };

    Cow::Owned(samples_to_bytes(&out))
}

/// Linear interpolation of a mono signal between two sample rates.
fn interpolate(mono: &[i16], src_rate: u32, dst_rate: u32) -> Vec<i16> {
    let src_len = mono.len();
    let dst_len = target_sample_count(src_len, src_rate, dst_rate);

    match dst_len {
        0 => return Vec::new(),
        1 => return vec![mono[0]],
        _ => {}
    }

    // Source position of output i is i * last / span.  Kept as an exact
    // fraction (idx0 + rem / span) so endpoints land on source samples.
    let last = (src_len - 1) as u64;
    let span = (dst_len - 1) as u64;
    let mut out = Vec::with_capacity(dst_len);

    for i in 0..dst_len as u64 {
        let num = i * last;
        let idx0 = (num / span) as usize;
        let rem = (num % span) as i64;
        let idx1 = (idx0 + 1).min(src_len - 1);

        let a = mono[idx0] as i64;
        let b = mono[idx1] as i64;
        // i64 division truncates toward zero; the blend stays within [a, b].
        let blended = (a * (span as i64 - rem) + b * rem) / span as i64;
        out.push(blended as i16);
    }

    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples_to_bytes(samples)
    }

    fn decode(bytes: &[u8]) -> Vec<i16> {
        bytes_to_samples(bytes)
    }

    // ---- identity ----------------------------------------------------------

    #[test]
    fn matching_format_is_borrowed_unchanged() {
        let input = pcm(&[1, -2, 3, -4, 5]);
        let fmt = PcmFormat::new(44_100, 1);
        let out = resample(&input, fmt, fmt);
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(&*out, &input[..]);
    }

    #[test]
    fn matching_stereo_format_keeps_odd_trailing_byte() {
        // Identity must not touch the buffer at all, even if it is ragged.
        let mut input = pcm(&[10, 20, 30, 40]);
        input.push(0xff);
        let fmt = PcmFormat::new(48_000, 2);
        assert_eq!(&*resample(&input, fmt, fmt), &input[..]);
    }

    // ---- downmix -----------------------------------------------------------

    #[test]
    fn downmix_averages_pairs() {
        let out = downmix_to_mono(&[100, 200, -50, 50, i16::MAX, i16::MAX], 2);
        assert_eq!(out, vec![150, 0, i16::MAX]);
    }

    #[test]
    fn downmix_truncates_toward_zero() {
        // (-3 + 0) / 2 = -1.5 -> -1 ; (3 + 0) / 2 = 1.5 -> 1
        assert_eq!(downmix_to_mono(&[-3, 0, 3, 0], 2), vec![-1, 1]);
    }

    #[test]
    fn downmix_extremes_do_not_overflow() {
        assert_eq!(downmix_to_mono(&[i16::MIN, i16::MIN], 2), vec![i16::MIN]);
        assert_eq!(downmix_to_mono(&[i16::MIN, i16::MAX], 2), vec![0]);
    }

    #[test]
    fn downmix_zero_channels_is_empty() {
        assert!(downmix_to_mono(&[1, 2, 3], 0).is_empty());
    }

    #[test]
    fn stereo_to_mono_same_rate_is_pairwise_average() {
        let input = pcm(&[1000, 3000, -1000, -3001, 7, 8]);
        let out = resample(
            &input,
            PcmFormat::new(16_000, 2),
            PcmFormat::new(16_000, 1),
        );
        assert_eq!(decode(&out), vec![2000, -2000, 7]);
    }

    // ---- rate conversion ---------------------------------------------------

    #[test]
    fn output_length_is_floor_of_ratio() {
        for (n, src, dst) in [
            (480usize, 48_000u32, 16_000u32),
            (441, 44_100, 16_000),
            (1000, 44_100, 16_000),
            (160, 16_000, 24_000),
            (7, 8_000, 16_000),
            (10, 48_000, 16_000),
        ] {
            let input = pcm(&vec![0i16; n]);
            let out = resample(&input, PcmFormat::new(src, 1), PcmFormat::new(dst, 1));
            let expected = n * dst as usize / src as usize;
            assert_eq!(out.len() / 2, expected, "n={n} {src}->{dst}");
        }
    }

    #[test]
    fn endpoints_are_preserved() {
        let input: Vec<i16> = (0..480).map(|i| (i * 10) as i16).collect();
        let out = decode(&resample(
            &pcm(&input),
            PcmFormat::new(48_000, 1),
            PcmFormat::new(16_000, 1),
        ));
        assert_eq!(out.len(), 160);
        assert_eq!(out[0], input[0]);
        assert_eq!(*out.last().unwrap(), *input.last().unwrap());
    }

    #[test]
    fn constant_signal_keeps_amplitude() {
        let input = pcm(&vec![1234i16; 441]);
        let out = decode(&resample(
            &input,
            PcmFormat::new(44_100, 1),
            PcmFormat::new(16_000, 1),
        ));
        assert!(out.iter().all(|&s| s == 1234));
    }

    #[test]
    fn upsampling_blends_neighbours() {
        // 2 samples at 8 kHz -> 4 samples at 16 kHz, positions 0, 1/3, 2/3, 1.
        let out = decode(&resample(
            &pcm(&[0, 300]),
            PcmFormat::new(8_000, 1),
            PcmFormat::new(16_000, 1),
        ));
        assert_eq!(out, vec![0, 100, 200, 300]);
    }

    #[test]
    fn interpolation_truncates_toward_zero() {
        // Positions 0, 1/3, 2/3, 1 between 0 and -100.
        let out = decode(&resample(
            &pcm(&[0, -100]),
            PcmFormat::new(8_000, 1),
            PcmFormat::new(16_000, 1),
        ));
        assert_eq!(out, vec![0, -33, -66, -100]);
    }

    #[test]
    fn stereo_downsample_averages_then_interpolates() {
        // 48 kHz stereo, 6 frames of (L=100, R=300) -> 2 mono samples of 200.
        let frames: Vec<i16> = std::iter::repeat([100i16, 300]).take(6).flatten().collect();
        let out = decode(&resample(
            &pcm(&frames),
            PcmFormat::new(48_000, 2),
            PcmFormat::PROTOCOL_INPUT,
        ));
        assert_eq!(out, vec![200, 200]);
    }

    // ---- dst <= 1 fallback -------------------------------------------------

    #[test]
    fn single_output_sample_is_first_input_sample() {
        // 3 samples at 48 kHz -> floor(3 * 16000 / 48000) = 1
        let out = decode(&resample(
            &pcm(&[42, 7, 9]),
            PcmFormat::new(48_000, 1),
            PcmFormat::new(16_000, 1),
        ));
        assert_eq!(out, vec![42]);
    }

    #[test]
    fn zero_output_samples_is_empty() {
        let input = pcm(&[1, 2]);
        let out = resample(&input, PcmFormat::new(48_000, 1), PcmFormat::new(16_000, 1));
        assert!(out.is_empty());
    }

    #[test]
    fn empty_input_is_empty() {
        let out = resample(&[], PcmFormat::new(44_100, 2), PcmFormat::PROTOCOL_INPUT);
        assert!(out.is_empty());
    }

    #[test]
    fn zero_source_rate_yields_nothing() {
        assert_eq!(target_sample_count(100, 0, 16_000), 0);
    }

    // ---- upmix (playback path) ---------------------------------------------

    #[test]
    fn mono_to_stereo_duplicates_samples() {
        let out = decode(&resample(
            &pcm(&[5, -5]),
            PcmFormat::new(24_000, 1),
            PcmFormat::new(24_000, 2),
        ));
        assert_eq!(out, vec![5, 5, -5, -5]);
    }

    // ---- purity ------------------------------------------------------------

    #[test]
    fn same_input_same_output() {
        let input: Vec<u8> = pcm(&(0..999).map(|i| (i * 37 % 2000) as i16).collect::<Vec<_>>());
        let a = resample(&input, PcmFormat::new(44_100, 1), PcmFormat::PROTOCOL_INPUT).into_owned();
        let b = resample(&input, PcmFormat::new(44_100, 1), PcmFormat::PROTOCOL_INPUT).into_owned();
        assert_eq!(a, b);
    }
}
