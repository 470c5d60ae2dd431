//! Fixed-shape spectrogram construction.
//!
//! The transform is a centered STFT (reflect padding of `n_fft / 2` on each
//! side, periodic Hann window of `win_length` zero-padded to `n_fft`), giving
//! `n_fft / 2 + 1` bins and `len / hop + 1` frames. It performs no shape
//! normalization itself. [`normalize`] then applies the batching contract:
//!
//! 1. frequency axis truncated to the first [`SPEC_BINS`] bins (top bin dropped)
//! 2. time axis cropped to the first [`SPEC_FRAMES`] frames, or zero-padded on
//!    the right when shorter
//!
//! All buffers are frequency-major: element `(bin, frame)` lives at
//! `bin * frames + frame`.

use std::f32::consts::PI;
use std::sync::Arc;

use realfft::{RealFftPlanner, RealToComplex};
use vocmark_core::{AudioConfig, Result, VocmarkError, SPEC_BINS, SPEC_FRAMES};

/// Magnitude and phase of a waveform, `[bins, frames]` each.
#[derive(Debug, Clone)]
pub struct Spectrogram {
    /// `|X(f, t)|`.
    pub magnitude: Vec<f32>,
    /// `arg X(f, t)` in radians.
    pub phase: Vec<f32>,
    /// Frequency bins.
    pub bins: usize,
    /// Time frames.
    pub frames: usize,
}

/// A spectrogram normalized to `[SPEC_BINS, SPEC_FRAMES]`.
#[derive(Debug, Clone)]
pub struct FixedSpectrogram {
    /// Magnitude, `SPEC_BINS * SPEC_FRAMES` values.
    pub magnitude: Vec<f32>,
    /// Phase, `SPEC_BINS * SPEC_FRAMES` values.
    pub phase: Vec<f32>,
    /// Frames produced by the transform before crop/pad.
    pub raw_frames: usize,
    /// Zero frames appended on the right.
    pub pad_frames: usize,
}

/// Short-time Fourier transform with fixed framing parameters.
///
/// Stateless after construction and cheap to share across loader threads.
#[derive(Clone)]
pub struct SpectrogramTransform {
    n_fft: usize,
    hop_length: usize,
    window: Vec<f32>,
    plan: Arc<dyn RealToComplex<f32>>,
}

impl std::fmt::Debug for SpectrogramTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrogramTransform")
            .field("n_fft", &self.n_fft)
            .field("hop_length", &self.hop_length)
            .field("win_length", &self.window.iter().filter(|&&w| w != 0.0).count())
            .finish()
    }
}

impl SpectrogramTransform {
    /// Create a transform. `win_length` must not exceed `n_fft`.
    pub fn new(n_fft: usize, hop_length: usize, win_length: usize) -> Result<Self> {
        if n_fft == 0 || hop_length == 0 || win_length == 0 || win_length > n_fft {
            return Err(VocmarkError::InvalidArgument(format!(
                "invalid STFT framing: n_fft={n_fft}, hop={hop_length}, win={win_length}"
            )));
        }
        let mut planner = RealFftPlanner::<f32>::new();
        Ok(Self {
            n_fft,
            hop_length,
            window: padded_hann_window(win_length, n_fft),
            plan: planner.plan_fft_forward(n_fft),
        })
    }

    /// Create the transform described by `process.yaml`.
    pub fn from_config(audio: &AudioConfig) -> Result<Self> {
        Self::new(audio.n_fft, audio.hop_len, audio.win_len)
    }

    /// Number of frequency bins produced.
    #[must_use]
    pub fn n_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Number of frames produced for a waveform of `len` samples.
    #[must_use]
    pub fn num_frames(&self, len: usize) -> usize {
        len / self.hop_length + 1
    }

    /// Compute magnitude and phase of `waveform`.
    pub fn transform(&self, waveform: &[f32]) -> Result<Spectrogram> {
        let half = self.n_fft / 2;
        let padded = center_pad(waveform, half);
        let frames = (padded.len() - self.n_fft) / self.hop_length + 1;
        let bins = self.n_bins();

        let mut magnitude = vec![0.0f32; bins * frames];
        let mut phase = vec![0.0f32; bins * frames];

        let mut frame_time = self.plan.make_input_vec();
        let mut frame_freq = self.plan.make_output_vec();
        let mut scratch = self.plan.make_scratch_vec();

        for t in 0..frames {
            let start = t * self.hop_length;
            frame_time.copy_from_slice(&padded[start..start + self.n_fft]);
            frame_time
                .iter_mut()
                .zip(self.window.iter())
                .for_each(|(x, w)| *x *= w);

            self.plan
                .process_with_scratch(&mut frame_time, &mut frame_freq, &mut scratch)
                .map_err(|e| VocmarkError::Audio(format!("forward FFT failed: {e}")))?;

            for (b, c) in frame_freq.iter().enumerate() {
                magnitude[b * frames + t] = c.norm();
                phase[b * frames + t] = c.im.atan2(c.re);
            }
        }

        Ok(Spectrogram {
            magnitude,
            phase,
            bins,
            frames,
        })
    }

    /// Transform then normalize to `[SPEC_BINS, SPEC_FRAMES]`.
    pub fn fixed(&self, waveform: &[f32]) -> Result<FixedSpectrogram> {
        normalize(&self.transform(waveform)?)
    }
}

/// Truncate the frequency axis and crop/pad the time axis.
pub fn normalize(spec: &Spectrogram) -> Result<FixedSpectrogram> {
    if spec.bins < SPEC_BINS
        || spec.magnitude.len() != spec.bins * spec.frames
        || spec.phase.len() != spec.magnitude.len()
    {
        return Err(VocmarkError::Shape {
            expected: vec![SPEC_BINS, SPEC_FRAMES],
            actual: vec![spec.bins, spec.frames],
        });
    }

    let keep = spec.frames.min(SPEC_FRAMES);
    let mut magnitude = vec![0.0f32; SPEC_BINS * SPEC_FRAMES];
    let mut phase = vec![0.0f32; SPEC_BINS * SPEC_FRAMES];
    for b in 0..SPEC_BINS {
        let src = b * spec.frames;
        let dst = b * SPEC_FRAMES;
        magnitude[dst..dst + keep].copy_from_slice(&spec.magnitude[src..src + keep]);
        phase[dst..dst + keep].copy_from_slice(&spec.phase[src..src + keep]);
    }

    Ok(FixedSpectrogram {
        magnitude,
        phase,
        raw_frames: spec.frames,
        pad_frames: SPEC_FRAMES - keep,
    })
}

/// Periodic Hann window of `win_length`, centered in `n_fft` zeros.
fn padded_hann_window(win_length: usize, n_fft: usize) -> Vec<f32> {
    let offset = (n_fft - win_length) / 2;
    let mut window = vec![0.0f32; n_fft];
    for i in 0..win_length {
        window[offset + i] = 0.5 * (1.0 - (2.0 * PI * i as f32 / win_length as f32).cos());
    }
    window
}

/// Pad `pad` samples on both sides. Reflects when the signal is long enough,
/// otherwise pads with zeros.
fn center_pad(samples: &[f32], pad: usize) -> Vec<f32> {
    let n = samples.len();
    if n <= pad {
        let mut padded = vec![0.0f32; n + 2 * pad];
        padded[pad..pad + n].copy_from_slice(samples);
        return padded;
    }
    reflect_pad(samples, pad, pad)
}

/// Mirror the signal at both boundaries, excluding the edge sample.
/// Requires `left < len` and `right < len`.
fn reflect_pad(samples: &[f32], left: usize, right: usize) -> Vec<f32> {
    let n = samples.len();
    let mut padded = Vec::with_capacity(n + left + right);
    for i in (1..=left).rev() {
        padded.push(samples[i]);
    }
    padded.extend_from_slice(samples);
    for i in 1..=right {
        padded.push(samples[n - 1 - i]);
    }
    padded
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transform() -> SpectrogramTransform {
        SpectrogramTransform::new(1024, 256, 1024).unwrap()
    }

    fn sine(len: usize, freq_bin: f32) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq_bin * i as f32 / 1024.0).sin())
            .collect()
    }

    #[test]
    fn test_fixed_shape_for_any_length() {
        let stft = transform();
        for len in [0usize, 1, 100, 8000, 40000, 130_816, 200_000] {
            let fixed = stft.fixed(&sine(len, 20.0)).unwrap();
            assert_eq!(fixed.magnitude.len(), SPEC_BINS * SPEC_FRAMES, "len {len}");
            assert_eq!(fixed.phase.len(), SPEC_BINS * SPEC_FRAMES, "len {len}");
            assert_eq!(fixed.raw_frames, len / 256 + 1);
            assert_eq!(fixed.pad_frames, SPEC_FRAMES.saturating_sub(len / 256 + 1));
        }
    }

    #[test]
    fn test_raw_transform_shape() {
        let spec = transform().transform(&sine(8000, 10.0)).unwrap();
        assert_eq!(spec.bins, 513);
        assert_eq!(spec.frames, 8000 / 256 + 1);
        assert_eq!(spec.magnitude.len(), 513 * spec.frames);
    }

    #[test]
    fn test_sine_peaks_at_its_bin() {
        let spec = transform().transform(&sine(16384, 32.0)).unwrap();
        let t = spec.frames / 2;
        let peak = (0..spec.bins)
            .max_by(|&a, &b| {
                spec.magnitude[a * spec.frames + t]
                    .total_cmp(&spec.magnitude[b * spec.frames + t])
            })
            .unwrap();
        assert_eq!(peak, 32);
    }

    #[test]
    fn test_short_input_is_zero_padded_on_time_axis() {
        let fixed = transform().fixed(&sine(8000, 20.0)).unwrap();
        let frames = 8000 / 256 + 1;
        let row = &fixed.magnitude[20 * SPEC_FRAMES..21 * SPEC_FRAMES];
        assert!(row[..frames].iter().any(|&v| v > 0.0));
        assert!(row[frames..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_long_input_keeps_leading_frames() {
        let stft = transform();
        let wave = sine(200_000, 20.0);
        let raw = stft.transform(&wave).unwrap();
        let fixed = normalize(&raw).unwrap();
        for b in [0usize, 20, 511] {
            for t in [0usize, 255, 511] {
                assert_eq!(
                    fixed.magnitude[b * SPEC_FRAMES + t],
                    raw.magnitude[b * raw.frames + t]
                );
            }
        }
        assert_eq!(fixed.pad_frames, 0);
    }

    #[test]
    fn test_too_few_bins_is_shape_error() {
        let spec = SpectrogramTransform::new(512, 128, 512)
            .unwrap()
            .transform(&sine(4000, 10.0))
            .unwrap();
        assert!(matches!(normalize(&spec), Err(VocmarkError::Shape { .. })));
    }

    #[test]
    fn test_reflect_pad() {
        let padded = reflect_pad(&[1.0, 2.0, 3.0, 4.0, 5.0], 2, 2);
        assert_eq!(padded, vec![3.0, 2.0, 1.0, 2.0, 3.0, 4.0, 5.0, 4.0, 3.0]);
    }

    #[test]
    fn test_window_is_centered() {
        let window = padded_hann_window(4, 8);
        assert_eq!(window[0], 0.0);
        assert_eq!(window[7], 0.0);
        assert!((window[4] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_framing_rejected() {
        assert!(SpectrogramTransform::new(512, 128, 1024).is_err());
        assert!(SpectrogramTransform::new(1024, 0, 1024).is_err());
    }
}
