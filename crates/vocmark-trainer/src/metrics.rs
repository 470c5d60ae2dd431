//! Step instrumentation: bit accuracy and SNR.
//!
//! Computed on host copies of already-evaluated tensors; nothing here feeds
//! back into training.

use mlx_rs::Array;
use vocmark_core::VocmarkError;

use crate::Result;

/// Largest SNR magnitude reported, in dB.
pub const SNR_LIMIT_DB: f32 = 200.0;

/// Fraction of positions where `decoded` and `message` agree in sign.
///
/// Zero is treated as positive on both sides. The two tensors must have the
/// same shape.
pub fn bit_accuracy(decoded: &Array, message: &Array) -> Result<f32> {
    if decoded.shape() != message.shape() {
        return Err(VocmarkError::Shape {
            expected: dims(message),
            actual: dims(decoded),
        }
        .into());
    }
    decoded.eval()?;
    message.eval()?;
    let d = decoded.as_slice::<f32>();
    let m = message.as_slice::<f32>();
    if d.is_empty() {
        return Ok(0.0);
    }
    let agree = d
        .iter()
        .zip(m)
        .filter(|(a, b)| (**a >= 0.0) == (**b >= 0.0))
        .count();
    Ok(agree as f32 / d.len() as f32)
}

fn dims(x: &Array) -> Vec<usize> {
    x.shape().iter().map(|&d| d.max(0) as usize).collect()
}

/// Mean squared power of `x`.
pub fn mean_power(x: &Array) -> Result<f32> {
    x.eval()?;
    let values = x.as_slice::<f32>();
    if values.is_empty() {
        return Ok(0.0);
    }
    let sum: f64 = values.iter().map(|v| f64::from(*v) * f64::from(*v)).sum();
    Ok((sum / values.len() as f64) as f32)
}

/// `10 * log10(P(cover) / P(cover - watermarked))`, clamped to `±SNR_LIMIT_DB`.
///
/// Identical signals give `+SNR_LIMIT_DB`; a silent cover with a non-zero
/// watermark gives `-SNR_LIMIT_DB`; both silent gives 0.
pub fn snr_db(cover: &Array, watermarked: &Array) -> Result<f32> {
    let noise = cover.subtract(watermarked)?;
    let signal_power = f64::from(mean_power(cover)?);
    let noise_power = f64::from(mean_power(&noise)?);
    Ok(snr_from_powers(signal_power, noise_power))
}

fn snr_from_powers(signal: f64, noise: f64) -> f32 {
    let limit = f64::from(SNR_LIMIT_DB);
    let db = match (signal > 0.0, noise > 0.0) {
        (false, false) => 0.0,
        (true, false) => limit,
        (false, true) => -limit,
        (true, true) => 10.0 * (signal / noise).log10(),
    };
    if db.is_nan() {
        return 0.0;
    }
    db.clamp(-limit, limit) as f32
}

/// Running sums for epoch-level validation averages.
#[derive(Debug, Clone, Default)]
pub struct MetricAccumulator {
    wav_loss: f64,
    msg_loss: f64,
    acc: Vec<f64>,
    snr: f64,
    d_loss_on_encoded: f64,
    d_loss_on_cover: f64,
    discriminator_batches: usize,
    batches: usize,
}

impl MetricAccumulator {
    /// Add one batch.
    pub fn push(&mut self, wav_loss: f32, msg_loss: f32, acc: &[f32], snr: f32) {
        if self.acc.len() < acc.len() {
            self.acc.resize(acc.len(), 0.0);
        }
        for (sum, a) in self.acc.iter_mut().zip(acc) {
            *sum += f64::from(*a);
        }
        self.wav_loss += f64::from(wav_loss);
        self.msg_loss += f64::from(msg_loss);
        self.snr += f64::from(snr);
        self.batches += 1;
    }

    /// Add the discriminator losses of the last pushed batch.
    pub fn push_discriminator(&mut self, on_encoded: f32, on_cover: f32) {
        self.d_loss_on_encoded += f64::from(on_encoded);
        self.d_loss_on_cover += f64::from(on_cover);
        self.discriminator_batches += 1;
    }

    /// Batches seen so far.
    #[must_use]
    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Divide every sum by the batch count.
    #[must_use]
    pub fn finish(&self, epoch: usize) -> vocmark_core::ValidationMetrics {
        let n = self.batches.max(1) as f64;
        let avg = |sum: f64| (sum / n) as f32;
        let has_disc = self.discriminator_batches > 0;
        vocmark_core::ValidationMetrics {
            epoch,
            wav_loss: avg(self.wav_loss),
            msg_loss: avg(self.msg_loss),
            acc: self.acc.iter().map(|a| avg(*a)).collect(),
            snr: avg(self.snr),
            d_loss_on_encoded: has_disc.then(|| avg(self.d_loss_on_encoded)),
            d_loss_on_cover: has_disc.then(|| avg(self.d_loss_on_cover)),
            batches: self.batches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accuracy_counts_sign_agreement() {
        let msg = Array::from_slice(&[1.0f32, -1.0, 1.0, -1.0], &[1, 1, 4]);
        let dec = Array::from_slice(&[0.3f32, -2.0, -0.1, 0.5], &[1, 1, 4]);
        assert!((bit_accuracy(&dec, &msg).unwrap() - 0.5).abs() < 1e-6);
        assert!((bit_accuracy(&msg, &msg).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_accuracy_rejects_mismatched_shapes() {
        let msg = Array::from_slice(&[1.0f32, -1.0, 1.0, -1.0], &[1, 1, 4]);
        let dec = Array::from_slice(&[1.0f32, -1.0, 1.0, -1.0], &[1, 4, 1]);
        let err = bit_accuracy(&dec, &msg).unwrap_err();
        match err.core() {
            Some(VocmarkError::Shape { expected, actual }) => {
                assert_eq!(expected, &vec![1, 1, 4]);
                assert_eq!(actual, &vec![1, 4, 1]);
            }
            other => panic!("expected a shape error, got {other:?}"),
        }

        let short = Array::from_slice(&[1.0f32, -1.0], &[1, 1, 2]);
        assert!(bit_accuracy(&short, &msg).is_err());
    }

    #[test]
    fn test_snr_identical_signals_is_bounded() {
        let x = Array::from_slice(&[0.5f32, -0.5, 0.25], &[1, 1, 3]);
        let snr = snr_db(&x, &x).unwrap();
        assert!(snr.is_finite());
        assert_eq!(snr, SNR_LIMIT_DB);
    }

    #[test]
    fn test_snr_zero_watermarked_is_zero_db() {
        let x = Array::from_slice(&[0.5f32, -0.5, 0.25], &[1, 1, 3]);
        let zero = Array::from_slice(&[0.0f32, 0.0, 0.0], &[1, 1, 3]);
        // noise == cover, so the ratio is exactly one
        assert!(snr_db(&x, &zero).unwrap().abs() < 1e-4);
    }

    #[test]
    fn test_snr_silence_is_not_nan() {
        let zero = Array::from_slice(&[0.0f32, 0.0], &[1, 1, 2]);
        let x = Array::from_slice(&[0.1f32, 0.0], &[1, 1, 2]);
        assert_eq!(snr_db(&zero, &zero).unwrap(), 0.0);
        assert_eq!(snr_db(&zero, &x).unwrap(), -SNR_LIMIT_DB);
    }

    #[test]
    fn test_snr_known_ratio() {
        let cover = Array::from_slice(&[1.0f32, 1.0], &[1, 1, 2]);
        let marked = Array::from_slice(&[1.1f32, 0.9], &[1, 1, 2]);
        // 10 * log10(1 / 0.01) = 20 dB
        assert!((snr_db(&cover, &marked).unwrap() - 20.0).abs() < 1e-3);
    }

    #[test]
    fn test_accumulator_averages() {
        let mut acc = MetricAccumulator::default();
        acc.push(1.0, 2.0, &[0.5, 1.0], 10.0);
        acc.push(3.0, 4.0, &[1.0, 0.0], 20.0);
        acc.push_discriminator(0.2, 0.4);
        let m = acc.finish(3);
        assert_eq!(m.batches, 2);
        assert!((m.wav_loss - 2.0).abs() < 1e-6);
        assert!((m.msg_loss - 3.0).abs() < 1e-6);
        assert_eq!(m.acc.len(), 2);
        assert!((m.acc[0] - 0.75).abs() < 1e-6);
        assert!((m.snr - 15.0).abs() < 1e-6);
        assert!((m.d_loss_on_cover.unwrap() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_accumulator_without_discriminator() {
        let mut acc = MetricAccumulator::default();
        acc.push(1.0, 1.0, &[1.0], 0.0);
        let m = acc.finish(1);
        assert!(m.d_loss_on_encoded.is_none());
        assert!(m.d_loss_on_cover.is_none());
    }
}
