//! Codec losses, the warm-up phase gate and adversarial BCE terms.
//!
//! Everything here returns `mlx_rs` results so it can run inside
//! `value_and_grad` closures unchanged.

use mlx_rs::error::Exception;
use mlx_rs::Array;
use vocmark_core::OptimizeConfig;

type MlxResult<T> = std::result::Result<T, Exception>;

/// Label the discriminator should assign to cover audio.
pub const COVER_LABEL: f32 = 1.0;
/// Label the discriminator should assign to watermarked audio.
pub const WATERMARKED_LABEL: f32 = 0.0;

/// Mean squared error over every element.
pub fn mse(a: &Array, b: &Array) -> MlxResult<Array> {
    a.subtract(b)?.square()?.mean(None)
}

/// Binary cross-entropy on logits against a constant target, averaged.
///
/// Uses `max(x, 0) - x * y + log(1 + exp(-|x|))`, which stays finite for
/// logits of any magnitude.
pub fn bce_with_logits(logits: &Array, target: f32) -> MlxResult<Array> {
    let zero = Array::from_f32(0.0);
    let one = Array::from_f32(1.0);
    let y = Array::from_f32(target);
    let relu = mlx_rs::ops::maximum(logits, &zero)?;
    let softplus = one.add(&zero.subtract(&logits.abs()?)?.exp()?)?.log()?;
    relu.subtract(&logits.multiply(&y)?)?
        .add(&softplus)?
        .mean(None)
}

/// Fidelity and message losses plus the weighting policy that combines them.
#[derive(Debug, Clone, Copy)]
pub struct LossComposer {
    /// Fidelity weight.
    pub lambda_e: f32,
    /// Message weight.
    pub lambda_m: f32,
    /// Generator adversarial weight.
    pub lambda_a: f32,
    /// Global step before which fidelity is left out of the total.
    pub pre_step: usize,
}

impl LossComposer {
    /// Build from the optimize section of the train config.
    #[must_use]
    pub fn from_config(optimize: &OptimizeConfig) -> Self {
        Self {
            lambda_e: optimize.lambda_e,
            lambda_m: optimize.lambda_m,
            lambda_a: optimize.lambda_a,
            pre_step: optimize.pre_step,
        }
    }

    /// `(fidelity_loss, message_loss)`.
    ///
    /// The message loss is the MSE between the sent bits and each decoded
    /// estimate, averaged over however many estimates the decoder produced.
    pub fn en_de_loss(
        &self,
        cover: &Array,
        watermarked: &Array,
        message: &Array,
        decoded: &[Array],
    ) -> MlxResult<(Array, Array)> {
        if decoded.is_empty() {
            return Err(Exception::custom("decoder produced no estimates"));
        }
        let fidelity = mse(cover, watermarked)?;
        let mut total = mse(&decoded[0], message)?;
        for estimate in &decoded[1..] {
            total = total.add(&mse(estimate, message)?)?;
        }
        let count = Array::from_f32(decoded.len() as f32);
        Ok((fidelity, total.divide(&count)?))
    }

    /// Whether fidelity is part of the objective at `global_step`.
    #[must_use]
    pub fn fidelity_active(&self, global_step: usize) -> bool {
        global_step >= self.pre_step
    }

    /// Generator objective before the adversarial term.
    ///
    /// Before `pre_step` only the weighted message loss counts; from then on
    /// the weighted fidelity loss is added.
    pub fn compose(
        &self,
        fidelity: &Array,
        message: &Array,
        global_step: usize,
    ) -> MlxResult<Array> {
        let weighted_msg = message.multiply(&Array::from_f32(self.lambda_m))?;
        if self.fidelity_active(global_step) {
            fidelity
                .multiply(&Array::from_f32(self.lambda_e))?
                .add(&weighted_msg)
        } else {
            Ok(weighted_msg)
        }
    }

    /// Add the weighted generator adversarial term to `total`.
    pub fn with_adversarial(&self, total: &Array, g_loss_adv: &Array) -> MlxResult<Array> {
        total.add(&g_loss_adv.multiply(&Array::from_f32(self.lambda_a))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn composer(pre_step: usize) -> LossComposer {
        LossComposer {
            lambda_e: 2.0,
            lambda_m: 1.0,
            lambda_a: 0.1,
            pre_step,
        }
    }

    #[test]
    fn test_phase_gate_ignores_fidelity_before_threshold() {
        let c = composer(10);
        let msg = Array::from_f32(0.5);
        let a = c.compose(&Array::from_f32(0.1), &msg, 9).unwrap();
        let b = c.compose(&Array::from_f32(100.0), &msg, 9).unwrap();
        assert_eq!(a.item::<f32>(), b.item::<f32>());
        assert!((a.item::<f32>() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_phase_gate_includes_fidelity_from_threshold() {
        let c = composer(10);
        let msg = Array::from_f32(0.5);
        let a = c.compose(&Array::from_f32(0.1), &msg, 10).unwrap();
        let b = c.compose(&Array::from_f32(100.0), &msg, 10).unwrap();
        assert_ne!(a.item::<f32>(), b.item::<f32>());
        assert!((a.item::<f32>() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_message_loss_averages_estimates() {
        let c = composer(0);
        let cover = Array::from_slice(&[1.0f32, 1.0], &[1, 1, 2]);
        let msg = Array::from_slice(&[1.0f32, -1.0], &[1, 1, 2]);
        let exact = msg.clone();
        let off = Array::from_slice(&[0.0f32, 0.0], &[1, 1, 2]);

        let (fid, m) = c.en_de_loss(&cover, &cover, &msg, &[exact, off]).unwrap();
        assert!(fid.item::<f32>().abs() < 1e-6);
        // (0 + 1) / 2
        assert!((m.item::<f32>() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_empty_estimates_rejected() {
        let c = composer(0);
        let x = Array::from_f32(0.0);
        assert!(c.en_de_loss(&x, &x, &x, &[]).is_err());
    }

    #[test]
    fn test_bce_matches_closed_form() {
        let logits = Array::from_slice(&[0.0f32], &[1, 1]);
        let loss = bce_with_logits(&logits, COVER_LABEL).unwrap();
        assert!((loss.item::<f32>() - std::f32::consts::LN_2).abs() < 1e-5);

        let confident = Array::from_slice(&[10.0f32], &[1, 1]);
        let right = bce_with_logits(&confident, COVER_LABEL).unwrap().item::<f32>();
        let wrong = bce_with_logits(&confident, WATERMARKED_LABEL).unwrap().item::<f32>();
        assert!(right < 1e-3);
        assert!((wrong - 10.0).abs() < 1e-3);
    }

    #[test]
    fn test_bce_finite_for_extreme_logits() {
        let logits = Array::from_slice(&[-1e4f32, 1e4], &[2, 1]);
        let loss = bce_with_logits(&logits, COVER_LABEL).unwrap().item::<f32>();
        assert!(loss.is_finite());
    }

    #[test]
    fn test_adversarial_weighting() {
        let c = composer(0);
        let total = c
            .with_adversarial(&Array::from_f32(1.0), &Array::from_f32(2.0))
            .unwrap();
        assert!((total.item::<f32>() - 1.2).abs() < 1e-6);
    }
}
