//! Random watermark messages.

use mlx_rs::Array;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Draws `{-1, +1}` bit messages from an explicitly seeded generator.
#[derive(Debug, Clone)]
pub struct MessageSampler {
    rng: StdRng,
    length: usize,
}

impl MessageSampler {
    /// Create a sampler for `length`-bit messages.
    #[must_use]
    pub fn new(seed: u64, length: usize) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            length,
        }
    }

    /// Message length in bits.
    #[must_use]
    pub fn length(&self) -> usize {
        self.length
    }

    /// Host values for a `[batch, 1, length]` message.
    pub fn sample_values(&mut self, batch: usize) -> Vec<f32> {
        (0..batch * self.length)
            .map(|_| if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 })
            .collect()
    }

    /// A `[batch, 1, length]` message.
    pub fn sample(&mut self, batch: usize) -> Array {
        let values = self.sample_values(batch);
        Array::from_slice(&values, &[batch as i32, 1, self.length as i32])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_are_signed_units() {
        let mut s = MessageSampler::new(1, 16);
        let v = s.sample_values(4);
        assert_eq!(v.len(), 64);
        assert!(v.iter().all(|b| *b == 1.0 || *b == -1.0));
        assert!(v.iter().any(|b| *b == 1.0));
        assert!(v.iter().any(|b| *b == -1.0));
    }

    #[test]
    fn test_seeded_sampler_repeats() {
        let mut a = MessageSampler::new(7, 8);
        let mut b = MessageSampler::new(7, 8);
        assert_eq!(a.sample_values(3), b.sample_values(3));
    }

    #[test]
    fn test_shape_follows_batch() {
        let mut s = MessageSampler::new(0, 16);
        assert_eq!(s.sample(3).shape(), &[3, 1, 16]);
        assert_eq!(s.sample(1).shape(), &[1, 1, 16]);
    }
}
