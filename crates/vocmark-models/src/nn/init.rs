//! Seeded parameter initialization.

use crate::error::Result;
use mlx_rs::Array;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Draws initial weights from an explicit seed, so two models built with the
/// same seed start bit-identical without touching global RNG state.
#[derive(Debug)]
pub struct Initializer {
    rng: StdRng,
}

impl Initializer {
    /// Create an initializer from `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Uniform samples in `[-bound, bound)` with the given shape.
    pub fn uniform(&mut self, bound: f32, shape: &[i32]) -> Result<Array> {
        let count: i32 = shape.iter().product();
        let data: Vec<f32> = (0..count.max(0))
            .map(|_| {
                if bound > 0.0 {
                    self.rng.gen_range(-bound..bound)
                } else {
                    0.0
                }
            })
            .collect();
        Ok(Array::from_slice(&data, shape))
    }
}
