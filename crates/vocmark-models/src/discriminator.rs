//! Cover-vs-watermarked discriminator.

use crate::error::{ModelError, Result};
use crate::nn::{Initializer, WeightNormConv1d};
use mlx_rs::macros::ModuleParameters;
use mlx_rs::Array;

const LEAKY_SLOPE: f32 = 0.2;
const DOWNSAMPLE_LAYERS: usize = 3;

/// Strided convolutional critic producing one logit per example.
///
/// Positive logits mean "cover", negative mean "watermarked".
#[derive(Debug, ModuleParameters)]
pub struct Discriminator {
    /// Stride-2 downsampling stack.
    #[param]
    pub convs: Vec<WeightNormConv1d>,
    /// `embedding -> 1` logit head.
    #[param]
    pub head: WeightNormConv1d,
    /// Expected input channels.
    pub channels: i32,
}

impl Discriminator {
    /// Create a discriminator for `channels`-channel inputs.
    pub fn new(init: &mut Initializer, channels: i32, embedding: i32) -> Result<Self> {
        let mut convs = Vec::with_capacity(DOWNSAMPLE_LAYERS);
        let mut in_ch = channels;
        for _ in 0..DOWNSAMPLE_LAYERS {
            convs.push(WeightNormConv1d::new(init, in_ch, embedding, 3, 2, 1, 1)?);
            in_ch = embedding;
        }
        let head = WeightNormConv1d::new(init, embedding, 1, 1, 1, 0, 1)?;
        Ok(Self {
            convs,
            head,
            channels,
        })
    }

    /// `[B, channels, L] -> [B, 1]` logits.
    pub fn forward(&self, x: &Array) -> Result<Array> {
        if x.ndim() != 3 || x.dim(1) != self.channels {
            return Err(ModelError::ShapeMismatch {
                expected: vec![-1, self.channels, -1],
                actual: x.shape().to_vec(),
            });
        }
        let mut h = x.clone();
        for conv in &self.convs {
            h = mlx_rs::nn::leaky_relu(&conv.forward(&h)?, LEAKY_SLOPE)?;
        }
        let pooled = h.mean_axis(-1, true)?;
        let logits = self.head.forward(&pooled)?;
        Ok(logits.reshape(&[x.dim(0), 1])?)
    }
}
