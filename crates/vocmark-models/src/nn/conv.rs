//! Weight-normalized 1D convolution.
//!
//! Every learned layer in vocmark is one of these: kernel-1 instances act as
//! per-position linear projections (message embedding, decoder head,
//! discriminator head), wider kernels mix along time.

use crate::error::Result;
use crate::nn::Initializer;
use mlx_rs::macros::ModuleParameters;
use mlx_rs::module::Param;
use mlx_rs::Array;

/// Weight-normalized 1D convolution.
///
/// Applies weight normalization: W = g * (v / ||v||)
/// where g is the magnitude and v is the direction.
#[derive(Debug, ModuleParameters)]
pub struct WeightNormConv1d {
    /// Direction parameter (unnormalized weights), `[out, in / groups, kernel]`.
    #[param]
    pub weight_v: Param<Array>,
    /// Magnitude parameter, `[out, 1, 1]`.
    #[param]
    pub weight_g: Param<Array>,
    /// Bias, `[out]`.
    #[param]
    pub bias: Param<Array>,
    /// Input channels.
    pub in_channels: i32,
    /// Output channels.
    pub out_channels: i32,
    /// Kernel size.
    pub kernel_size: i32,
    /// Stride.
    pub stride: i32,
    /// Padding.
    pub padding: i32,
    /// Groups for grouped convolution.
    pub groups: i32,
}

impl WeightNormConv1d {
    /// Create a new weight-normalized Conv1d with Kaiming-uniform direction.
    ///
    /// # Arguments
    /// * `init` - Seeded initializer
    /// * `in_channels` - Number of input channels
    /// * `out_channels` - Number of output channels
    /// * `kernel_size` - Kernel size
    /// * `stride` - Stride
    /// * `padding` - Zero padding on both sides
    /// * `groups` - Channel groups; must divide both channel counts
    pub fn new(
        init: &mut Initializer,
        in_channels: i32,
        out_channels: i32,
        kernel_size: i32,
        stride: i32,
        padding: i32,
        groups: i32,
    ) -> Result<Self> {
        let fan_in = (in_channels / groups) * kernel_size;
        let bound = (1.0 / fan_in.max(1) as f32).sqrt();

        let weight_v = init.uniform(bound, &[out_channels, in_channels / groups, kernel_size])?;
        let weight_g = weight_norm(&weight_v)?;
        let bias = init.uniform(bound, &[out_channels])?;

        Ok(Self {
            weight_v: Param::new(weight_v),
            weight_g: Param::new(weight_g),
            bias: Param::new(bias),
            in_channels,
            out_channels,
            kernel_size,
            stride,
            padding,
            groups,
        })
    }

    /// Compute normalized weight: W = g * (v / ||v||)
    fn compute_weight(&self) -> Result<Array> {
        let v = self.weight_v.as_ref();
        let g = self.weight_g.as_ref();
        let norm = weight_norm(v)?;
        Ok(v.divide(&norm)?.multiply(g)?)
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// * `x` - Input tensor [batch, in_channels, length] (NCL format)
    ///
    /// # Returns
    /// Output tensor [batch, out_channels, new_length] (NCL format)
    pub fn forward(&self, x: &Array) -> Result<Array> {
        let weight = self.compute_weight()?;

        // MLX conv1d works in NLC with OKI weights.
        let x_nlc = x.transpose_axes(&[0, 2, 1])?;
        let weight_oki = weight.transpose_axes(&[0, 2, 1])?;

        let output = mlx_rs::ops::conv1d(
            &x_nlc,
            &weight_oki,
            self.stride,
            self.padding,
            1,
            self.groups,
        )?;
        let output = output.transpose_axes(&[0, 2, 1])?;

        let bias = self.bias.as_ref().reshape(&[1, self.out_channels, 1])?;
        Ok(output.add(&bias)?)
    }
}

/// L2 norm over every axis except the output channel.
fn weight_norm(weight: &Array) -> Result<Array> {
    let sq = weight.multiply(weight)?;
    let sum_sq = sq.sum_axes(&[1, 2], Some(true))?;
    let norm = sum_sq.sqrt()?;
    let eps = Array::from_f32(1e-12);
    Ok(norm.add(&eps)?)
}
