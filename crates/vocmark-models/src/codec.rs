//! Watermark codec: a message-conditioned encoder and a multi-stage decoder.
//!
//! Both halves operate on `[batch, channels, length]` tensors, so the same
//! networks serve waveform segments (`channels = 1`) and fixed-shape
//! magnitude spectrograms (`channels = 512`). Messages are `[batch, 1, bits]`
//! with values in `{-1, +1}`.
//!
//! The feature extractor the encoder reads its input through is owned once,
//! by [`WatermarkCodec`]. With weight sharing the decoder has no extractor of
//! its own and borrows the codec's, so shared weights appear exactly once in
//! the parameter tree and receive exactly one optimizer update per step.

use crate::error::{ModelError, Result};
use crate::nn::{Initializer, WeightNormConv1d};
use mlx_rs::macros::ModuleParameters;
use mlx_rs::ops::indexing::IndexOp;
use mlx_rs::Array;
use vocmark_core::StrengthConfig;

const LEAKY_SLOPE: f32 = 0.2;

/// Codec hyperparameters resolved from the model family and configs.
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// Input channels (1 for waveform, 512 for spectral).
    pub channels: i32,
    /// Hidden width.
    pub embedding: i32,
    /// Residual layers in the shared extractor and encoder.
    pub nlayers_encoder: usize,
    /// Residual layers in the decoder body.
    pub nlayers_decoder: usize,
    /// Channel groups in encoder convolutions.
    pub heads_encoder: i32,
    /// Channel groups in decoder convolutions.
    pub heads_decoder: i32,
    /// Message length in bits.
    pub msg_length: i32,
    /// Decoder reuses the encoder's feature extractor.
    pub share: bool,
    /// Carrier scale schedule.
    pub strength: StrengthConfig,
    /// Distortion stages decoded in order, one output each.
    pub stages: Vec<Distortion>,
}

/// A deterministic distortion applied before decoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Distortion {
    /// The watermarked signal as-is.
    Identity,
    /// Gain reduction ramping up to `depth` with the curriculum.
    Attenuate {
        /// Maximum fractional gain reduction.
        depth: f32,
    },
    /// 3-tap moving average along the last axis, edges replicated.
    Smooth,
}

impl Distortion {
    /// Apply the distortion. `progress` in `[0, 1]` is the curriculum position.
    pub fn apply(&self, x: &Array, progress: f32) -> Result<Array> {
        match *self {
            Self::Identity => Ok(x.clone()),
            Self::Attenuate { depth } => {
                let gain = Array::from_f32(1.0 - depth * progress);
                Ok(x.multiply(&gain)?)
            }
            Self::Smooth => {
                let len = x.dim(-1);
                let left = x.index((.., .., 0..1));
                let right = x.index((.., .., len - 1..len));
                let padded = mlx_rs::ops::concatenate_axis(&[&left, x, &right], -1)?;
                let a = padded.index((.., .., 0..len));
                let b = padded.index((.., .., 1..len + 1));
                let c = padded.index((.., .., 2..len + 2));
                let third = Array::from_f32(1.0 / 3.0);
                Ok(a.add(&b)?.add(&c)?.multiply(&third)?)
            }
        }
    }
}

/// Input projection followed by residual grouped convolutions.
#[derive(Debug, ModuleParameters)]
pub struct FeatureExtractor {
    /// `channels -> embedding`.
    #[param]
    pub input: WeightNormConv1d,
    /// Residual `embedding -> embedding` layers.
    #[param]
    pub layers: Vec<WeightNormConv1d>,
}

impl FeatureExtractor {
    /// Create an extractor.
    pub fn new(
        init: &mut Initializer,
        channels: i32,
        embedding: i32,
        nlayers: usize,
        groups: i32,
    ) -> Result<Self> {
        let input = WeightNormConv1d::new(init, channels, embedding, 3, 1, 1, 1)?;
        let layers = (0..nlayers)
            .map(|_| WeightNormConv1d::new(init, embedding, embedding, 3, 1, 1, groups))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { input, layers })
    }

    /// `[B, channels, L] -> [B, embedding, L]`.
    pub fn forward(&self, x: &Array) -> Result<Array> {
        let mut h = mlx_rs::nn::leaky_relu(&self.input.forward(x)?, LEAKY_SLOPE)?;
        for layer in &self.layers {
            let y = mlx_rs::nn::leaky_relu(&layer.forward(&h)?, LEAKY_SLOPE)?;
            h = h.add(&y)?;
        }
        Ok(h)
    }
}

/// Embeds a message into extracted features and emits a residual carrier.
#[derive(Debug, ModuleParameters)]
pub struct Encoder {
    /// `msg_length -> embedding`, applied per message.
    #[param]
    pub msg_proj: WeightNormConv1d,
    /// Fuses features with the message embedding.
    #[param]
    pub fuse: WeightNormConv1d,
    /// `embedding -> channels` carrier head.
    #[param]
    pub carrier_head: WeightNormConv1d,
    /// Carrier scale schedule.
    pub strength: StrengthConfig,
}

impl Encoder {
    fn new(init: &mut Initializer, config: &CodecConfig) -> Result<Self> {
        let e = config.embedding;
        Ok(Self {
            msg_proj: WeightNormConv1d::new(init, config.msg_length, e, 1, 1, 0, 1)?,
            fuse: WeightNormConv1d::new(init, e, e, 3, 1, 1, config.heads_encoder)?,
            carrier_head: WeightNormConv1d::new(init, e, config.channels, 3, 1, 1, 1)?,
            strength: config.strength.clone(),
        })
    }

    /// Embed `message` into `cover`.
    ///
    /// Returns `(watermarked, carrier)` where
    /// `watermarked = cover + strength(global_step) * carrier`.
    pub fn embed(
        &self,
        extractor: &FeatureExtractor,
        cover: &Array,
        message: &Array,
        global_step: usize,
    ) -> Result<(Array, Array)> {
        let features = extractor.forward(cover)?;

        // [B, 1, M] -> [B, M, 1] -> [B, E, 1], broadcast over time.
        let msg = message.transpose_axes(&[0, 2, 1])?;
        let msg = self.msg_proj.forward(&msg)?;

        let h = features.add(&msg)?;
        let y = mlx_rs::nn::leaky_relu(&self.fuse.forward(&h)?, LEAKY_SLOPE)?;
        let h = h.add(&y)?;

        let carrier = mlx_rs::ops::tanh(&self.carrier_head.forward(&h)?)?;
        let scale = Array::from_f32(self.strength.strength(global_step));
        let watermarked = cover.add(&carrier.multiply(&scale)?)?;
        Ok((watermarked, carrier))
    }
}

/// Recovers the message from every distortion stage of a watermarked input.
#[derive(Debug, ModuleParameters)]
pub struct Decoder {
    /// Private extractor; `None` when weights are shared with the encoder.
    #[param]
    pub extractor: Option<FeatureExtractor>,
    /// Residual body layers.
    #[param]
    pub body: Vec<WeightNormConv1d>,
    /// `embedding -> msg_length` head.
    #[param]
    pub msg_head: WeightNormConv1d,
    /// Distortion stages, one decoded output each.
    pub stages: Vec<Distortion>,
    /// Curriculum driving the distortion depth.
    pub strength: StrengthConfig,
}

impl Decoder {
    fn new(init: &mut Initializer, config: &CodecConfig) -> Result<Self> {
        let e = config.embedding;
        let extractor = if config.share {
            None
        } else {
            Some(FeatureExtractor::new(
                init,
                config.channels,
                e,
                config.nlayers_decoder,
                config.heads_decoder,
            )?)
        };
        let body = (0..config.nlayers_decoder)
            .map(|_| WeightNormConv1d::new(init, e, e, 3, 1, 1, config.heads_decoder))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            extractor,
            body,
            msg_head: WeightNormConv1d::new(init, e, config.msg_length, 1, 1, 0, 1)?,
            stages: config.stages.clone(),
            strength: config.strength.clone(),
        })
    }

    /// Decode one estimate per stage, each `[B, 1, msg_length]`.
    pub fn decode(
        &self,
        shared: &FeatureExtractor,
        watermarked: &Array,
        global_step: usize,
    ) -> Result<Vec<Array>> {
        let extractor = self.extractor.as_ref().unwrap_or(shared);
        let progress = self.strength.progress(global_step);
        self.stages
            .iter()
            .map(|stage| {
                let distorted = stage.apply(watermarked, progress)?;
                self.decode_one(extractor, &distorted)
            })
            .collect()
    }

    fn decode_one(&self, extractor: &FeatureExtractor, x: &Array) -> Result<Array> {
        let mut h = extractor.forward(x)?;
        for layer in &self.body {
            let y = mlx_rs::nn::leaky_relu(&layer.forward(&h)?, LEAKY_SLOPE)?;
            h = h.add(&y)?;
        }
        let pooled = h.mean_axis(-1, true)?;
        let logits = self.msg_head.forward(&pooled)?;
        Ok(logits.transpose_axes(&[0, 2, 1])?)
    }
}

/// Encoder, decoder and the feature extractor they may share.
#[derive(Debug, ModuleParameters)]
pub struct WatermarkCodec {
    /// Encoder-side feature extractor, also used by a sharing decoder.
    #[param]
    pub extractor: FeatureExtractor,
    /// Message embedder.
    #[param]
    pub encoder: Encoder,
    /// Message decoder.
    #[param]
    pub decoder: Decoder,
    /// Expected input channels.
    pub channels: i32,
    /// Message length in bits.
    pub msg_length: i32,
}

impl WatermarkCodec {
    /// Build a codec with weights drawn from `init`.
    pub fn new(init: &mut Initializer, config: &CodecConfig) -> Result<Self> {
        if config.stages.is_empty() {
            return Err(ModelError::Config("decoder needs at least one stage".into()));
        }
        if config.embedding % config.heads_encoder != 0
            || config.embedding % config.heads_decoder != 0
        {
            return Err(ModelError::Config(format!(
                "embedding {} not divisible by head counts {}/{}",
                config.embedding, config.heads_encoder, config.heads_decoder
            )));
        }
        let extractor = FeatureExtractor::new(
            init,
            config.channels,
            config.embedding,
            config.nlayers_encoder,
            config.heads_encoder,
        )?;
        let encoder = Encoder::new(init, config)?;
        let decoder = Decoder::new(init, config)?;
        Ok(Self {
            extractor,
            encoder,
            decoder,
            channels: config.channels,
            msg_length: config.msg_length,
        })
    }

    /// `embed(cover [B, C, L], message [B, 1, M], global_step) -> (watermarked, carrier)`.
    pub fn embed(
        &self,
        cover: &Array,
        message: &Array,
        global_step: usize,
    ) -> Result<(Array, Array)> {
        self.check_input(cover)?;
        let batch = cover.dim(0);
        if message.shape() != [batch, 1, self.msg_length] {
            return Err(ModelError::ShapeMismatch {
                expected: vec![batch, 1, self.msg_length],
                actual: message.shape().to_vec(),
            });
        }
        self.encoder.embed(&self.extractor, cover, message, global_step)
    }

    /// `decode(watermarked [B, C, L], global_step) -> [[B, 1, M]; num_outputs]`.
    pub fn decode(&self, watermarked: &Array, global_step: usize) -> Result<Vec<Array>> {
        self.check_input(watermarked)?;
        self.decoder.decode(&self.extractor, watermarked, global_step)
    }

    /// Number of decoded estimates per call.
    #[must_use]
    pub fn num_outputs(&self) -> usize {
        self.decoder.stages.len()
    }

    /// Whether the decoder reads through the encoder's extractor.
    #[must_use]
    pub fn shares_extractor(&self) -> bool {
        self.decoder.extractor.is_none()
    }

    fn check_input(&self, x: &Array) -> Result<()> {
        if x.ndim() != 3 || x.dim(1) != self.channels {
            return Err(ModelError::ShapeMismatch {
                expected: vec![-1, self.channels, -1],
                actual: x.shape().to_vec(),
            });
        }
        Ok(())
    }
}
