//! Model construction per pipeline.
//!
//! This is the only place that branches on the model family. Everything
//! downstream works with [`ModelBundle`] and tensor shapes.

use crate::codec::{CodecConfig, Distortion, WatermarkCodec};
use crate::discriminator::Discriminator;
use crate::error::{ModelError, Result};
use crate::nn::Initializer;
use vocmark_core::{ModelConfig, ModelFamily, Pipeline, SPEC_BINS};

/// Codec and discriminator built for one pipeline.
#[derive(Debug)]
pub struct ModelBundle {
    /// Encoder + decoder.
    pub codec: WatermarkCodec,
    /// Adversarial critic.
    pub discriminator: Discriminator,
}

/// Input channel count for a family.
#[must_use]
pub fn input_channels(family: ModelFamily) -> i32 {
    match family {
        ModelFamily::Waveform => 1,
        ModelFamily::Spectral => SPEC_BINS as i32,
    }
}

/// Distortion stages decoded for a family.
#[must_use]
pub fn decoder_stages(family: ModelFamily) -> Vec<Distortion> {
    match family {
        ModelFamily::Waveform => vec![
            Distortion::Identity,
            Distortion::Attenuate { depth: 0.5 },
            Distortion::Smooth,
        ],
        ModelFamily::Spectral => vec![Distortion::Identity, Distortion::Attenuate { depth: 0.5 }],
    }
}

/// Resolve the codec hyperparameters for `pipeline`.
pub fn codec_config(
    pipeline: Pipeline,
    model: &ModelConfig,
    msg_length: usize,
) -> Result<CodecConfig> {
    if msg_length == 0 {
        return Err(ModelError::Config("message length must be positive".into()));
    }
    let family = pipeline.model_family();
    Ok(CodecConfig {
        channels: input_channels(family),
        embedding: model.dim.embedding as i32,
        nlayers_encoder: model.layer.nlayers_encoder,
        nlayers_decoder: model.layer.nlayers_decoder,
        heads_encoder: model.layer.attention_heads_encoder as i32,
        heads_decoder: model.layer.attention_heads_decoder as i32,
        msg_length: msg_length as i32,
        share: model.structure.share,
        strength: model.watermark.clone(),
        stages: decoder_stages(family),
    })
}

/// Build the codec and discriminator for `pipeline` from a seeded initializer.
pub fn build_models(
    pipeline: Pipeline,
    model: &ModelConfig,
    msg_length: usize,
    seed: u64,
) -> Result<ModelBundle> {
    let config = codec_config(pipeline, model, msg_length)?;
    let mut init = Initializer::new(seed);
    let codec = WatermarkCodec::new(&mut init, &config)?;
    let discriminator = Discriminator::new(&mut init, config.channels, config.embedding)?;
    tracing::info!(
        pipeline = %pipeline,
        channels = config.channels,
        outputs = codec.num_outputs(),
        share = config.share,
        "built models"
    );
    Ok(ModelBundle {
        codec,
        discriminator,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlx_rs::module::ModuleParameters;
    use vocmark_core::DatasetFamily;

    fn small_model(family: ModelFamily, dataset: DatasetFamily, share: bool) -> ModelConfig {
        let mut m = ModelConfig::default();
        m.dim.embedding = 8;
        m.layer.nlayers_encoder = 1;
        m.layer.nlayers_decoder = 1;
        m.layer.attention_heads_encoder = 2;
        m.layer.attention_heads_decoder = 2;
        m.structure.family = family;
        m.structure.dataset = dataset;
        m.structure.share = share;
        m
    }

    #[test]
    fn test_waveform_bundle() {
        let m = small_model(ModelFamily::Waveform, DatasetFamily::Waveform, false);
        let pipeline = Pipeline::select(&m).unwrap();
        let bundle = build_models(pipeline, &m, 16, 0).unwrap();
        assert_eq!(bundle.codec.channels, 1);
        assert_eq!(bundle.codec.num_outputs(), 3);
    }

    #[test]
    fn test_spectral_bundle() {
        let m = small_model(ModelFamily::Spectral, DatasetFamily::Paired, true);
        let pipeline = Pipeline::select(&m).unwrap();
        let bundle = build_models(pipeline, &m, 16, 0).unwrap();
        assert_eq!(bundle.codec.channels, 512);
        assert_eq!(bundle.codec.num_outputs(), 2);
        assert!(bundle.codec.shares_extractor());
    }

    #[test]
    fn test_same_seed_same_weights() {
        let m = small_model(ModelFamily::Waveform, DatasetFamily::Waveform, false);
        let a = build_models(Pipeline::Waveform, &m, 8, 11).unwrap();
        let b = build_models(Pipeline::Waveform, &m, 8, 11).unwrap();
        let pa = a.codec.parameters().flatten();
        let pb = b.codec.parameters().flatten();
        for (k, v) in &pa {
            v.eval().unwrap();
            pb[k].eval().unwrap();
            assert_eq!(v.as_slice::<f32>(), pb[k].as_slice::<f32>(), "{k}");
        }
    }

    #[test]
    fn test_zero_message_length_rejected() {
        let m = small_model(ModelFamily::Waveform, DatasetFamily::Waveform, false);
        assert!(build_models(Pipeline::Waveform, &m, 0, 0).is_err());
    }
}
