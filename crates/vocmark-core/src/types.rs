//! Pipeline selection and metric records.

use crate::{ModelConfig, Result, VocmarkError};
use serde::{Deserialize, Serialize};

/// Codec family. Decides the tensor layout the codec operates on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    /// Raw waveform segments, `[B, 1, max_len]`.
    #[default]
    Waveform,
    /// Fixed-shape magnitude spectrograms, `[B, 512, 512]`.
    Spectral,
}

/// Dataset family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetFamily {
    /// A directory of cover waveforms, segmented to `max_len`.
    #[default]
    Waveform,
    /// A directory of cover waveforms, turned into fixed-shape magnitudes.
    Spectrogram,
    /// `self_vocoded/` + `GT/` pairs turned into fixed-shape magnitudes.
    Paired,
}

/// A valid `{ModelFamily x DatasetFamily}` pairing, chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pipeline {
    /// Waveform codec over waveform segments.
    Waveform,
    /// Spectral codec over single-directory spectrograms.
    Spectral,
    /// Spectral codec over paired spectrograms.
    SpectralPaired,
}

impl Pipeline {
    /// Resolve the pipeline from the structural flags.
    pub fn select(model: &ModelConfig) -> Result<Self> {
        let structure = &model.structure;
        match (structure.family, structure.dataset) {
            (ModelFamily::Waveform, DatasetFamily::Waveform) => Ok(Self::Waveform),
            (ModelFamily::Spectral, DatasetFamily::Spectrogram) => Ok(Self::Spectral),
            (ModelFamily::Spectral, DatasetFamily::Paired) => Ok(Self::SpectralPaired),
            (family, dataset) => Err(VocmarkError::Config(format!(
                "model family {family:?} cannot be trained on dataset family {dataset:?}"
            ))),
        }
    }

    /// Codec family of this pipeline.
    #[must_use]
    pub fn model_family(self) -> ModelFamily {
        match self {
            Self::Waveform => ModelFamily::Waveform,
            Self::Spectral | Self::SpectralPaired => ModelFamily::Spectral,
        }
    }

    /// Dataset family of this pipeline.
    #[must_use]
    pub fn dataset_family(self) -> DatasetFamily {
        match self {
            Self::Waveform => DatasetFamily::Waveform,
            Self::Spectral => DatasetFamily::Spectrogram,
            Self::SpectralPaired => DatasetFamily::Paired,
        }
    }
}

impl std::fmt::Display for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Waveform => "waveform",
            Self::Spectral => "spectral",
            Self::SpectralPaired => "spectral-paired",
        };
        f.write_str(name)
    }
}

/// Instrumentation for one training step, emitted every `show_circle` steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepMetrics {
    /// Epoch (1-based).
    pub epoch: usize,
    /// Step within the epoch (1-based).
    pub step: usize,
    /// Global step (1-based).
    pub global_step: usize,
    /// Fidelity loss.
    pub wav_loss: f32,
    /// Message loss.
    pub msg_loss: f32,
    /// Bit accuracy of every decoded output, in decoder order.
    pub acc: Vec<f32>,
    /// Cover-to-distortion ratio in dB.
    pub snr: f32,
    /// Mean squared cover power.
    pub norm: f32,
    /// Patch count of the first sample in the batch.
    pub patch_num: usize,
    /// Padding amount of the first sample in the batch.
    pub pad_num: usize,
    /// Length of the last axis of the batch.
    pub wav_len: usize,
    /// Codec learning rate after this step.
    pub lr: f32,
    /// Discriminator loss on watermarked audio.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d_loss_on_encoded: Option<f32>,
    /// Discriminator loss on cover audio.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d_loss_on_cover: Option<f32>,
}

/// Epoch-level validation averages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationMetrics {
    /// Epoch (1-based).
    pub epoch: usize,
    /// Mean fidelity loss.
    pub wav_loss: f32,
    /// Mean message loss.
    pub msg_loss: f32,
    /// Mean bit accuracy per decoded output.
    pub acc: Vec<f32>,
    /// Mean SNR in dB.
    pub snr: f32,
    /// Mean discriminator loss on watermarked audio.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d_loss_on_encoded: Option<f32>,
    /// Mean discriminator loss on cover audio.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d_loss_on_cover: Option<f32>,
    /// Number of validation batches averaged.
    pub batches: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_pairings() {
        let mut model = ModelConfig::default();
        assert_eq!(Pipeline::select(&model).unwrap(), Pipeline::Waveform);

        model.structure.family = ModelFamily::Spectral;
        model.structure.dataset = DatasetFamily::Paired;
        let pipeline = Pipeline::select(&model).unwrap();
        assert_eq!(pipeline, Pipeline::SpectralPaired);
        assert_eq!(pipeline.model_family(), ModelFamily::Spectral);
        assert_eq!(pipeline.dataset_family(), DatasetFamily::Paired);
    }

    #[test]
    fn test_invalid_pairing_is_config_error() {
        let mut model = ModelConfig::default();
        model.structure.family = ModelFamily::Waveform;
        model.structure.dataset = DatasetFamily::Spectrogram;
        assert!(matches!(
            Pipeline::select(&model),
            Err(VocmarkError::Config(_))
        ));
    }

    #[test]
    fn test_step_metrics_skip_absent_adversarial_fields() {
        let metrics = StepMetrics {
            acc: vec![0.5, 0.75],
            ..Default::default()
        };
        let yaml = serde_yaml::to_string(&metrics).unwrap();
        assert!(!yaml.contains("d_loss_on_cover"));
        assert!(yaml.contains("acc"));
    }
}
