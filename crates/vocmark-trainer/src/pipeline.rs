//! Dataset construction per pipeline.

use std::sync::Arc;

use vocmark_core::{Pipeline, RunConfig, VocmarkError};
use vocmark_data::{
    PairedAudioDataset, SpectrogramDataset, SpectrogramTransform, WatermarkDataset, WaveDataset,
};

use crate::Result;

/// Training and validation datasets for one run.
pub struct DatasetPair {
    /// Shuffled every epoch.
    pub train: Arc<dyn WatermarkDataset>,
    /// Iterated in a fixed order.
    pub val: Arc<dyn WatermarkDataset>,
}

/// Open the datasets `pipeline` trains on.
///
/// Waveform and spectrogram pipelines read `raw_path` and `val_path` as flat
/// directories. The paired pipeline reads `raw_path/{self_vocoded,GT}` for
/// training and `val_path` + `val_gt_path` for validation.
pub fn build_datasets(pipeline: Pipeline, config: &RunConfig) -> Result<DatasetPair> {
    let audio = &config.process.audio;
    let paths = &config.train.path;
    let pair = match pipeline {
        Pipeline::Waveform => DatasetPair {
            train: Arc::new(WaveDataset::new(&paths.raw_path, audio.max_len, audio.sample_rate)?),
            val: Arc::new(WaveDataset::new(&paths.val_path, audio.max_len, audio.sample_rate)?),
        },
        Pipeline::Spectral => {
            let transform = Arc::new(SpectrogramTransform::from_config(audio)?);
            DatasetPair {
                train: Arc::new(SpectrogramDataset::new(
                    &paths.raw_path,
                    Arc::clone(&transform),
                    audio.sample_rate,
                )?),
                val: Arc::new(SpectrogramDataset::new(
                    &paths.val_path,
                    transform,
                    audio.sample_rate,
                )?),
            }
        }
        Pipeline::SpectralPaired => {
            let gt = paths.val_gt_path.as_ref().ok_or_else(|| {
                VocmarkError::Config("paired pipeline requires path.val_gt_path".into())
            })?;
            let transform = Arc::new(SpectrogramTransform::from_config(audio)?);
            DatasetPair {
                train: Arc::new(PairedAudioDataset::train(
                    &paths.raw_path,
                    Arc::clone(&transform),
                    audio.sample_rate,
                )?),
                val: Arc::new(PairedAudioDataset::eval(
                    &paths.val_path,
                    gt,
                    transform,
                    audio.sample_rate,
                )?),
            }
        }
    };
    tracing::info!(
        pipeline = %pipeline,
        train = pair.train.len(),
        val = pair.val.len(),
        "opened datasets"
    );
    Ok(pair)
}
