//! Configuration documents for vocmark.
//!
//! A training run is described by three YAML documents: `process.yaml`
//! (audio framing), `model.yaml` (architecture and pipeline selection) and
//! `train.yaml` (data paths, optimization, cadence). Each document validates
//! itself after parsing so a bad value fails before any data is touched.

use crate::{DatasetFamily, ModelFamily, Result, VocmarkError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Number of frequency bins kept after truncation.
pub const SPEC_BINS: usize = 512;

/// Number of time frames kept after crop/pad.
pub const SPEC_FRAMES: usize = 512;

/// Read and parse a YAML document, mapping every failure to a config error.
pub fn load_yaml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        VocmarkError::Config(format!("failed to read {}: {}", path.display(), e))
    })?;
    serde_yaml::from_str(&content)
        .map_err(|e| VocmarkError::Config(format!("malformed {}: {}", path.display(), e)))
}

/// Audio framing parameters (`process.yaml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Audio section.
    #[serde(default)]
    pub audio: AudioConfig,
}

/// STFT framing and segment length.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Expected sample rate. Files at other rates are used as-is with a warning.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// STFT window length.
    #[serde(default = "default_win_len")]
    pub win_len: usize,

    /// STFT hop length.
    #[serde(default = "default_hop_len")]
    pub hop_len: usize,

    /// FFT size.
    #[serde(default = "default_n_fft")]
    pub n_fft: usize,

    /// Waveform segment length in samples for the waveform dataset.
    #[serde(default = "default_max_len")]
    pub max_len: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            win_len: default_win_len(),
            hop_len: default_hop_len(),
            n_fft: default_n_fft(),
            max_len: default_max_len(),
        }
    }
}

impl ProcessConfig {
    /// Load and validate `process.yaml`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = load_yaml(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let audio = &self.audio;
        if audio.win_len == 0 || audio.hop_len == 0 || audio.max_len == 0 {
            return Err(VocmarkError::Config(
                "win_len, hop_len and max_len must be positive".into(),
            ));
        }
        if audio.win_len > audio.n_fft {
            return Err(VocmarkError::Config(format!(
                "win_len ({}) cannot exceed n_fft ({})",
                audio.win_len, audio.n_fft
            )));
        }
        if audio.n_fft / 2 + 1 < SPEC_BINS {
            return Err(VocmarkError::Config(format!(
                "n_fft {} yields fewer than {} frequency bins",
                audio.n_fft, SPEC_BINS
            )));
        }
        Ok(())
    }
}

/// Model architecture and pipeline selection (`model.yaml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Width settings.
    #[serde(default)]
    pub dim: DimConfig,

    /// Depth settings.
    #[serde(default)]
    pub layer: LayerConfig,

    /// Family selection and structural flags.
    #[serde(default)]
    pub structure: StructureConfig,

    /// Embedding strength curriculum.
    #[serde(default)]
    pub watermark: StrengthConfig,
}

/// Width settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimConfig {
    /// Hidden channel count shared by encoder, decoder and discriminator.
    #[serde(default = "default_embedding")]
    pub embedding: usize,
}

impl Default for DimConfig {
    fn default() -> Self {
        Self {
            embedding: default_embedding(),
        }
    }
}

/// Depth settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerConfig {
    /// Convolution layers in the encoder body.
    #[serde(default = "default_layers")]
    pub nlayers_encoder: usize,

    /// Convolution layers in the decoder body.
    #[serde(default = "default_layers")]
    pub nlayers_decoder: usize,

    /// Channel groups (heads) in encoder body convolutions.
    #[serde(default = "default_heads")]
    pub attention_heads_encoder: usize,

    /// Channel groups (heads) in decoder body convolutions.
    #[serde(default = "default_heads")]
    pub attention_heads_decoder: usize,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            nlayers_encoder: default_layers(),
            nlayers_decoder: default_layers(),
            attention_heads_encoder: default_heads(),
            attention_heads_decoder: default_heads(),
        }
    }
}

/// Structural flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructureConfig {
    /// Codec family.
    #[serde(default)]
    pub family: ModelFamily,

    /// Dataset family.
    #[serde(default)]
    pub dataset: DatasetFamily,

    /// Decoder reads through the encoder's feature extractor.
    #[serde(default)]
    pub share: bool,

    /// Ablation run. Checkpoints go under `pth_ab` instead of `pth`.
    #[serde(default)]
    pub ab: bool,
}

/// Linear anneal of the carrier scale over the first `ramp_steps` steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrengthConfig {
    /// Carrier scale at step 0.
    #[serde(default = "default_strength")]
    pub strength_start: f32,

    /// Carrier scale once the ramp is finished.
    #[serde(default = "default_strength")]
    pub strength_end: f32,

    /// Ramp length in global steps. Zero disables the ramp.
    #[serde(default)]
    pub ramp_steps: usize,
}

impl Default for StrengthConfig {
    fn default() -> Self {
        Self {
            strength_start: default_strength(),
            strength_end: default_strength(),
            ramp_steps: 0,
        }
    }
}

impl StrengthConfig {
    /// Fraction of the ramp completed at `global_step`, in `[0, 1]`.
    #[must_use]
    pub fn progress(&self, global_step: usize) -> f32 {
        if self.ramp_steps == 0 {
            return 1.0;
        }
        (global_step as f32 / self.ramp_steps as f32).min(1.0)
    }

    /// Carrier scale at `global_step`.
    #[must_use]
    pub fn strength(&self, global_step: usize) -> f32 {
        let p = self.progress(global_step);
        self.strength_start + (self.strength_end - self.strength_start) * p
    }
}

impl ModelConfig {
    /// Load and validate `model.yaml`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = load_yaml(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let embedding = self.dim.embedding;
        if embedding == 0 {
            return Err(VocmarkError::Config("embedding dim must be positive".into()));
        }
        if self.layer.nlayers_encoder == 0 || self.layer.nlayers_decoder == 0 {
            return Err(VocmarkError::Config(
                "encoder and decoder need at least one layer".into(),
            ));
        }
        for (name, heads) in [
            ("attention_heads_encoder", self.layer.attention_heads_encoder),
            ("attention_heads_decoder", self.layer.attention_heads_decoder),
        ] {
            if heads == 0 || embedding % heads != 0 {
                return Err(VocmarkError::Config(format!(
                    "{name} ({heads}) must be positive and divide embedding ({embedding})"
                )));
            }
        }
        let w = &self.watermark;
        if !(w.strength_start > 0.0 && w.strength_end > 0.0) {
            return Err(VocmarkError::Config("watermark strength must be positive".into()));
        }
        Ok(())
    }
}

/// Training parameters (`train.yaml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Filesystem locations.
    pub path: PathConfig,

    /// Optimizer and loss settings.
    #[serde(default)]
    pub optimize: OptimizeConfig,

    /// Epoch count and cadences.
    #[serde(default)]
    pub iter: IterConfig,

    /// Message settings.
    #[serde(default)]
    pub watermark: WatermarkConfig,

    /// Enable adversarial training against the discriminator.
    #[serde(default)]
    pub adv: bool,

    /// Seed for weight init, message sampling and shuffling.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Data loader settings.
    #[serde(default)]
    pub loader: LoaderConfig,
}

/// Filesystem locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    /// Training data root.
    pub raw_path: PathBuf,

    /// Validation data root (distorted side for paired datasets).
    pub val_path: PathBuf,

    /// Validation ground-truth root, required by the paired dataset.
    #[serde(default)]
    pub val_gt_path: Option<PathBuf>,

    /// Checkpoint root.
    pub ckpt: PathBuf,

    /// Metric log root.
    pub log_path: PathBuf,
}

/// Optimizer and loss settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizeConfig {
    /// Batch size. Must be smaller than the training set.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Initial learning rate for both optimizers.
    #[serde(default = "default_lr")]
    pub lr: f32,

    /// Adam betas.
    #[serde(default = "default_betas")]
    pub betas: (f32, f32),

    /// Adam epsilon.
    #[serde(default = "default_eps")]
    pub eps: f32,

    /// Weight decay.
    #[serde(default = "default_weight_decay")]
    pub weight_decay: f32,

    /// Optimizer steps between learning rate decays.
    #[serde(default = "default_step_size")]
    pub step_size: usize,

    /// Multiplicative learning rate decay.
    #[serde(default = "default_gamma")]
    pub gamma: f32,

    /// Fidelity loss weight.
    #[serde(default = "default_lambda")]
    pub lambda_e: f32,

    /// Message loss weight.
    #[serde(default = "default_lambda")]
    pub lambda_m: f32,

    /// Adversarial loss weight.
    #[serde(default = "default_lambda_a")]
    pub lambda_a: f32,

    /// Global step before which only the message loss is optimized.
    #[serde(default)]
    pub pre_step: usize,
}

impl Default for OptimizeConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            lr: default_lr(),
            betas: default_betas(),
            eps: default_eps(),
            weight_decay: default_weight_decay(),
            step_size: default_step_size(),
            gamma: default_gamma(),
            lambda_e: default_lambda(),
            lambda_m: default_lambda(),
            lambda_a: default_lambda_a(),
            pre_step: 0,
        }
    }
}

/// Epoch count and cadences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterConfig {
    /// Number of epochs.
    #[serde(default = "default_epochs")]
    pub epoch: usize,

    /// Checkpoint every `save_circle` epochs.
    #[serde(default = "default_one")]
    pub save_circle: usize,

    /// Log step metrics every `show_circle` steps.
    #[serde(default = "default_show_circle")]
    pub show_circle: usize,
}

impl Default for IterConfig {
    fn default() -> Self {
        Self {
            epoch: default_epochs(),
            save_circle: default_one(),
            show_circle: default_show_circle(),
        }
    }
}

/// Message settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatermarkConfig {
    /// Message length in bits.
    #[serde(default = "default_msg_length")]
    pub length: usize,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            length: default_msg_length(),
        }
    }
}

/// Data loader settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Background worker threads building batches. Zero builds batches
    /// inline on the training thread, where `timeout_secs` does not apply.
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,

    /// Batches buffered ahead of the training loop.
    #[serde(default = "default_prefetch")]
    pub prefetch: usize,

    /// Seconds to wait for a batch before reporting a stall.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            num_workers: default_num_workers(),
            prefetch: default_prefetch(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl TrainConfig {
    /// Load and validate `train.yaml`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = load_yaml(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let opt = &self.optimize;
        if opt.batch_size == 0 {
            return Err(VocmarkError::Config("batch_size must be positive".into()));
        }
        if !(opt.lr > 0.0) {
            return Err(VocmarkError::Config("lr must be positive".into()));
        }
        if opt.step_size == 0 {
            return Err(VocmarkError::Config("step_size must be positive".into()));
        }
        if !(opt.gamma > 0.0 && opt.gamma <= 1.0) {
            return Err(VocmarkError::Config(format!(
                "gamma must be in (0, 1], got {}",
                opt.gamma
            )));
        }
        if opt.lambda_e < 0.0 || opt.lambda_m < 0.0 || opt.lambda_a < 0.0 {
            return Err(VocmarkError::Config("loss weights must be non-negative".into()));
        }
        if self.iter.epoch == 0 || self.iter.save_circle == 0 || self.iter.show_circle == 0 {
            return Err(VocmarkError::Config(
                "epoch, save_circle and show_circle must be positive".into(),
            ));
        }
        if self.watermark.length == 0 {
            return Err(VocmarkError::Config("watermark length must be positive".into()));
        }
        if self.loader.num_workers > 0 && self.loader.prefetch == 0 {
            return Err(VocmarkError::Config(
                "prefetch must be positive when workers are enabled".into(),
            ));
        }
        if self.loader.timeout_secs == 0 {
            return Err(VocmarkError::Config("loader timeout must be positive".into()));
        }
        Ok(())
    }
}

/// The three documents that fully describe a run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Audio framing.
    pub process: ProcessConfig,
    /// Architecture.
    pub model: ModelConfig,
    /// Training.
    pub train: TrainConfig,
}

impl RunConfig {
    /// Load all three documents.
    pub fn load(
        process: impl AsRef<Path>,
        model: impl AsRef<Path>,
        train: impl AsRef<Path>,
    ) -> Result<Self> {
        Ok(Self {
            process: ProcessConfig::from_file(process)?,
            model: ModelConfig::from_file(model)?,
            train: TrainConfig::from_file(train)?,
        })
    }

    /// Checkpoint directory for this run: `<ckpt>/pth` or `<ckpt>/pth_ab`.
    #[must_use]
    pub fn checkpoint_dir(&self) -> PathBuf {
        let sub = if self.model.structure.ab { "pth_ab" } else { "pth" };
        self.train.path.ckpt.join(sub)
    }
}

fn default_sample_rate() -> u32 {
    22050
}
fn default_win_len() -> usize {
    1024
}
fn default_hop_len() -> usize {
    256
}
fn default_n_fft() -> usize {
    1024
}
fn default_max_len() -> usize {
    16384
}
fn default_embedding() -> usize {
    64
}
fn default_layers() -> usize {
    2
}
fn default_heads() -> usize {
    4
}
fn default_strength() -> f32 {
    1.0
}
fn default_seed() -> u64 {
    2025
}
fn default_batch_size() -> usize {
    8
}
fn default_lr() -> f32 {
    1e-4
}
fn default_betas() -> (f32, f32) {
    (0.9, 0.999)
}
fn default_eps() -> f32 {
    1e-6
}
fn default_weight_decay() -> f32 {
    1e-5
}
fn default_step_size() -> usize {
    2000
}
fn default_gamma() -> f32 {
    0.98
}
fn default_lambda() -> f32 {
    1.0
}
fn default_lambda_a() -> f32 {
    0.1
}
fn default_epochs() -> usize {
    10
}
fn default_one() -> usize {
    1
}
fn default_show_circle() -> usize {
    100
}
fn default_msg_length() -> usize {
    16
}
fn default_num_workers() -> usize {
    1
}
fn default_prefetch() -> usize {
    2
}
fn default_timeout_secs() -> u64 {
    60
}
