//! Training checkpoint save/load.
//!
//! Layout under the run's checkpoint directory (`<ckpt>/pth` or `<ckpt>/pth_ab`):
//!
//! ```text
//! step_<global_step>/
//!     codec.safetensors
//!     codec_optimizer.safetensors          (after the first update)
//!     discriminator.safetensors            (adversarial runs)
//!     discriminator_optimizer.safetensors  (adversarial runs, after the first update)
//!     metadata.json
//! latest                                   (name of the newest step directory)
//! ```
//!
//! A checkpoint is assembled in a hidden `.step_<n>.tmp` directory and renamed
//! into place, and `latest` is replaced the same way, so an interrupted write
//! never disturbs the previous checkpoint.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use mlx_rs::module::ModuleParameters;
use mlx_rs::Array;
use serde::{Deserialize, Serialize};
use vocmark_core::VocmarkError;

use crate::{Result, ScheduledOptimizer, TrainerError};

const CODEC_FILE: &str = "codec.safetensors";
const CODEC_OPTIMIZER_FILE: &str = "codec_optimizer.safetensors";
const DISCRIMINATOR_FILE: &str = "discriminator.safetensors";
const DISCRIMINATOR_OPTIMIZER_FILE: &str = "discriminator_optimizer.safetensors";
const METADATA_FILE: &str = "metadata.json";
const LATEST_FILE: &str = "latest";
const STEP_PREFIX: &str = "step_";

/// Training state metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Last completed epoch (1-based).
    pub epoch: usize,
    /// Global step at save time.
    pub global_step: usize,
    /// Codec learning rate.
    pub codec_lr: f32,
    /// Codec optimizer steps taken.
    pub codec_scheduler_steps: usize,
    /// Discriminator learning rate, for adversarial runs.
    pub discriminator_lr: Option<f32>,
    /// Discriminator optimizer steps taken, for adversarial runs.
    pub discriminator_scheduler_steps: Option<usize>,
    /// Message length the codec was built for.
    pub msg_length: usize,
    /// Pipeline name.
    pub pipeline: String,
    /// Seed the run was started with.
    pub seed: u64,
    /// Timestamp (RFC 3339).
    pub timestamp: String,
}

/// Everything read back from one checkpoint directory.
#[derive(Debug)]
pub struct Checkpoint {
    /// Directory it was read from.
    pub path: PathBuf,
    /// Codec weights.
    pub codec: HashMap<String, Array>,
    /// Codec optimizer moments.
    pub codec_optimizer: HashMap<String, Array>,
    /// Discriminator weights and moments, for adversarial runs.
    pub discriminator: Option<(HashMap<String, Array>, HashMap<String, Array>)>,
    /// Progress metadata.
    pub metadata: CheckpointMetadata,
}

/// Model and optimizer borrowed for a save.
pub struct SaveTarget<'a, M: ModuleParameters> {
    /// The network.
    pub model: &'a M,
    /// Its optimizer.
    pub optimizer: &'a ScheduledOptimizer,
}

/// Checkpoint manager for one run directory.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    checkpoint_dir: PathBuf,
}

impl CheckpointManager {
    /// Create a manager, creating the directory if needed.
    pub fn new(checkpoint_dir: impl AsRef<Path>) -> Result<Self> {
        let checkpoint_dir = checkpoint_dir.as_ref().to_path_buf();
        fs::create_dir_all(&checkpoint_dir).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to create checkpoint directory {}: {e}",
                    checkpoint_dir.display()
                ),
            )
        })?;
        Ok(Self { checkpoint_dir })
    }

    /// The run's checkpoint directory.
    #[must_use]
    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    /// Directory a given step is stored in.
    #[must_use]
    pub fn step_dir(&self, global_step: usize) -> PathBuf {
        self.checkpoint_dir.join(format!("{STEP_PREFIX}{global_step}"))
    }

    /// Write a checkpoint and point `latest` at it.
    pub fn save<C, D>(
        &self,
        codec: SaveTarget<'_, C>,
        discriminator: Option<SaveTarget<'_, D>>,
        metadata: &CheckpointMetadata,
    ) -> Result<PathBuf>
    where
        C: ModuleParameters,
        D: ModuleParameters,
    {
        let step_dir = self.step_dir(metadata.global_step);
        let tmp_dir = self
            .checkpoint_dir
            .join(format!(".{STEP_PREFIX}{}.tmp", metadata.global_step));
        if tmp_dir.exists() {
            fs::remove_dir_all(&tmp_dir)?;
        }
        fs::create_dir_all(&tmp_dir)?;

        save_arrays(model_arrays(codec.model), &tmp_dir.join(CODEC_FILE))?;
        save_state(
            codec.optimizer.state_arrays(),
            &tmp_dir.join(CODEC_OPTIMIZER_FILE),
        )?;
        if let Some(disc) = discriminator {
            save_arrays(model_arrays(disc.model), &tmp_dir.join(DISCRIMINATOR_FILE))?;
            save_state(
                disc.optimizer.state_arrays(),
                &tmp_dir.join(DISCRIMINATOR_OPTIMIZER_FILE),
            )?;
        }
        let json = serde_json::to_string_pretty(metadata)
            .map_err(|e| VocmarkError::Serialization(e.to_string()))?;
        fs::write(tmp_dir.join(METADATA_FILE), json)?;

        if step_dir.exists() {
            fs::remove_dir_all(&step_dir)?;
        }
        fs::rename(&tmp_dir, &step_dir)?;
        self.update_latest(metadata.global_step)?;

        tracing::info!(
            epoch = metadata.epoch,
            global_step = metadata.global_step,
            path = %step_dir.display(),
            "Saved checkpoint"
        );
        Ok(step_dir)
    }

    fn update_latest(&self, global_step: usize) -> Result<()> {
        let tmp = self.checkpoint_dir.join(format!(".{LATEST_FILE}.tmp"));
        fs::write(&tmp, format!("{STEP_PREFIX}{global_step}"))?;
        fs::rename(&tmp, self.checkpoint_dir.join(LATEST_FILE))?;
        Ok(())
    }

    /// Load `step_<global_step>`. A missing checkpoint is a configuration error.
    pub fn load(&self, global_step: usize) -> Result<Checkpoint> {
        let dir = self.step_dir(global_step);
        if !dir.join(METADATA_FILE).is_file() {
            return Err(VocmarkError::Config(format!(
                "no checkpoint for step {global_step} under {}",
                self.checkpoint_dir.display()
            ))
            .into());
        }
        Self::load_dir(&dir)
    }

    /// Load a checkpoint directory.
    pub fn load_dir(dir: &Path) -> Result<Checkpoint> {
        let text = fs::read_to_string(dir.join(METADATA_FILE))?;
        let metadata: CheckpointMetadata = serde_json::from_str(&text)
            .map_err(|e| VocmarkError::Serialization(format!("{}: {e}", dir.display())))?;

        let codec = load_arrays(&dir.join(CODEC_FILE))?;
        let codec_optimizer = load_state(&dir.join(CODEC_OPTIMIZER_FILE))?;
        let discriminator = if dir.join(DISCRIMINATOR_FILE).is_file() {
            Some((
                load_arrays(&dir.join(DISCRIMINATOR_FILE))?,
                load_state(&dir.join(DISCRIMINATOR_OPTIMIZER_FILE))?,
            ))
        } else {
            None
        };

        tracing::info!(
            epoch = metadata.epoch,
            global_step = metadata.global_step,
            path = %dir.display(),
            "Loaded checkpoint"
        );
        Ok(Checkpoint {
            path: dir.to_path_buf(),
            codec,
            codec_optimizer,
            discriminator,
            metadata,
        })
    }

    /// Step named by the `latest` marker, if any.
    pub fn latest_step(&self) -> Result<Option<usize>> {
        let path = self.checkpoint_dir.join(LATEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let name = fs::read_to_string(path)?;
        Ok(parse_step(name.trim()))
    }

    /// Load the checkpoint named by `latest`.
    pub fn load_latest(&self) -> Result<Option<Checkpoint>> {
        match self.latest_step()? {
            Some(step) => self.load(step).map(Some),
            None => Ok(None),
        }
    }

    /// Completed checkpoints, oldest first.
    pub fn list(&self) -> Result<Vec<(usize, PathBuf)>> {
        let mut checkpoints: Vec<(usize, PathBuf)> = fs::read_dir(&self.checkpoint_dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                parse_step(&name).map(|step| (step, entry.path()))
            })
            .collect();
        checkpoints.sort_by_key(|(step, _)| *step);
        Ok(checkpoints)
    }
}

fn parse_step(name: &str) -> Option<usize> {
    name.strip_prefix(STEP_PREFIX)?.parse().ok()
}

fn model_arrays<M: ModuleParameters>(model: &M) -> HashMap<String, Array> {
    model
        .parameters()
        .flatten()
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn save_arrays(arrays: HashMap<String, Array>, path: &Path) -> Result<()> {
    Array::save_safetensors(arrays, None, path).map_err(|e| {
        TrainerError::Io(std::io::Error::other(format!(
            "Failed to save {}: {e}",
            path.display()
        )))
    })
}

/// Optimizer moments only exist after the first update.
fn save_state(arrays: HashMap<String, Array>, path: &Path) -> Result<()> {
    if arrays.is_empty() {
        return Ok(());
    }
    save_arrays(arrays, path)
}

fn load_state(path: &Path) -> Result<HashMap<String, Array>> {
    if path.is_file() {
        load_arrays(path)
    } else {
        Ok(HashMap::new())
    }
}

fn load_arrays(path: &Path) -> Result<HashMap<String, Array>> {
    Array::load_safetensors(path).map_err(|e| {
        TrainerError::Io(std::io::Error::other(format!(
            "Failed to load {}: {e}",
            path.display()
        )))
    })
}

/// Copy `arrays` into `model`. Every model parameter must be present.
pub fn load_weights<M: ModuleParameters>(
    model: &mut M,
    mut arrays: HashMap<String, Array>,
) -> Result<()> {
    let mut params = model.parameters_mut().flatten();
    for (key, param) in params.iter_mut() {
        let value = arrays.remove(&**key).ok_or_else(|| {
            VocmarkError::Config(format!("checkpoint is missing parameter {key}"))
        })?;
        if value.shape() != param.shape() {
            return Err(VocmarkError::Config(format!(
                "parameter {key} has shape {:?} in checkpoint, model expects {:?}",
                value.shape(),
                param.shape()
            ))
            .into());
        }
        **param = value;
    }
    if !arrays.is_empty() {
        tracing::warn!(unused = arrays.len(), "checkpoint has parameters the model does not use");
    }
    mlx_rs::transforms::eval(params.values().map(|v| &**v))?;
    Ok(())
}
