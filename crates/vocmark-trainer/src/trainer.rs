//! Adversarial watermark training orchestrator.
//!
//! One epoch is a full pass over the training loader followed by a full
//! no-grad pass over the validation loader. Each training step:
//!
//! 1. samples a fresh message for the actual batch size,
//! 2. embeds and decodes it, computing fidelity and message losses,
//! 3. updates the codec on the phase-gated objective (plus the generator
//!    adversarial term when adversarial training is on),
//! 4. with adversarial training, updates the discriminator on the cover and
//!    on the already computed watermarked batch with gradients stopped.
//!
//! The discriminator is always built but never touched when adversarial
//! training is off.

use std::path::PathBuf;
use std::sync::Arc;

use mlx_rs::error::Exception;
use mlx_rs::module::ModuleParameters;
use mlx_rs::{nn, Array};
use vocmark_core::{
    Pipeline, RunConfig, StepMetrics, TrainingCallback, ValidationMetrics, VocmarkError,
};
use vocmark_data::{Batch, DataLoader, DataLoaderConfig, WatermarkDataset};
use vocmark_models::{build_models, Discriminator, WatermarkCodec};

use crate::checkpoint::{load_weights, CheckpointManager, CheckpointMetadata, SaveTarget};
use crate::error::{StageExt, TrainStage, TrainerError};
use crate::loss::{bce_with_logits, LossComposer, COVER_LABEL, WATERMARKED_LABEL};
use crate::metrics::{bit_accuracy, mean_power, snr_db, MetricAccumulator};
use crate::{
    build_datasets, CompositeCallback, LoggingCallback, MessageSampler, MetricsJsonCallback,
    ProgressCallback, Result, ScheduledOptimizer,
};

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Constructed, not yet training.
    Idle,
    /// Between steps of an epoch.
    EpochRunning,
    /// Inside a training step.
    StepTraining,
    /// Inside the validation pass.
    StepValidating,
    /// Writing a checkpoint.
    Checkpointing,
    /// All epochs finished.
    Done,
}

/// Tensors and scalar losses produced by one training step.
///
/// Tensors are from the forward pass that preceded the parameter update.
#[derive(Debug)]
pub struct StepOutcome {
    /// Cover batch `[B, C, L]`.
    pub cover: Array,
    /// Sent message `[B, 1, M]`.
    pub message: Array,
    /// Watermarked batch `[B, C, L]`.
    pub encoded: Array,
    /// One estimate per decoder stage, each `[B, 1, M]`.
    pub decoded: Vec<Array>,
    /// Fidelity loss.
    pub wav_loss: f32,
    /// Message loss.
    pub msg_loss: f32,
    /// Optimized generator objective.
    pub total_loss: f32,
    /// `(on_encoded, on_cover)` discriminator losses, adversarial runs only.
    pub d_losses: Option<(f32, f32)>,
}

/// Tensors of the generator forward pass, taken out of the gradient closure.
struct GeneratorPass {
    encoded: Array,
    decoded: Vec<Array>,
    fidelity: Array,
    msg: Array,
}

/// Result of a full training run.
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    /// Last epoch completed.
    pub epoch: usize,
    /// Global step reached.
    pub global_step: usize,
    /// Validation metrics of the last epoch.
    pub last_validation: Option<ValidationMetrics>,
    /// Checkpoints written during this run.
    pub checkpoints: Vec<PathBuf>,
}

/// Drives codec and discriminator training over configured datasets.
pub struct WatermarkTrainer {
    config: RunConfig,
    pipeline: Pipeline,
    codec: WatermarkCodec,
    discriminator: Discriminator,
    codec_optimizer: ScheduledOptimizer,
    discriminator_optimizer: ScheduledOptimizer,
    losses: LossComposer,
    sampler: MessageSampler,
    train_loader: DataLoader,
    val_loader: DataLoader,
    checkpoints: CheckpointManager,
    callbacks: CompositeCallback,
    phase: Phase,
    epoch: usize,
    global_step: usize,
}

impl WatermarkTrainer {
    /// Build everything a run needs from its three configuration documents.
    pub fn new(config: RunConfig) -> Result<Self> {
        let pipeline = Pipeline::select(&config.model)?;
        let datasets = build_datasets(pipeline, &config).stage(TrainStage::DataLoading)?;
        Self::with_datasets(config, pipeline, datasets.train, datasets.val)
    }

    /// Build a trainer over already opened datasets.
    pub fn with_datasets(
        config: RunConfig,
        pipeline: Pipeline,
        train: Arc<dyn WatermarkDataset>,
        val: Arc<dyn WatermarkDataset>,
    ) -> Result<Self> {
        let train_cfg = &config.train;
        let batch_size = train_cfg.optimize.batch_size;
        if batch_size >= train.len() {
            return Err(VocmarkError::Config(format!(
                "batch_size {batch_size} must be smaller than the training set ({} items)",
                train.len()
            ))
            .into());
        }

        let msg_length = train_cfg.watermark.length;
        let bundle = build_models(pipeline, &config.model, msg_length, train_cfg.seed)?;
        let codec_optimizer = ScheduledOptimizer::new("codec", &train_cfg.optimize)?;
        let discriminator_optimizer =
            ScheduledOptimizer::new("discriminator", &train_cfg.optimize)?;

        let train_loader = DataLoader::new(
            train,
            DataLoaderConfig::from_loader(batch_size, true, train_cfg.seed, &train_cfg.loader),
        )?;
        let val_loader = DataLoader::new(
            val,
            DataLoaderConfig::from_loader(batch_size, false, train_cfg.seed, &train_cfg.loader),
        )?;
        let checkpoints = CheckpointManager::new(config.checkpoint_dir())?;

        tracing::info!(
            pipeline = %pipeline,
            adv = train_cfg.adv,
            batch_size,
            msg_length,
            steps_per_epoch = train_loader.num_batches(),
            val_batches = val_loader.num_batches(),
            "trainer ready"
        );

        Ok(Self {
            losses: LossComposer::from_config(&train_cfg.optimize),
            sampler: MessageSampler::new(train_cfg.seed, msg_length),
            pipeline,
            codec: bundle.codec,
            discriminator: bundle.discriminator,
            codec_optimizer,
            discriminator_optimizer,
            train_loader,
            val_loader,
            checkpoints,
            callbacks: CompositeCallback::new(),
            phase: Phase::Idle,
            epoch: 0,
            global_step: 0,
            config,
        })
    }

    /// Add a callback.
    pub fn add_callback(&mut self, callback: Box<dyn TrainingCallback>) {
        self.callbacks.add(callback);
    }

    /// Install progress bar, step/validation logging and JSONL metric files.
    pub fn with_default_callbacks(mut self) -> Result<Self> {
        let json = MetricsJsonCallback::new(&self.config.train.path.log_path)?;
        self.add_callback(Box::new(ProgressCallback::new()));
        self.add_callback(Box::new(LoggingCallback));
        self.add_callback(Box::new(json));
        Ok(self)
    }

    /// Resume from `step_<global_step>` in this run's checkpoint directory.
    ///
    /// Training continues at the epoch after the checkpoint's epoch.
    pub fn restore(&mut self, global_step: usize) -> Result<()> {
        let ckpt = self
            .checkpoints
            .load(global_step)
            .stage(TrainStage::CheckpointLoad)?;
        let meta = &ckpt.metadata;
        if meta.msg_length != self.sampler.length() {
            return Err(VocmarkError::Config(format!(
                "checkpoint was trained with {}-bit messages, config asks for {}",
                meta.msg_length,
                self.sampler.length()
            ))
            .into());
        }

        load_weights(&mut self.codec, ckpt.codec).stage(TrainStage::CheckpointLoad)?;
        self.codec_optimizer
            .restore(ckpt.codec_optimizer, meta.codec_scheduler_steps)
            .stage(TrainStage::CheckpointLoad)?;

        if self.config.train.adv {
            match ckpt.discriminator {
                Some((weights, moments)) => {
                    load_weights(&mut self.discriminator, weights)
                        .stage(TrainStage::CheckpointLoad)?;
                    self.discriminator_optimizer
                        .restore(moments, meta.discriminator_scheduler_steps.unwrap_or(0))
                        .stage(TrainStage::CheckpointLoad)?;
                }
                None => tracing::warn!(
                    "checkpoint has no discriminator; adversarial training restarts it"
                ),
            }
        }

        self.epoch = meta.epoch;
        self.global_step = meta.global_step;
        tracing::info!(
            epoch = self.epoch,
            global_step = self.global_step,
            lr = self.codec_optimizer.learning_rate(),
            "resumed"
        );
        Ok(())
    }

    /// Run the remaining epochs.
    pub fn train(&mut self) -> Result<TrainingSummary> {
        let total_epochs = self.config.train.iter.epoch;
        let save_circle = self.config.train.iter.save_circle;
        let show_circle = self.config.train.iter.show_circle;
        let steps_per_epoch = self.train_loader.num_batches();

        self.callbacks.on_train_start(total_epochs, steps_per_epoch);
        let mut summary = TrainingSummary {
            epoch: self.epoch,
            global_step: self.global_step,
            last_validation: None,
            checkpoints: Vec::new(),
        };

        for epoch in self.epoch + 1..=total_epochs {
            self.phase = Phase::EpochRunning;
            self.epoch = epoch;
            self.callbacks.on_epoch_start(epoch);
            tracing::info!("Epoch {}/{}", epoch, total_epochs);

            let mut step = 0;
            for batch in self.train_loader.epoch(epoch) {
                let batch = batch.stage(TrainStage::DataLoading)?;
                self.global_step += 1;
                step += 1;

                self.phase = Phase::StepTraining;
                let outcome = self.train_step(&batch)?;
                self.phase = Phase::EpochRunning;
                self.callbacks.on_step_end(self.global_step);

                if step % show_circle == 0 {
                    let metrics = self
                        .step_metrics(epoch, step, &batch, &outcome)
                        .stage(TrainStage::ForwardPass)?;
                    self.callbacks.on_step_metrics(&metrics);
                }
            }

            if epoch % save_circle == 0 {
                self.phase = Phase::Checkpointing;
                let path = self.save_checkpoint().stage(TrainStage::CheckpointWrite)?;
                self.callbacks.on_save(&path);
                summary.checkpoints.push(path);
            }

            self.phase = Phase::StepValidating;
            let metrics = self.validate()?;
            self.callbacks.on_epoch_end(epoch, &metrics);
            summary.last_validation = Some(metrics);
        }

        self.phase = Phase::Done;
        self.callbacks.on_train_end();
        summary.epoch = self.epoch;
        summary.global_step = self.global_step;
        Ok(summary)
    }

    /// One training step on `batch` at the current global step.
    pub fn train_step(&mut self, batch: &Batch) -> Result<StepOutcome> {
        let global_step = self.global_step;
        let adv = self.config.train.adv;
        let steps_per_epoch = self.train_loader.num_batches();

        let cover = Array::from_slice(&batch.data, &batch.dims());
        let message = self.sampler.sample(batch.batch_size);

        // Generator update. The forward pass runs once, inside the gradient
        // closure; its tensors are handed out through `pass` for metrics and
        // the discriminator step. The discriminator is captured by reference,
        // so it contributes to the objective without receiving gradients.
        let mut pass: Option<GeneratorPass> = None;
        let (total, grads) = {
            let losses = self.losses;
            let discriminator = &self.discriminator;
            let pass = &mut pass;
            let loss_fn = |codec: &mut WatermarkCodec,
                           (cover, message): (&Array, &Array)|
             -> std::result::Result<Array, Exception> {
                let (encoded, _carrier) = codec.embed(cover, message, global_step)?;
                let decoded = codec.decode(&encoded, global_step)?;
                let (fidelity, msg) = losses.en_de_loss(cover, &encoded, message, &decoded)?;
                let mut total = losses.compose(&fidelity, &msg, global_step)?;
                if adv {
                    let logits = discriminator.forward(&encoded)?;
                    let g_loss_adv = bce_with_logits(&logits, COVER_LABEL)?;
                    total = losses.with_adversarial(&total, &g_loss_adv)?;
                }
                *pass = Some(GeneratorPass {
                    encoded,
                    decoded,
                    fidelity,
                    msg,
                });
                Ok(total)
            };
            let mut loss_and_grad_fn = nn::value_and_grad(loss_fn);
            loss_and_grad_fn(&mut self.codec, (&cover, &message))
                .stage(TrainStage::ForwardPass)?
        };
        let GeneratorPass {
            encoded,
            decoded,
            fidelity,
            msg,
        } = pass.ok_or_else(|| {
            TrainerError::from(Exception::custom("generator pass produced no outputs"))
                .in_stage(TrainStage::ForwardPass)
        })?;

        // Materialize the pass before the update replaces the parameters it read.
        let encoded = mlx_rs::stop_gradient(&encoded).stage(TrainStage::ForwardPass)?;
        mlx_rs::transforms::eval(
            std::iter::once(&encoded)
                .chain(decoded.iter())
                .chain([&fidelity, &msg, &total]),
        )
        .stage(TrainStage::ForwardPass)?;
        let (wav_loss, msg_loss, total_loss) =
            (fidelity.item::<f32>(), msg.item::<f32>(), total.item::<f32>());

        self.codec_optimizer
            .step(&mut self.codec, &grads, global_step, steps_per_epoch)
            .stage(TrainStage::OptimizerStep)?;

        let d_losses = if adv {
            Some(
                self.discriminator_step(&cover, &encoded, global_step, steps_per_epoch)
                    .stage(TrainStage::OptimizerStep)?,
            )
        } else {
            None
        };

        Ok(StepOutcome {
            cover,
            message,
            encoded,
            decoded,
            wav_loss,
            msg_loss,
            total_loss,
            d_losses,
        })
    }

    /// Embed, decode and score without touching any parameters.
    fn forward(&self, cover: &Array, message: &Array) -> Result<(Array, Vec<Array>, f32, f32)> {
        let (encoded, _carrier) = self.codec.embed(cover, message, self.global_step)?;
        let decoded = self.codec.decode(&encoded, self.global_step)?;
        let (wav_loss, msg_loss) = self
            .losses
            .en_de_loss(cover, &encoded, message, &decoded)?;
        let encoded = mlx_rs::stop_gradient(&encoded)?;
        mlx_rs::transforms::eval(
            std::iter::once(&encoded)
                .chain(decoded.iter())
                .chain([&wav_loss, &msg_loss]),
        )?;
        Ok((encoded, decoded, wav_loss.item(), msg_loss.item()))
    }

    /// Update the discriminator on cover (label 1) and watermarked (label 0).
    ///
    /// Returns `(d_loss_on_encoded, d_loss_on_cover)` from the pass the
    /// gradients were taken on, i.e. with the weights before the update.
    fn discriminator_step(
        &mut self,
        cover: &Array,
        encoded: &Array,
        global_step: usize,
        steps_per_epoch: usize,
    ) -> Result<(f32, f32)> {
        let detached = mlx_rs::stop_gradient(encoded)?;

        let mut terms: Option<(Array, Array)> = None;
        let (_, grads) = {
            let terms = &mut terms;
            let loss_fn = |disc: &mut Discriminator,
                           (cover, encoded): (&Array, &Array)|
             -> std::result::Result<Array, Exception> {
                let on_cover = bce_with_logits(&disc.forward(cover)?, COVER_LABEL)?;
                let on_encoded = bce_with_logits(&disc.forward(encoded)?, WATERMARKED_LABEL)?;
                let total = on_cover.add(&on_encoded)?;
                *terms = Some((on_encoded, on_cover));
                Ok(total)
            };
            let mut loss_and_grad_fn = nn::value_and_grad(loss_fn);
            loss_and_grad_fn(&mut self.discriminator, (cover, &detached))?
        };
        let (on_encoded, on_cover) = terms.ok_or_else(|| {
            TrainerError::from(Exception::custom("discriminator pass produced no outputs"))
        })?;
        mlx_rs::transforms::eval([&on_encoded, &on_cover])?;
        let losses = (on_encoded.item::<f32>(), on_cover.item::<f32>());

        self.discriminator_optimizer
            .step(&mut self.discriminator, &grads, global_step, steps_per_epoch)?;
        Ok(losses)
    }

    /// `(g_loss_adv, d_loss_on_encoded, d_loss_on_cover)` with the current
    /// weights. Both encoded-side terms score the same logits.
    fn adversarial_losses(&self, cover: &Array, encoded: &Array) -> Result<(f32, f32, f32)> {
        let encoded_logits = self.discriminator.forward(encoded)?;
        let g_loss_adv = bce_with_logits(&encoded_logits, COVER_LABEL)?;
        let on_encoded = bce_with_logits(&encoded_logits, WATERMARKED_LABEL)?;
        let on_cover = bce_with_logits(&self.discriminator.forward(cover)?, COVER_LABEL)?;
        mlx_rs::transforms::eval([&g_loss_adv, &on_encoded, &on_cover])?;
        Ok((g_loss_adv.item(), on_encoded.item(), on_cover.item()))
    }

    /// Instrumentation for a finished step.
    pub fn step_metrics(
        &self,
        epoch: usize,
        step: usize,
        batch: &Batch,
        outcome: &StepOutcome,
    ) -> Result<StepMetrics> {
        let acc = outcome
            .decoded
            .iter()
            .map(|d| bit_accuracy(d, &outcome.message))
            .collect::<Result<Vec<_>>>()?;
        Ok(StepMetrics {
            epoch,
            step,
            global_step: self.global_step,
            wav_loss: outcome.wav_loss,
            msg_loss: outcome.msg_loss,
            acc,
            snr: snr_db(&outcome.cover, &outcome.encoded)?,
            norm: mean_power(&outcome.cover)?,
            patch_num: batch.patch_num.first().copied().unwrap_or(0),
            pad_num: batch.pad_num.first().copied().unwrap_or(0),
            wav_len: batch.shape[1],
            lr: self.codec_optimizer.learning_rate(),
            d_loss_on_encoded: outcome.d_losses.map(|(e, _)| e),
            d_loss_on_cover: outcome.d_losses.map(|(_, c)| c),
        })
    }

    /// Full pass over the validation loader with no parameter updates.
    pub fn validate(&mut self) -> Result<ValidationMetrics> {
        let adv = self.config.train.adv;
        let mut totals = MetricAccumulator::default();

        for batch in self.val_loader.epoch(self.epoch) {
            let batch = batch.stage(TrainStage::DataLoading)?;
            let cover = Array::from_slice(&batch.data, &batch.dims());
            let message = self.sampler.sample(batch.batch_size);

            let (encoded, decoded, wav_loss, msg_loss) = self
                .forward(&cover, &message)
                .stage(TrainStage::Validation)?;
            let acc = decoded
                .iter()
                .map(|d| bit_accuracy(d, &message))
                .collect::<Result<Vec<_>>>()
                .stage(TrainStage::Validation)?;
            let snr = snr_db(&cover, &encoded).stage(TrainStage::Validation)?;
            totals.push(wav_loss, msg_loss, &acc, snr);

            if adv {
                let (g_loss_adv, on_encoded, on_cover) = self
                    .adversarial_losses(&cover, &encoded)
                    .stage(TrainStage::Validation)?;
                tracing::debug!(g_loss_adv, "validation generator adversarial loss");
                totals.push_discriminator(on_encoded, on_cover);
            }
        }

        Ok(totals.finish(self.epoch))
    }

    /// Snapshot codec, optimizers and progress under `step_<global_step>`.
    pub fn save_checkpoint(&self) -> Result<PathBuf> {
        let adv = self.config.train.adv;
        let metadata = CheckpointMetadata {
            epoch: self.epoch,
            global_step: self.global_step,
            codec_lr: self.codec_optimizer.learning_rate(),
            codec_scheduler_steps: self.codec_optimizer.scheduler_steps(),
            discriminator_lr: adv.then(|| self.discriminator_optimizer.learning_rate()),
            discriminator_scheduler_steps: adv
                .then(|| self.discriminator_optimizer.scheduler_steps()),
            msg_length: self.sampler.length(),
            pipeline: self.pipeline.to_string(),
            seed: self.config.train.seed,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        let discriminator = adv.then_some(SaveTarget {
            model: &self.discriminator,
            optimizer: &self.discriminator_optimizer,
        });
        self.checkpoints.save(
            SaveTarget {
                model: &self.codec,
                optimizer: &self.codec_optimizer,
            },
            discriminator,
            &metadata,
        )
    }

    /// Reseed the message sampler.
    pub fn reseed_messages(&mut self, seed: u64) {
        self.sampler = MessageSampler::new(seed, self.sampler.length());
    }

    /// Advance the global step counter without training, as the loop does
    /// before each step.
    pub fn advance_step(&mut self) -> usize {
        self.global_step += 1;
        self.global_step
    }

    /// Current orchestrator state.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Pipeline this run trains.
    #[must_use]
    pub fn pipeline(&self) -> Pipeline {
        self.pipeline
    }

    /// Last started epoch (0 before training).
    #[must_use]
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Global step.
    #[must_use]
    pub fn global_step(&self) -> usize {
        self.global_step
    }

    /// The codec.
    #[must_use]
    pub fn codec(&self) -> &WatermarkCodec {
        &self.codec
    }

    /// The discriminator.
    #[must_use]
    pub fn discriminator(&self) -> &Discriminator {
        &self.discriminator
    }

    /// The codec optimizer.
    #[must_use]
    pub fn codec_optimizer(&self) -> &ScheduledOptimizer {
        &self.codec_optimizer
    }

    /// The training loader.
    #[must_use]
    pub fn train_loader(&self) -> &DataLoader {
        &self.train_loader
    }

    /// The validation loader.
    #[must_use]
    pub fn val_loader(&self) -> &DataLoader {
        &self.val_loader
    }

    /// The checkpoint manager.
    #[must_use]
    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    /// Flattened parameter count of the codec.
    #[must_use]
    pub fn codec_parameter_count(&self) -> usize {
        self.codec.parameters().flatten().len()
    }
}
