//! Core trait definitions.

use crate::{StepMetrics, ValidationMetrics};
use std::path::Path;

/// Callback hooks invoked by the training orchestrator.
///
/// Callbacks observe training; they never mutate model or optimizer state.
pub trait TrainingCallback: Send + Sync {
    /// Called once before the first epoch.
    fn on_train_start(&mut self, _total_epochs: usize, _steps_per_epoch: usize) {}

    /// Called once after the last epoch.
    fn on_train_end(&mut self) {}

    /// Called at the start of each epoch.
    fn on_epoch_start(&mut self, _epoch: usize) {}

    /// Called after every training step.
    fn on_step_end(&mut self, _global_step: usize) {}

    /// Called every `show_circle` steps with the step instrumentation.
    fn on_step_metrics(&mut self, _metrics: &StepMetrics) {}

    /// Called after the validation pass of each epoch.
    fn on_epoch_end(&mut self, _epoch: usize, _metrics: &ValidationMetrics) {}

    /// Called when a checkpoint is saved.
    fn on_save(&mut self, _path: &Path) {}
}
