//! Training callbacks for monitoring and logging.
//!
//! - [`ProgressCallback`] - per-epoch progress bar
//! - [`LoggingCallback`] - step and validation lines through `tracing`
//! - [`MetricsJsonCallback`] - JSONL logs under `<log_path>/train` and `<log_path>/val`
//! - [`CompositeCallback`] - fan-out to several callbacks

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use vocmark_core::{StepMetrics, TrainingCallback, ValidationMetrics};

/// Progress bar over the steps of the current epoch.
pub struct ProgressCallback {
    progress: Option<indicatif::ProgressBar>,
    steps_per_epoch: usize,
    total_epochs: usize,
}

impl ProgressCallback {
    /// Create a new progress callback.
    pub fn new() -> Self {
        Self {
            progress: None,
            steps_per_epoch: 0,
            total_epochs: 0,
        }
    }
}

impl Default for ProgressCallback {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingCallback for ProgressCallback {
    fn on_train_start(&mut self, total_epochs: usize, steps_per_epoch: usize) {
        self.total_epochs = total_epochs;
        self.steps_per_epoch = steps_per_epoch;
    }

    fn on_epoch_start(&mut self, epoch: usize) {
        let bar = indicatif::ProgressBar::new(self.steps_per_epoch as u64);
        if let Ok(style) = indicatif::ProgressStyle::default_bar().template(
            "{prefix} {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        ) {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.set_prefix(format!("epoch {epoch}/{}", self.total_epochs));
        self.progress = Some(bar);
    }

    fn on_step_end(&mut self, _global_step: usize) {
        if let Some(bar) = &self.progress {
            bar.inc(1);
        }
    }

    fn on_step_metrics(&mut self, metrics: &StepMetrics) {
        if let Some(bar) = &self.progress {
            bar.set_message(format!(
                "wav {:.5} msg {:.5} snr {:.2}",
                metrics.wav_loss, metrics.msg_loss, metrics.snr
            ));
        }
    }

    fn on_epoch_end(&mut self, _epoch: usize, _metrics: &ValidationMetrics) {
        if let Some(bar) = self.progress.take() {
            bar.finish_and_clear();
        }
    }

    fn on_train_end(&mut self) {
        if let Some(bar) = self.progress.take() {
            bar.finish_with_message("Training complete!");
        }
    }
}

/// Emits the step and validation lines.
pub struct LoggingCallback;

impl TrainingCallback for LoggingCallback {
    fn on_epoch_start(&mut self, epoch: usize) {
        tracing::info!(epoch, "Epoch start");
    }

    fn on_step_metrics(&mut self, m: &StepMetrics) {
        match (m.d_loss_on_encoded, m.d_loss_on_cover) {
            (Some(on_encoded), Some(on_cover)) => tracing::info!(
                step = m.step,
                global_step = m.global_step,
                wav_loss = m.wav_loss,
                msg_loss = m.msg_loss,
                acc = ?m.acc,
                snr = m.snr,
                norm = m.norm,
                patch_num = m.patch_num,
                pad_num = m.pad_num,
                wav_len = m.wav_len,
                d_loss_on_encoded = on_encoded,
                d_loss_on_cover = on_cover,
                "Training step"
            ),
            _ => tracing::info!(
                step = m.step,
                global_step = m.global_step,
                wav_loss = m.wav_loss,
                msg_loss = m.msg_loss,
                acc = ?m.acc,
                snr = m.snr,
                norm = m.norm,
                patch_num = m.patch_num,
                pad_num = m.pad_num,
                wav_len = m.wav_len,
                "Training step"
            ),
        }
    }

    fn on_epoch_end(&mut self, epoch: usize, m: &ValidationMetrics) {
        tracing::info!(
            epoch,
            wav_loss = m.wav_loss,
            msg_loss = m.msg_loss,
            acc = ?m.acc,
            snr = m.snr,
            d_loss_on_encoded = ?m.d_loss_on_encoded,
            d_loss_on_cover = ?m.d_loss_on_cover,
            batches = m.batches,
            "Validation"
        );
    }

    fn on_save(&mut self, path: &Path) {
        tracing::debug!(path = %path.display(), "Checkpoint written");
    }
}

/// JSONL metrics, one file per split.
///
/// ```json
/// {"epoch":1,"step":100,"global_step":100,"wav_loss":0.001,...,"timestamp":"2025-01-01T12:00:00Z"}
/// ```
pub struct MetricsJsonCallback {
    train: BufWriter<File>,
    val: BufWriter<File>,
    train_path: PathBuf,
    val_path: PathBuf,
}

impl MetricsJsonCallback {
    /// Open `<log_path>/train/metrics.jsonl` and `<log_path>/val/metrics.jsonl`.
    ///
    /// # Errors
    ///
    /// Returns an error if either file cannot be created.
    pub fn new(log_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let log_path = log_path.as_ref();
        let train_path = log_path.join("train").join("metrics.jsonl");
        let val_path = log_path.join("val").join("metrics.jsonl");
        Ok(Self {
            train: open_append(&train_path)?,
            val: open_append(&val_path)?,
            train_path,
            val_path,
        })
    }

    /// Path of the training log.
    pub fn train_path(&self) -> &Path {
        &self.train_path
    }

    /// Path of the validation log.
    pub fn val_path(&self) -> &Path {
        &self.val_path
    }

    fn write_entry(writer: &mut BufWriter<File>, mut entry: serde_json::Value) {
        entry["timestamp"] = serde_json::json!(chrono::Utc::now().to_rfc3339());
        if let Ok(line) = serde_json::to_string(&entry) {
            let _ = writeln!(writer, "{}", line);
        }
    }
}

fn open_append(path: &Path) -> std::io::Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

impl TrainingCallback for MetricsJsonCallback {
    fn on_train_start(&mut self, total_epochs: usize, steps_per_epoch: usize) {
        Self::write_entry(
            &mut self.train,
            serde_json::json!({
                "event": "train_start",
                "epochs": total_epochs,
                "steps_per_epoch": steps_per_epoch,
            }),
        );
        let _ = self.train.flush();
    }

    fn on_train_end(&mut self) {
        Self::write_entry(&mut self.train, serde_json::json!({ "event": "train_end" }));
        let _ = self.train.flush();
        let _ = self.val.flush();
    }

    fn on_step_metrics(&mut self, metrics: &StepMetrics) {
        if let Ok(entry) = serde_json::to_value(metrics) {
            Self::write_entry(&mut self.train, entry);
        }
        let _ = self.train.flush();
    }

    fn on_epoch_end(&mut self, _epoch: usize, metrics: &ValidationMetrics) {
        if let Ok(entry) = serde_json::to_value(metrics) {
            Self::write_entry(&mut self.val, entry);
        }
        let _ = self.val.flush();
    }

    fn on_save(&mut self, path: &Path) {
        Self::write_entry(
            &mut self.train,
            serde_json::json!({
                "event": "checkpoint_saved",
                "path": path.display().to_string(),
            }),
        );
        let _ = self.train.flush();
    }
}

/// Composite callback that forwards events to multiple callbacks.
pub struct CompositeCallback {
    callbacks: Vec<Box<dyn TrainingCallback>>,
}

impl CompositeCallback {
    /// Create a new empty composite callback.
    pub fn new() -> Self {
        Self {
            callbacks: Vec::new(),
        }
    }

    /// Add a callback to the composite.
    pub fn add(&mut self, callback: Box<dyn TrainingCallback>) {
        self.callbacks.push(callback);
    }

    /// Get the number of callbacks.
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Check if there are no callbacks.
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl Default for CompositeCallback {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingCallback for CompositeCallback {
    fn on_train_start(&mut self, total_epochs: usize, steps_per_epoch: usize) {
        for cb in &mut self.callbacks {
            cb.on_train_start(total_epochs, steps_per_epoch);
        }
    }

    fn on_train_end(&mut self) {
        for cb in &mut self.callbacks {
            cb.on_train_end();
        }
    }

    fn on_epoch_start(&mut self, epoch: usize) {
        for cb in &mut self.callbacks {
            cb.on_epoch_start(epoch);
        }
    }

    fn on_step_end(&mut self, global_step: usize) {
        for cb in &mut self.callbacks {
            cb.on_step_end(global_step);
        }
    }

    fn on_step_metrics(&mut self, metrics: &StepMetrics) {
        for cb in &mut self.callbacks {
            cb.on_step_metrics(metrics);
        }
    }

    fn on_epoch_end(&mut self, epoch: usize, metrics: &ValidationMetrics) {
        for cb in &mut self.callbacks {
            cb.on_epoch_end(epoch, metrics);
        }
    }

    fn on_save(&mut self, path: &Path) {
        for cb in &mut self.callbacks {
            cb.on_save(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl TrainingCallback for Recorder {
        fn on_epoch_start(&mut self, epoch: usize) {
            self.0.lock().unwrap().push(format!("epoch {epoch}"));
        }

        fn on_step_end(&mut self, global_step: usize) {
            self.0.lock().unwrap().push(format!("step {global_step}"));
        }
    }

    #[test]
    fn test_composite_forwards_in_order() {
        let a = Recorder::default();
        let b = Recorder::default();
        let mut composite = CompositeCallback::new();
        composite.add(Box::new(a.clone()));
        composite.add(Box::new(b.clone()));
        assert_eq!(composite.len(), 2);

        composite.on_epoch_start(1);
        composite.on_step_end(1);
        assert_eq!(*a.0.lock().unwrap(), vec!["epoch 1", "step 1"]);
        assert_eq!(*b.0.lock().unwrap(), vec!["epoch 1", "step 1"]);
    }

    #[test]
    fn test_jsonl_split_files() {
        let dir = TempDir::new().unwrap();
        let mut cb = MetricsJsonCallback::new(dir.path()).unwrap();
        cb.on_step_metrics(&StepMetrics {
            epoch: 1,
            step: 5,
            global_step: 5,
            acc: vec![1.0, 0.5],
            ..StepMetrics::default()
        });
        cb.on_epoch_end(
            1,
            &ValidationMetrics {
                epoch: 1,
                batches: 2,
                ..ValidationMetrics::default()
            },
        );
        cb.on_train_end();

        let train = std::fs::read_to_string(cb.train_path()).unwrap();
        let first: serde_json::Value = serde_json::from_str(train.lines().next().unwrap()).unwrap();
        assert_eq!(first["global_step"], 5);
        assert!(first.get("timestamp").is_some());
        assert!(first.get("d_loss_on_cover").is_none());

        let val = std::fs::read_to_string(cb.val_path()).unwrap();
        assert_eq!(val.lines().count(), 1);
        let entry: serde_json::Value = serde_json::from_str(val.trim()).unwrap();
        assert_eq!(entry["batches"], 2);
    }
}
