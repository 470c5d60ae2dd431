//! Trainer error types.

use mlx_rs::error::Exception;
use thiserror::Error;
use vocmark_core::VocmarkError;
use vocmark_models::ModelError;

/// Result type for training operations.
pub type Result<T> = std::result::Result<T, TrainerError>;

/// Stage of the training loop an error surfaced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainStage {
    /// Reading and collating batches.
    DataLoading,
    /// Embedding, decoding or loss computation.
    ForwardPass,
    /// Gradient computation and parameter update.
    OptimizerStep,
    /// Writing a checkpoint.
    CheckpointWrite,
    /// Reading a checkpoint to resume from.
    CheckpointLoad,
    /// The no-grad validation pass.
    Validation,
}

impl std::fmt::Display for TrainStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::DataLoading => "data loading",
            Self::ForwardPass => "forward pass",
            Self::OptimizerStep => "optimizer step",
            Self::CheckpointWrite => "checkpoint write",
            Self::CheckpointLoad => "checkpoint load",
            Self::Validation => "validation",
        };
        f.write_str(name)
    }
}

/// Training error.
#[derive(Error, Debug)]
pub enum TrainerError {
    /// MLX error.
    #[error("MLX error: {0}")]
    Mlx(Exception),
    /// Data or configuration error.
    #[error(transparent)]
    Core(#[from] VocmarkError),
    /// Model construction or forward error.
    #[error("Model error: {0}")]
    Model(#[from] ModelError),
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// A failure attributed to a stage of the loop.
    #[error("{stage} failed: {source}")]
    Stage {
        /// Where it happened.
        stage: TrainStage,
        /// The underlying error.
        #[source]
        source: Box<TrainerError>,
    },
}

/// Allocation failures are reported as resource exhaustion, everything else
/// stays an MLX error.
impl From<Exception> for TrainerError {
    fn from(err: Exception) -> Self {
        let text = err.to_string();
        let lower = text.to_lowercase();
        if lower.contains("out of memory") || lower.contains("insufficient memory") {
            Self::Core(VocmarkError::ResourceExhaustion(text))
        } else {
            Self::Mlx(err)
        }
    }
}

impl TrainerError {
    /// Attribute this error to `stage`. Errors already attributed keep their stage.
    #[must_use]
    pub fn in_stage(self, stage: TrainStage) -> Self {
        match self {
            Self::Stage { .. } => self,
            other => Self::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The stage this error was attributed to, if any.
    #[must_use]
    pub fn stage(&self) -> Option<TrainStage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The error beneath any stage attribution.
    #[must_use]
    pub fn root(&self) -> &TrainerError {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// The data/configuration error beneath any stage attribution, if that
    /// is what failed.
    #[must_use]
    pub fn core(&self) -> Option<&VocmarkError> {
        match self.root() {
            Self::Core(err) => Some(err),
            _ => None,
        }
    }

    /// Whether the underlying failure is a missing paired file.
    #[must_use]
    pub fn is_pairing(&self) -> bool {
        matches!(self.core(), Some(VocmarkError::Pairing { .. }))
    }

    /// Whether the underlying failure is device or host memory exhaustion.
    #[must_use]
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self.core(), Some(VocmarkError::ResourceExhaustion(_)))
    }
}

/// Attach a stage to any error convertible into [`TrainerError`].
pub trait StageExt<T> {
    /// Map the error into a [`TrainerError::Stage`].
    fn stage(self, stage: TrainStage) -> Result<T>;
}

impl<T, E: Into<TrainerError>> StageExt<T> for std::result::Result<T, E> {
    fn stage(self, stage: TrainStage) -> Result<T> {
        self.map_err(|e| e.into().in_stage(stage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_is_named_in_message() {
        let err = TrainerError::from(VocmarkError::Config("bad".into()))
            .in_stage(TrainStage::DataLoading);
        assert_eq!(err.stage(), Some(TrainStage::DataLoading));
        assert!(err.to_string().starts_with("data loading failed"));
    }

    #[test]
    fn test_first_stage_wins() {
        let err = TrainerError::from(std::io::Error::other("disk"))
            .in_stage(TrainStage::CheckpointWrite)
            .in_stage(TrainStage::Validation);
        assert_eq!(err.stage(), Some(TrainStage::CheckpointWrite));
    }

    #[test]
    fn test_out_of_memory_is_resource_exhaustion() {
        let err = TrainerError::from(Exception::custom("[metal] out of memory"));
        assert!(matches!(
            err,
            TrainerError::Core(VocmarkError::ResourceExhaustion(_))
        ));
        let err = TrainerError::from(Exception::custom("shape mismatch"));
        assert!(matches!(err, TrainerError::Mlx(_)));
    }

    #[test]
    fn test_pairing_survives_staging() {
        let err = TrainerError::from(VocmarkError::Pairing {
            missing: "a.wav".into(),
            counterpart: "GT/a.wav".into(),
        });
        assert!(err.is_pairing());
        let staged = err.in_stage(TrainStage::DataLoading);
        assert!(staged.is_pairing());
        assert!(staged.to_string().starts_with("data loading failed: "));
        match staged.core() {
            Some(VocmarkError::Pairing { missing, counterpart }) => {
                assert_eq!(missing, &std::path::PathBuf::from("a.wav"));
                assert_eq!(counterpart, &std::path::PathBuf::from("GT/a.wav"));
            }
            other => panic!("expected a pairing error, got {other:?}"),
        }
    }

    #[test]
    fn test_staged_error_keeps_typed_source() {
        use std::error::Error as _;

        let err = TrainerError::from(Exception::custom("insufficient memory for buffer"))
            .in_stage(TrainStage::ForwardPass);
        assert!(err.is_resource_exhaustion());
        assert!(!err.is_pairing());
        assert!(matches!(
            err.root(),
            TrainerError::Core(VocmarkError::ResourceExhaustion(_))
        ));
        let source = err.source().map(ToString::to_string).unwrap_or_default();
        assert!(source.contains("insufficient memory"));

        let config = TrainerError::from(VocmarkError::Config("bad".into()))
            .in_stage(TrainStage::CheckpointLoad);
        assert!(matches!(config.core(), Some(VocmarkError::Config(_))));
        assert!(config.to_string().starts_with("checkpoint load failed"));
    }
}
