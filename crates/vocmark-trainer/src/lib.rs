//! Training for vocmark.
//!
//! This crate provides:
//! - [`WatermarkTrainer`], the epoch/step orchestrator
//! - [`ScheduledOptimizer`]: AdamW with step decay
//! - [`LossComposer`]: fidelity and message losses, the warm-up phase gate,
//!   and the adversarial BCE terms
//! - Bit accuracy and SNR instrumentation
//! - Atomic checkpoints and resume
//! - Training callbacks

#![warn(missing_docs)]

pub mod callbacks;
pub mod checkpoint;
pub mod error;
pub mod loss;
pub mod message;
pub mod metrics;
pub mod optimizer;
pub mod pipeline;
pub mod trainer;

pub use callbacks::*;
pub use checkpoint::*;
pub use error::*;
pub use loss::*;
pub use message::*;
pub use metrics::*;
pub use optimizer::*;
pub use pipeline::*;
pub use trainer::*;
