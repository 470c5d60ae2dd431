//! Core types, configuration, and error handling for vocmark.
//!
//! This crate holds the pieces every other vocmark crate agrees on:
//!
//! - The error taxonomy ([`VocmarkError`]) used across data loading, training
//!   and checkpointing
//! - The three YAML configuration documents (process, model, train)
//! - The closed set of model/dataset pipelines selected at startup
//! - The step-decay learning rate schedule
//! - Training callback hooks and metric records

#![warn(missing_docs)]

mod config;
mod error;
pub mod scheduler;
mod traits;
mod types;

pub use config::*;
pub use error::*;
pub use scheduler::StepDecay;
pub use traits::*;
pub use types::*;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::*;
    pub use crate::error::{Result, VocmarkError};
    pub use crate::scheduler::StepDecay;
    pub use crate::traits::*;
    pub use crate::types::*;
}
