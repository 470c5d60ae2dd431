//! Neural networks for vocmark.
//!
//! - [`WatermarkCodec`]: message encoder and multi-stage decoder
//! - [`Discriminator`]: cover-vs-watermarked critic
//! - [`build_models`]: family-aware construction from configs

#![warn(missing_docs)]

pub mod codec;
pub mod discriminator;
pub mod error;
pub mod family;
pub mod nn;

pub use codec::{CodecConfig, Distortion, WatermarkCodec};
pub use discriminator::Discriminator;
pub use error::{ModelError, Result};
pub use family::{build_models, ModelBundle};
