//! Audio data handling for vocmark.
//!
//! This crate provides:
//! - WAV reading and writing
//! - The fixed-shape spectrogram contract (STFT, 513 -> 512 bins, 512 frames)
//! - Waveform, spectrogram and paired datasets behind one sample trait
//! - A seeded DataLoader with optional worker-thread prefetch

#![warn(missing_docs)]

pub mod audio;
pub mod dataloader;
pub mod dataset;
pub mod spectrogram;

pub use audio::*;
pub use dataloader::*;
pub use dataset::*;
pub use spectrogram::*;
