//! Datasets yielding fixed-shape watermarking samples.
//!
//! Every dataset implements [`WatermarkDataset`], which hands out
//! [`WatermarkSample`]s as plain `f32` buffers so items can be built on
//! loader threads. Tensor conversion happens on the training thread.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use vocmark_core::{Result, VocmarkError, SPEC_BINS, SPEC_FRAMES};

use crate::audio::{list_wavs, read_wav, scan_audio_dir};
use crate::spectrogram::SpectrogramTransform;

/// Subdirectory of a training root holding distorted (self-vocoded) audio.
pub const DISTORTED_DIR: &str = "self_vocoded";

/// Subdirectory of a training root holding ground-truth audio.
pub const GROUND_TRUTH_DIR: &str = "GT";

/// One cover item ready for batching.
#[derive(Debug, Clone)]
pub struct WatermarkSample {
    /// Row-major `[shape[0], shape[1]]` values.
    pub matrix: Vec<f32>,
    /// `[channels, length]`.
    pub shape: [usize; 2],
    /// How many segments (waveform) or raw frames (spectrogram) the source spans.
    pub patch_num: usize,
    /// Zero padding appended on the last axis.
    pub pad_num: usize,
    /// Source file name.
    pub name: String,
}

/// A dataset of cover samples with a uniform shape.
pub trait WatermarkDataset: Send + Sync {
    /// Number of items.
    fn len(&self) -> usize;

    /// Whether the dataset is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load item `index`.
    fn sample(&self, index: usize) -> Result<WatermarkSample>;

    /// `[channels, length]` of every sample.
    fn sample_shape(&self) -> [usize; 2];
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn non_empty(files: Vec<PathBuf>, dir: &Path) -> Result<Vec<PathBuf>> {
    if files.is_empty() {
        return Err(VocmarkError::Config(format!(
            "no .wav files found in {}",
            dir.display()
        )));
    }
    Ok(files)
}

fn read_checked(path: &Path, sample_rate: u32) -> Result<Vec<f32>> {
    let (samples, sr) = read_wav(path)?;
    if sr != sample_rate {
        tracing::debug!(
            path = %path.display(),
            file_rate = sr,
            expected_rate = sample_rate,
            "sample rate differs from process config"
        );
    }
    Ok(samples)
}

/// Raw waveform segments of `max_len` samples.
///
/// Longer audio keeps its first segment and reports how many segments it
/// spans. Shorter audio is zero-padded on the right.
#[derive(Debug, Clone)]
pub struct WaveDataset {
    files: Vec<PathBuf>,
    max_len: usize,
    sample_rate: u32,
}

impl WaveDataset {
    /// Enumerate every `.wav` file in `dir`.
    pub fn new(dir: &Path, max_len: usize, sample_rate: u32) -> Result<Self> {
        if max_len == 0 {
            return Err(VocmarkError::Config("max_len must be positive".into()));
        }
        let files = non_empty(list_wavs(dir)?, dir)?;
        tracing::info!(dir = %dir.display(), files = files.len(), "waveform dataset");
        Ok(Self {
            files,
            max_len,
            sample_rate,
        })
    }

    /// Segment a waveform. Returns `(segment, patch_num, pad_num)`.
    #[must_use]
    pub fn segment(&self, samples: &[f32]) -> (Vec<f32>, usize, usize) {
        let len = samples.len();
        if len >= self.max_len {
            let patches = len.div_ceil(self.max_len);
            (samples[..self.max_len].to_vec(), patches, 0)
        } else {
            let mut padded = samples.to_vec();
            padded.resize(self.max_len, 0.0);
            (padded, 1, self.max_len - len)
        }
    }
}

impl WatermarkDataset for WaveDataset {
    fn len(&self) -> usize {
        self.files.len()
    }

    fn sample(&self, index: usize) -> Result<WatermarkSample> {
        let path = self.files.get(index).ok_or_else(|| {
            VocmarkError::InvalidArgument(format!("index {index} out of range"))
        })?;
        let samples = read_checked(path, self.sample_rate)?;
        let (matrix, patch_num, pad_num) = self.segment(&samples);
        Ok(WatermarkSample {
            matrix,
            shape: [1, self.max_len],
            patch_num,
            pad_num,
            name: file_name(path),
        })
    }

    fn sample_shape(&self) -> [usize; 2] {
        [1, self.max_len]
    }
}

/// Fixed-shape magnitude spectrograms of every `.wav` file in a directory.
#[derive(Debug, Clone)]
pub struct SpectrogramDataset {
    files: Vec<PathBuf>,
    transform: Arc<SpectrogramTransform>,
    sample_rate: u32,
}

impl SpectrogramDataset {
    /// Enumerate every `.wav` file in `dir`.
    pub fn new(dir: &Path, transform: Arc<SpectrogramTransform>, sample_rate: u32) -> Result<Self> {
        let files = non_empty(list_wavs(dir)?, dir)?;
        tracing::info!(dir = %dir.display(), files = files.len(), "spectrogram dataset");
        Ok(Self {
            files,
            transform,
            sample_rate,
        })
    }
}

impl WatermarkDataset for SpectrogramDataset {
    fn len(&self) -> usize {
        self.files.len()
    }

    fn sample(&self, index: usize) -> Result<WatermarkSample> {
        let path = self.files.get(index).ok_or_else(|| {
            VocmarkError::InvalidArgument(format!("index {index} out of range"))
        })?;
        let fixed = self.transform.fixed(&read_checked(path, self.sample_rate)?)?;
        Ok(WatermarkSample {
            matrix: fixed.magnitude,
            shape: [SPEC_BINS, SPEC_FRAMES],
            patch_num: fixed.raw_frames,
            pad_num: fixed.pad_frames,
            name: file_name(path),
        })
    }

    fn sample_shape(&self) -> [usize; 2] {
        [SPEC_BINS, SPEC_FRAMES]
    }
}

/// A distorted file and its positional ground-truth counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPair {
    /// Distorted (or cover) audio.
    pub distorted: PathBuf,
    /// Ground-truth audio with the same file name.
    pub ground_truth: PathBuf,
}

/// Both sides of a pair, each normalized to `[SPEC_BINS, SPEC_FRAMES]`.
///
/// A and B are cropped/padded independently, so frames line up only when
/// both files have the same length.
#[derive(Debug, Clone)]
pub struct PairedItem {
    /// Distorted magnitude.
    pub a: Vec<f32>,
    /// Ground-truth magnitude.
    pub b: Vec<f32>,
    /// Distorted path.
    pub a_path: PathBuf,
    /// Ground-truth path.
    pub b_path: PathBuf,
    /// Raw frame count of A.
    pub a_frames: usize,
    /// Zero frames appended to A.
    pub a_pad: usize,
}

/// Positionally paired `(distorted, ground truth)` spectrogram dataset.
///
/// Pairing is by file name only. A missing counterpart is not detected at
/// construction; it surfaces as a pairing error when the item is read.
#[derive(Debug, Clone)]
pub struct PairedAudioDataset {
    pairs: Vec<AudioPair>,
    skipped: Vec<PathBuf>,
    transform: Arc<SpectrogramTransform>,
    sample_rate: u32,
}

impl PairedAudioDataset {
    /// Training layout: `<root>/self_vocoded/*` paired with `<root>/GT/*`.
    pub fn train(
        root: &Path,
        transform: Arc<SpectrogramTransform>,
        sample_rate: u32,
    ) -> Result<Self> {
        Self::from_dirs(
            &root.join(DISTORTED_DIR),
            &root.join(GROUND_TRUTH_DIR),
            transform,
            sample_rate,
        )
    }

    /// Evaluation layout: independently supplied distorted and ground-truth roots.
    pub fn eval(
        distorted: &Path,
        ground_truth: &Path,
        transform: Arc<SpectrogramTransform>,
        sample_rate: u32,
    ) -> Result<Self> {
        Self::from_dirs(distorted, ground_truth, transform, sample_rate)
    }

    fn from_dirs(
        distorted: &Path,
        ground_truth: &Path,
        transform: Arc<SpectrogramTransform>,
        sample_rate: u32,
    ) -> Result<Self> {
        let listing = scan_audio_dir(distorted)?;
        let files = non_empty(listing.files, distorted)?;
        let pairs: Vec<AudioPair> = files
            .into_iter()
            .map(|path| {
                let counterpart = ground_truth.join(path.file_name().unwrap_or_default());
                AudioPair {
                    distorted: path,
                    ground_truth: counterpart,
                }
            })
            .collect();
        tracing::info!(
            distorted = %distorted.display(),
            ground_truth = %ground_truth.display(),
            pairs = pairs.len(),
            skipped = listing.skipped.len(),
            "paired dataset"
        );
        Ok(Self {
            pairs,
            skipped: listing.skipped,
            transform,
            sample_rate,
        })
    }

    /// Number of pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether there are no pairs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Enumerated pairs.
    #[must_use]
    pub fn pairs(&self) -> &[AudioPair] {
        &self.pairs
    }

    /// Non-wav files in the distorted directory that were left out.
    #[must_use]
    pub fn skipped(&self) -> &[PathBuf] {
        &self.skipped
    }

    /// Load and normalize both sides of pair `index`.
    pub fn item(&self, index: usize) -> Result<PairedItem> {
        let pair = self.pairs.get(index).ok_or_else(|| {
            VocmarkError::InvalidArgument(format!("index {index} out of range"))
        })?;
        if !pair.ground_truth.is_file() {
            return Err(VocmarkError::Pairing {
                missing: pair.distorted.clone(),
                counterpart: pair.ground_truth.clone(),
            });
        }

        let wav_a = read_checked(&pair.distorted, self.sample_rate)?;
        let wav_b = read_checked(&pair.ground_truth, self.sample_rate)?;
        let a = self.transform.fixed(&wav_a)?;
        let b = self.transform.fixed(&wav_b)?;

        Ok(PairedItem {
            a: a.magnitude,
            b: b.magnitude,
            a_path: pair.distorted.clone(),
            b_path: pair.ground_truth.clone(),
            a_frames: a.raw_frames,
            a_pad: a.pad_frames,
        })
    }
}

impl WatermarkDataset for PairedAudioDataset {
    fn len(&self) -> usize {
        self.pairs.len()
    }

    /// The distorted side is the cover. Loading B still enforces pairing.
    fn sample(&self, index: usize) -> Result<WatermarkSample> {
        let item = self.item(index)?;
        Ok(WatermarkSample {
            name: file_name(&item.a_path),
            matrix: item.a,
            shape: [SPEC_BINS, SPEC_FRAMES],
            patch_num: item.a_frames,
            pad_num: item.a_pad,
        })
    }

    fn sample_shape(&self) -> [usize; 2] {
        [SPEC_BINS, SPEC_FRAMES]
    }
}
