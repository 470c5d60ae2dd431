//! WAV file I/O.

use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use vocmark_core::{Result, VocmarkError};

/// Read a WAV file as mono `f32` samples in `[-1, 1]`.
///
/// Multi-channel files are averaged down to one channel.
pub fn read_wav(path: &Path) -> Result<(Vec<f32>, u32)> {
    let reader = WavReader::open(path)
        .map_err(|e| VocmarkError::Audio(format!("{}: {}", path.display(), e)))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<hound::Result<Vec<f32>>>()
            .map_err(|e| VocmarkError::Audio(format!("{}: {}", path.display(), e)))?,
        SampleFormat::Int => {
            let max_val = (1u32 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<hound::Result<Vec<f32>>>()
                .map_err(|e| VocmarkError::Audio(format!("{}: {}", path.display(), e)))?
        }
    };

    let channels = spec.channels.max(1) as usize;
    if channels == 1 {
        return Ok((interleaved, spec.sample_rate));
    }
    let mono = interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

/// Write mono `f32` samples as a 32-bit float WAV file.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec)
        .map_err(|e| VocmarkError::Audio(format!("{}: {}", path.display(), e)))?;
    for &s in samples {
        writer
            .write_sample(s)
            .map_err(|e| VocmarkError::Audio(format!("{}: {}", path.display(), e)))?;
    }
    writer
        .finalize()
        .map_err(|e| VocmarkError::Audio(format!("{}: {}", path.display(), e)))
}

/// Regular files found directly inside an audio directory.
#[derive(Debug, Clone, Default)]
pub struct AudioListing {
    /// `.wav` files, sorted by file name.
    pub files: Vec<PathBuf>,
    /// Other regular files, sorted by file name. These are never loaded.
    pub skipped: Vec<PathBuf>,
}

/// Scan `dir` for `.wav` files. Every other regular file is logged and
/// reported in [`AudioListing::skipped`].
pub fn scan_audio_dir(dir: &Path) -> Result<AudioListing> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        VocmarkError::Config(format!("cannot read audio directory {}: {}", dir.display(), e))
    })?;

    let mut listing = AudioListing::default();
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let is_wav = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("wav"));
        if is_wav {
            listing.files.push(path);
        } else {
            tracing::warn!(path = %path.display(), "skipping non-wav file");
            listing.skipped.push(path);
        }
    }
    listing.files.sort();
    listing.skipped.sort();
    Ok(listing)
}

/// List the `.wav` files directly inside `dir`, sorted by file name.
pub fn list_wavs(dir: &Path) -> Result<Vec<PathBuf>> {
    Ok(scan_audio_dir(dir)?.files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read_mono() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let samples: Vec<f32> = (0..100).map(|i| (i as f32 * 0.1).sin() * 0.5).collect();
        write_wav(&path, &samples, 16000).unwrap();

        let (read, sr) = read_wav(&path).unwrap();
        assert_eq!(sr, 16000);
        assert_eq!(read.len(), 100);
        assert!((read[10] - samples[10]).abs() < 1e-6);
    }

    #[test]
    fn test_stereo_is_averaged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for _ in 0..10 {
            writer.write_sample(16384i16).unwrap();
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let (mono, _) = read_wav(&path).unwrap();
        assert_eq!(mono.len(), 10);
        assert!((mono[0] - 0.25).abs() < 1e-4);
    }

    #[test]
    fn test_list_wavs_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.wav", "a.WAV", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let files = list_wavs(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.WAV", "b.wav"]);

        std::fs::create_dir(dir.path().join("nested")).unwrap();
        let listing = scan_audio_dir(dir.path()).unwrap();
        assert_eq!(listing.files.len(), 2);
        assert_eq!(listing.skipped, vec![dir.path().join("notes.txt")]);
    }

    #[test]
    fn test_missing_file_is_audio_error() {
        let err = read_wav(Path::new("/nonexistent/file.wav")).unwrap_err();
        assert!(matches!(err, VocmarkError::Audio(_)));
    }
}
