//! End-to-end loading: WAV files on disk to collated spectrogram batches.

use std::sync::Arc;
use std::time::Duration;

use vocmark_core::VocmarkError;
use vocmark_data::{
    write_wav, DataLoader, DataLoaderConfig, PairedAudioDataset, SpectrogramDataset,
    SpectrogramTransform, WatermarkDataset, DISTORTED_DIR, GROUND_TRUTH_DIR,
};

fn tone(len: usize, step: f32) -> Vec<f32> {
    (0..len).map(|i| (i as f32 * step).sin() * 0.4).collect()
}

fn transform() -> Arc<SpectrogramTransform> {
    Arc::new(SpectrogramTransform::new(1024, 256, 1024).unwrap())
}

#[test]
fn test_mixed_lengths_batch_to_uniform_shape() {
    let dir = tempfile::tempdir().unwrap();
    write_wav(&dir.path().join("a.wav"), &tone(8000, 0.01), 22050).unwrap();
    write_wav(&dir.path().join("b.wav"), &tone(40000, 0.02), 22050).unwrap();
    write_wav(&dir.path().join("c.wav"), &tone(200_000, 0.03), 22050).unwrap();

    let dataset = SpectrogramDataset::new(dir.path(), transform(), 22050).unwrap();
    let config = DataLoaderConfig {
        batch_size: 2,
        shuffle: true,
        seed: 11,
        num_workers: 2,
        prefetch: 1,
        timeout: Duration::from_secs(30),
    };
    let loader = DataLoader::new(Arc::new(dataset), config).unwrap();
    assert_eq!(loader.num_batches(), 2);

    let batches: Vec<_> = loader.epoch(1).collect::<Result<_, _>>().unwrap();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].dims(), [2, 512, 512]);
    assert_eq!(batches[1].dims(), [1, 512, 512]);
    assert_eq!(batches[0].data.len(), 2 * 512 * 512);

    let mut names: Vec<String> = batches.iter().flat_map(|b| b.names.clone()).collect();
    names.sort();
    assert_eq!(names, vec!["a.wav", "b.wav", "c.wav"]);
}

#[test]
fn test_missing_pair_aborts_the_epoch() {
    let root = tempfile::tempdir().unwrap();
    let distorted = root.path().join(DISTORTED_DIR);
    let gt = root.path().join(GROUND_TRUTH_DIR);
    std::fs::create_dir_all(&distorted).unwrap();
    std::fs::create_dir_all(&gt).unwrap();
    for name in ["0.wav", "1.wav", "2.wav"] {
        write_wav(&distorted.join(name), &tone(4000, 0.05), 22050).unwrap();
    }
    write_wav(&gt.join("0.wav"), &tone(4000, 0.05), 22050).unwrap();
    write_wav(&gt.join("1.wav"), &tone(4000, 0.05), 22050).unwrap();

    let dataset = PairedAudioDataset::train(root.path(), transform(), 22050).unwrap();
    assert_eq!(WatermarkDataset::len(&dataset), 3);

    let config = DataLoaderConfig {
        batch_size: 1,
        ..Default::default()
    };
    let loader = DataLoader::new(Arc::new(dataset), config).unwrap();
    let results: Vec<_> = loader.epoch(1).collect();
    assert!(results[0].is_ok());
    assert!(results[1].is_ok());
    assert!(matches!(results[2], Err(VocmarkError::Pairing { .. })));
}
