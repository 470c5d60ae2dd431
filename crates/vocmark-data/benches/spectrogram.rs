//! Benchmarks for fixed-shape spectrogram construction.
//!
//! Run with: cargo bench -p vocmark-data

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use vocmark_data::{normalize, SpectrogramTransform};

/// Generate deterministic test audio.
fn generate_audio(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| (i as f32 * 0.0123).sin() * 0.5 + (i as f32 * 0.377).sin() * 0.1)
        .collect()
}

/// Benchmark the raw STFT against transform + normalization.
fn bench_transform(c: &mut Criterion) {
    let stft = SpectrogramTransform::new(1024, 256, 1024).unwrap();
    let mut group = c.benchmark_group("spectrogram");

    for len in [8000usize, 40000, 200_000].iter() {
        let audio = generate_audio(*len);
        group.throughput(Throughput::Elements(*len as u64));

        group.bench_with_input(BenchmarkId::new("stft", len), len, |b, _| {
            b.iter(|| {
                let _ = stft.transform(black_box(&audio));
            });
        });

        group.bench_with_input(BenchmarkId::new("fixed", len), len, |b, _| {
            b.iter(|| {
                let _ = stft.fixed(black_box(&audio));
            });
        });
    }

    group.finish();
}

/// Benchmark normalization alone.
fn bench_normalize(c: &mut Criterion) {
    let stft = SpectrogramTransform::new(1024, 256, 1024).unwrap();
    let spec = stft.transform(&generate_audio(200_000)).unwrap();

    c.bench_function("normalize_crop", |b| {
        b.iter(|| {
            let _ = normalize(black_box(&spec));
        });
    });
}

criterion_group!(benches, bench_transform, bench_normalize);
criterion_main!(benches);
