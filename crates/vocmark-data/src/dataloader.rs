//! DataLoader for creating training batches.
//!
//! The training split is reshuffled every epoch from `seed + epoch`, the
//! validation split is visited in index order. With `num_workers > 0`,
//! batches are built on background threads and handed back through a
//! bounded channel; results are re-ordered so visitation matches the
//! inline path exactly. A worker that produces nothing within `timeout`
//! surfaces as [`VocmarkError::DataStall`]. The inline path has no stall
//! timeout, so the defaults use one worker.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use vocmark_core::{LoaderConfig, Result, VocmarkError};

use crate::dataset::WatermarkDataset;

/// A collated batch, `[batch_size, channels, length]` row-major.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Flattened sample values.
    pub data: Vec<f32>,
    /// Samples in this batch (the last batch may be short).
    pub batch_size: usize,
    /// `[channels, length]` of each sample.
    pub shape: [usize; 2],
    /// Per-sample patch counts.
    pub patch_num: Vec<usize>,
    /// Per-sample padding amounts.
    pub pad_num: Vec<usize>,
    /// Per-sample file names.
    pub names: Vec<String>,
}

impl Batch {
    /// Tensor dimensions `[batch, channels, length]`.
    #[must_use]
    pub fn dims(&self) -> [i32; 3] {
        [
            self.batch_size as i32,
            self.shape[0] as i32,
            self.shape[1] as i32,
        ]
    }
}

/// Configuration for the DataLoader.
#[derive(Debug, Clone)]
pub struct DataLoaderConfig {
    /// Batch size.
    pub batch_size: usize,
    /// Whether to reshuffle every epoch.
    pub shuffle: bool,
    /// Base seed for shuffling.
    pub seed: u64,
    /// Background worker threads. Zero builds batches inline, without a
    /// stall timeout.
    pub num_workers: usize,
    /// Bounded channel depth for prefetched batches.
    pub prefetch: usize,
    /// How long to wait for a prefetched batch.
    pub timeout: Duration,
}

impl Default for DataLoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 4,
            shuffle: false,
            seed: 42,
            num_workers: 1,
            prefetch: 2,
            timeout: Duration::from_secs(60),
        }
    }
}

impl DataLoaderConfig {
    /// Loader settings from `train.yaml`.
    #[must_use]
    pub fn from_loader(batch_size: usize, shuffle: bool, seed: u64, loader: &LoaderConfig) -> Self {
        Self {
            batch_size,
            shuffle,
            seed,
            num_workers: loader.num_workers,
            prefetch: loader.prefetch.max(1),
            timeout: Duration::from_secs(loader.timeout_secs),
        }
    }
}

/// DataLoader that yields batches from a dataset.
pub struct DataLoader {
    dataset: Arc<dyn WatermarkDataset>,
    config: DataLoaderConfig,
}

impl std::fmt::Debug for DataLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataLoader")
            .field("len", &self.dataset.len())
            .field("config", &self.config)
            .finish()
    }
}

impl DataLoader {
    /// Create a new DataLoader.
    pub fn new(dataset: Arc<dyn WatermarkDataset>, config: DataLoaderConfig) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(VocmarkError::InvalidArgument("batch_size must be positive".into()));
        }
        Ok(Self { dataset, config })
    }

    /// Get the number of batches per epoch.
    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.config.batch_size)
    }

    /// Get the total number of samples.
    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    /// Check if the loader is empty.
    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// Batch size.
    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    /// Sample visitation order for `epoch`.
    pub fn epoch_order(&self, epoch: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.dataset.len()).collect();
        if self.config.shuffle {
            let seed = self.config.seed.wrapping_add(epoch as u64);
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            indices.shuffle(&mut rng);
        }
        indices
    }

    /// Iterate the batches of `epoch`.
    pub fn epoch(&self, epoch: usize) -> BatchIter {
        let batches: Vec<Vec<usize>> = self
            .epoch_order(epoch)
            .chunks(self.config.batch_size)
            .map(<[usize]>::to_vec)
            .collect();

        if self.config.num_workers == 0 {
            BatchIter::Inline {
                dataset: Arc::clone(&self.dataset),
                batches,
                position: 0,
            }
        } else {
            BatchIter::Prefetch(Prefetcher::spawn(
                Arc::clone(&self.dataset),
                batches,
                &self.config,
            ))
        }
    }
}

/// Load and concatenate the samples at `indices`.
pub fn collate(dataset: &dyn WatermarkDataset, indices: &[usize]) -> Result<Batch> {
    let shape = dataset.sample_shape();
    let per_sample = shape[0] * shape[1];
    let mut batch = Batch {
        data: Vec::with_capacity(indices.len() * per_sample),
        batch_size: indices.len(),
        shape,
        patch_num: Vec::with_capacity(indices.len()),
        pad_num: Vec::with_capacity(indices.len()),
        names: Vec::with_capacity(indices.len()),
    };

    for &index in indices {
        let sample = dataset.sample(index)?;
        if sample.shape != shape || sample.matrix.len() != per_sample {
            return Err(VocmarkError::Shape {
                expected: shape.to_vec(),
                actual: vec![sample.shape[0], sample.shape[1], sample.matrix.len()],
            });
        }
        batch.data.extend_from_slice(&sample.matrix);
        batch.patch_num.push(sample.patch_num);
        batch.pad_num.push(sample.pad_num);
        batch.names.push(sample.name);
    }
    Ok(batch)
}

/// Iterator over one epoch of batches.
pub enum BatchIter {
    /// Batches built on the calling thread.
    Inline {
        /// Source dataset.
        dataset: Arc<dyn WatermarkDataset>,
        /// Index lists, one per batch.
        batches: Vec<Vec<usize>>,
        /// Next batch to build.
        position: usize,
    },
    /// Batches built by worker threads.
    Prefetch(Prefetcher),
}

impl Iterator for BatchIter {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Inline {
                dataset,
                batches,
                position,
            } => {
                let indices = batches.get(*position)?;
                *position += 1;
                Some(collate(dataset.as_ref(), indices))
            }
            Self::Prefetch(prefetcher) => prefetcher.next_batch(),
        }
    }
}

/// Worker threads building batches ahead of the consumer.
pub struct Prefetcher {
    receiver: Receiver<(usize, Result<Batch>)>,
    pending: BTreeMap<usize, Result<Batch>>,
    next: usize,
    total: usize,
    timeout: Duration,
    cancelled: Arc<AtomicBool>,
}

impl Prefetcher {
    fn spawn(
        dataset: Arc<dyn WatermarkDataset>,
        batches: Vec<Vec<usize>>,
        config: &DataLoaderConfig,
    ) -> Self {
        let total = batches.len();
        let batches = Arc::new(batches);
        let cursor = Arc::new(AtomicUsize::new(0));
        let cancelled = Arc::new(AtomicBool::new(false));
        let (sender, receiver) = mpsc::sync_channel(config.prefetch);

        for worker in 0..config.num_workers.min(total.max(1)) {
            let dataset = Arc::clone(&dataset);
            let batches = Arc::clone(&batches);
            let cursor = Arc::clone(&cursor);
            let cancelled = Arc::clone(&cancelled);
            let sender = sender.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("vocmark-loader-{worker}"))
                .spawn(move || loop {
                    if cancelled.load(Ordering::Relaxed) {
                        break;
                    }
                    let job = cursor.fetch_add(1, Ordering::Relaxed);
                    let Some(indices) = batches.get(job) else {
                        break;
                    };
                    let result = collate(dataset.as_ref(), indices);
                    if sender.send((job, result)).is_err() {
                        break;
                    }
                });
            if let Err(e) = spawned {
                tracing::warn!("failed to spawn loader worker {worker}: {e}");
            }
        }

        Self {
            receiver,
            pending: BTreeMap::new(),
            next: 0,
            total,
            timeout: config.timeout,
            cancelled,
        }
    }

    fn next_batch(&mut self) -> Option<Result<Batch>> {
        if self.next >= self.total {
            return None;
        }
        let wanted = self.next;
        loop {
            if let Some(result) = self.pending.remove(&wanted) {
                self.next += 1;
                return Some(result);
            }
            match self.receiver.recv_timeout(self.timeout) {
                Ok((job, result)) => {
                    self.pending.insert(job, result);
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.next = self.total;
                    return Some(Err(VocmarkError::DataStall {
                        batch: wanted,
                        seconds: self.timeout.as_secs(),
                    }));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.next = self.total;
                    return Some(Err(VocmarkError::Io(std::io::Error::other(format!(
                        "loader workers exited before producing batch {wanted}"
                    )))));
                }
            }
        }
    }
}

impl Drop for Prefetcher {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::WatermarkSample;

    /// In-memory dataset; sample `i` is filled with `i`.
    struct Counting {
        len: usize,
        delay: Option<Duration>,
    }

    impl WatermarkDataset for Counting {
        fn len(&self) -> usize {
            self.len
        }

        fn sample(&self, index: usize) -> Result<WatermarkSample> {
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            Ok(WatermarkSample {
                matrix: vec![index as f32; 4],
                shape: [1, 4],
                patch_num: 1,
                pad_num: 0,
                name: format!("{index}.wav"),
            })
        }

        fn sample_shape(&self) -> [usize; 2] {
            [1, 4]
        }
    }

    fn loader(len: usize, shuffle: bool, workers: usize) -> DataLoader {
        let config = DataLoaderConfig {
            batch_size: 3,
            shuffle,
            seed: 7,
            num_workers: workers,
            prefetch: 2,
            timeout: Duration::from_secs(5),
        };
        DataLoader::new(Arc::new(Counting { len, delay: None }), config).unwrap()
    }

    fn first_values(iter: BatchIter) -> Vec<usize> {
        iter.map(|b| b.unwrap())
            .flat_map(|b| b.data.chunks(4).map(|c| c[0] as usize).collect::<Vec<_>>())
            .collect()
    }

    #[test]
    fn test_num_batches_includes_short_tail() {
        let loader = loader(10, false, 0);
        assert_eq!(loader.num_batches(), 4);
        let sizes: Vec<usize> = loader.epoch(1).map(|b| b.unwrap().batch_size).collect();
        assert_eq!(sizes, vec![3, 3, 3, 1]);
    }

    #[test]
    fn test_validation_order_fixed() {
        let loader = loader(7, false, 0);
        assert_eq!(first_values(loader.epoch(1)), (0..7).collect::<Vec<_>>());
        assert_eq!(first_values(loader.epoch(2)), (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn test_shuffle_reproducible_and_varies_per_epoch() {
        let a = loader(20, true, 0);
        let b = loader(20, true, 0);
        assert_eq!(a.epoch_order(1), b.epoch_order(1));
        assert_ne!(a.epoch_order(1), a.epoch_order(2));

        let mut sorted = a.epoch_order(3);
        sorted.sort_unstable();
        assert_eq!(sorted, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_default_loader_settings_are_timed() {
        let config = DataLoaderConfig::from_loader(2, true, 3, &LoaderConfig::default());
        assert_eq!(config.num_workers, 1);
        assert!(config.timeout > Duration::ZERO);

        let loader = DataLoader::new(Arc::new(Counting { len: 5, delay: None }), config).unwrap();
        let iter = loader.epoch(1);
        assert!(matches!(iter, BatchIter::Prefetch(_)));
        assert_eq!(first_values(iter).len(), 5);
        assert_eq!(DataLoaderConfig::default().num_workers, 1);
    }

    #[test]
    fn test_workers_preserve_order() {
        let inline = loader(25, true, 0);
        let threaded = loader(25, true, 3);
        assert_eq!(first_values(inline.epoch(4)), first_values(threaded.epoch(4)));
    }

    #[test]
    fn test_stall_surfaces_as_error() {
        let config = DataLoaderConfig {
            batch_size: 1,
            num_workers: 1,
            timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let dataset = Counting {
            len: 2,
            delay: Some(Duration::from_millis(500)),
        };
        let loader = DataLoader::new(Arc::new(dataset), config).unwrap();
        let mut iter = loader.epoch(1);
        assert!(matches!(
            iter.next(),
            Some(Err(VocmarkError::DataStall { batch: 0, .. }))
        ));
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        struct Ragged;
        impl WatermarkDataset for Ragged {
            fn len(&self) -> usize {
                1
            }
            fn sample(&self, _index: usize) -> Result<WatermarkSample> {
                Ok(WatermarkSample {
                    matrix: vec![0.0; 3],
                    shape: [1, 3],
                    patch_num: 1,
                    pad_num: 0,
                    name: String::new(),
                })
            }
            fn sample_shape(&self) -> [usize; 2] {
                [1, 4]
            }
        }
        assert!(matches!(
            collate(&Ragged, &[0]),
            Err(VocmarkError::Shape { .. })
        ));
    }
}
