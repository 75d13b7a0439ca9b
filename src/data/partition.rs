use serde::{Serialize, Deserialize};
use std::path::PathBuf;

use crate::data::batch::Batch;
use crate::error::{Error, Result};

/// One dataset split (train, validation or test) served in batches.
pub trait Partition {
    fn batch_size(&self) -> usize;

    /// Changes the batch size; takes effect for batches fetched afterwards.
    fn set_batch_size(&mut self, batch_size: usize);

    /// Batches in one pass at the current batch size.
    fn num_batches(&self) -> usize;

    fn get_batch(&mut self, index: usize) -> Result<Batch>;

    /// Resets the partition between passes, reshuffling if it shuffles.
    fn on_epoch_end(&mut self);
}

/// Position within one pass over a partition.
///
/// `next` yields `Ok(None)` once the pass is exhausted; a fresh cursor starts
/// a new pass from the first batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchCursor {
    position: usize,
}

impl BatchCursor {
    pub fn new() -> BatchCursor {
        BatchCursor::default()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn next<P: Partition + ?Sized>(&mut self, partition: &mut P) -> Result<Option<Batch>> {
        if self.position >= partition.num_batches() {
            return Ok(None);
        }
        let batch = partition.get_batch(self.position)?;
        self.position += 1;
        Ok(Some(batch))
    }
}

/// The three partitions produced by a `DataGenerator`.
#[derive(Debug)]
pub struct Splits<P> {
    pub train: P,
    pub val: P,
    pub test: P,
}

/// Arguments of `DataGenerator::split`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitRequest {
    pub basedir: PathBuf,
    pub partitions_id: String,
    pub batch_size: usize,
    pub train_size: f64,
    pub val_size: f64,
    pub test_size: f64,
    /// Upper bound on decoded chips kept in memory per partition.
    pub cache_size: usize,
    pub shuffle: bool,
    pub seed: Option<u64>,
}

impl SplitRequest {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_owned()));
        }
        let sizes = [self.train_size, self.val_size, self.test_size];
        if sizes.iter().any(|s| !(0.0..=1.0).contains(s)) {
            return Err(Error::Config(format!("split sizes {:?} must lie in [0, 1]", sizes)));
        }
        let total: f64 = sizes.iter().sum();
        if (total - 1.0).abs() > 1e-3 {
            return Err(Error::Config(format!(
                "split sizes {:?} sum to {}, expected 1.0",
                sizes, total
            )));
        }
        Ok(())
    }

    /// How many of `n` units go to train, validation and test.
    pub fn split_counts(&self, n: usize) -> (usize, usize, usize) {
        let n_train = ((n as f64 * self.train_size).round() as usize).min(n);
        let n_val = ((n as f64 * self.val_size).round() as usize).min(n - n_train);
        (n_train, n_val, n - n_train - n_val)
    }
}

/// Source of dataset partitions (the chip loader).
pub trait DataGenerator {
    type Partition: Partition;

    /// Builds train/validation/test partitions. Fails on invalid
    /// proportions, unreadable data, or an empty train or validation split.
    fn split(&self, request: &SplitRequest) -> Result<Splits<Self::Partition>>;
}
