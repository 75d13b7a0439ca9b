use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::rc::Rc;

use crate::data::chip::{Chip, ChipPartition, ChipSource};
use crate::data::partition::{DataGenerator, SplitRequest, Splits};
use crate::error::{Error, Result};

/// Splits an in-memory list of chips. `basedir` and `partitions_id` of the
/// request are ignored.
#[derive(Debug, Clone)]
pub struct InMemoryGenerator {
    chips: Vec<Rc<Chip>>,
    num_classes: usize,
}

impl InMemoryGenerator {
    pub fn new(chips: Vec<Chip>, num_classes: usize) -> InMemoryGenerator {
        InMemoryGenerator { chips: chips.into_iter().map(Rc::new).collect(), num_classes }
    }
}

impl DataGenerator for InMemoryGenerator {
    type Partition = ChipPartition;

    fn split(&self, request: &SplitRequest) -> Result<Splits<ChipPartition>> {
        request.validate()?;
        let mut sources: Vec<ChipSource> =
            self.chips.iter().cloned().map(ChipSource::Memory).collect();
        if request.shuffle {
            let mut rng = match request.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            sources.shuffle(&mut rng);
        }

        let (n_train, n_val, _) = request.split_counts(sources.len());
        let test = sources.split_off(n_train + n_val);
        let val = sources.split_off(n_train);
        build_splits(request, self.num_classes, sources, val, test)
    }
}

/// Wraps per-split chip lists into partitions, rejecting an empty train or
/// validation split.
pub(crate) fn build_splits(
    request: &SplitRequest,
    num_classes: usize,
    train: Vec<ChipSource>,
    val: Vec<ChipSource>,
    test: Vec<ChipSource>,
) -> Result<Splits<ChipPartition>> {
    if train.is_empty() {
        return Err(Error::EmptyPartition("train"));
    }
    if val.is_empty() {
        return Err(Error::EmptyPartition("validation"));
    }
    // Distinct per-partition seeds keep the three shuffles independent.
    let seed = |offset: u64| request.seed.map(|s| s.wrapping_add(offset));
    let partition = |name, chips, offset| {
        ChipPartition::new(
            name,
            chips,
            request.batch_size,
            request.shuffle,
            num_classes,
            request.cache_size,
            seed(offset),
        )
    };
    Ok(Splits {
        train: partition("train", train, 1),
        val: partition("validation", val, 2),
        test: partition("test", test, 3),
    })
}
