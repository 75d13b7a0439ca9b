use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::debug;

use crate::data::batch::Batch;
use crate::data::partition::Partition;
use crate::error::{Error, Result};
use crate::math::map_batch::MapBatch;
use crate::math::tensor::Tensor;

/// One RGB image chip with its per-pixel class map.
#[derive(Debug, Clone, PartialEq)]
pub struct Chip {
    pub height: usize,
    pub width: usize,
    /// Interleaved R,G,B bytes, row-major.
    pub rgb: Vec<u8>,
    pub labels: Vec<i32>,
}

impl Chip {
    pub fn new(height: usize, width: usize, rgb: Vec<u8>, labels: Vec<i32>) -> Result<Chip> {
        if rgb.len() != height * width * 3 || labels.len() != height * width {
            return Err(Error::Dataset(format!(
                "chip of {}x{} needs {} rgb bytes and {} labels, got {} and {}",
                height,
                width,
                height * width * 3,
                height * width,
                rgb.len(),
                labels.len()
            )));
        }
        Ok(Chip { height, width, rgb, labels })
    }

    /// Reads `<stem>_rgb.png` (RGB) and `<stem>_label.png` (8-bit class ids).
    pub fn load(rgb_path: &Path, label_path: &Path) -> Result<Chip> {
        let rgb = image::open(rgb_path)
            .map_err(|source| Error::Image { path: rgb_path.to_owned(), source })?
            .to_rgb8();
        let labels = image::open(label_path)
            .map_err(|source| Error::Image { path: label_path.to_owned(), source })?
            .to_luma8();
        if rgb.dimensions() != labels.dimensions() {
            return Err(Error::Dataset(format!(
                "{} is {:?} but {} is {:?}",
                rgb_path.display(),
                rgb.dimensions(),
                label_path.display(),
                labels.dimensions()
            )));
        }
        let (width, height) = rgb.dimensions();
        let labels = labels.into_raw().into_iter().map(i32::from).collect();
        Chip::new(height as usize, width as usize, rgb.into_raw(), labels)
    }

    /// Fraction of cells holding each class id in `0..num_classes`.
    pub fn proportions(&self, num_classes: usize) -> Vec<f64> {
        let mut counts = vec![0usize; num_classes];
        for &class in &self.labels {
            if class >= 0 && (class as usize) < num_classes {
                counts[class as usize] += 1;
            }
        }
        let cells = self.labels.len().max(1) as f64;
        counts.into_iter().map(|c| c as f64 / cells).collect()
    }
}

/// Where a partition finds a chip.
#[derive(Debug, Clone)]
pub enum ChipSource {
    Memory(Rc<Chip>),
    Files { rgb: PathBuf, label: PathBuf },
}

/// Bounded map of decoded chips; evicts the oldest insertion first.
#[derive(Debug, Default)]
struct ChipCache {
    capacity: usize,
    chips: HashMap<usize, Rc<Chip>>,
    order: VecDeque<usize>,
}

impl ChipCache {
    fn new(capacity: usize) -> ChipCache {
        ChipCache { capacity, ..ChipCache::default() }
    }

    fn get(&self, key: usize) -> Option<Rc<Chip>> {
        self.chips.get(&key).cloned()
    }

    fn insert(&mut self, key: usize, chip: Rc<Chip>) {
        if self.capacity == 0 {
            return;
        }
        while self.chips.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.chips.remove(&oldest);
                }
                None => break,
            }
        }
        self.chips.insert(key, chip);
        self.order.push_back(key);
    }
}

/// A partition over a fixed list of chips. The last batch of a pass may be
/// smaller than `batch_size`.
#[derive(Debug)]
pub struct ChipPartition {
    name: &'static str,
    chips: Vec<ChipSource>,
    order: Vec<usize>,
    batch_size: usize,
    shuffle: bool,
    num_classes: usize,
    rng: StdRng,
    cache: ChipCache,
}

impl ChipPartition {
    pub fn new(
        name: &'static str,
        chips: Vec<ChipSource>,
        batch_size: usize,
        shuffle: bool,
        num_classes: usize,
        cache_size: usize,
        seed: Option<u64>,
    ) -> ChipPartition {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut partition = ChipPartition {
            name,
            order: (0..chips.len()).collect(),
            chips,
            batch_size,
            shuffle,
            num_classes,
            rng,
            cache: ChipCache::new(cache_size),
        };
        if shuffle {
            partition.order.shuffle(&mut partition.rng);
        }
        partition
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of chips.
    pub fn len(&self) -> usize {
        self.chips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chips.is_empty()
    }

    fn load(&mut self, index: usize) -> Result<Rc<Chip>> {
        match &self.chips[index] {
            ChipSource::Memory(chip) => Ok(chip.clone()),
            ChipSource::Files { rgb, label } => {
                if let Some(chip) = self.cache.get(index) {
                    return Ok(chip);
                }
                debug!(partition = self.name, path = %rgb.display(), "decoding chip");
                let chip = Rc::new(Chip::load(rgb, label)?);
                self.cache.insert(index, chip.clone());
                Ok(chip)
            }
        }
    }
}

impl Partition for ChipPartition {
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn set_batch_size(&mut self, batch_size: usize) {
        self.batch_size = batch_size;
    }

    fn num_batches(&self) -> usize {
        if self.batch_size == 0 {
            0
        } else {
            self.chips.len().div_ceil(self.batch_size)
        }
    }

    fn get_batch(&mut self, index: usize) -> Result<Batch> {
        if index >= self.num_batches() {
            return Err(Error::Dataset(format!(
                "batch {} out of range for the {} partition ({} batches)",
                index,
                self.name,
                self.num_batches()
            )));
        }
        let start = index * self.batch_size;
        let end = (start + self.batch_size).min(self.chips.len());
        let members: Vec<usize> = self.order[start..end].to_vec();
        let chips = members
            .into_iter()
            .map(|i| self.load(i))
            .collect::<Result<Vec<_>>>()?;

        let (height, width) = (chips[0].height, chips[0].width);
        if chips.iter().any(|c| (c.height, c.width) != (height, width)) {
            return Err(Error::Dataset(format!(
                "batch {} of the {} partition mixes chip sizes",
                index, self.name
            )));
        }

        let n = chips.len();
        let mut pixels = Vec::with_capacity(n * height * width * 3);
        let mut labels = Vec::with_capacity(n * height * width);
        let mut proportions = Vec::with_capacity(n);
        for chip in &chips {
            pixels.extend(chip.rgb.iter().map(|&v| f64::from(v)));
            labels.extend_from_slice(&chip.labels);
            proportions.push(chip.proportions(self.num_classes));
        }

        Ok(Batch {
            images: Tensor::from_vec([n, height, width, 3], pixels)?,
            proportions,
            labels: MapBatch::new(n, height, width, labels)?,
        })
    }

    fn on_epoch_end(&mut self) {
        if self.shuffle {
            self.order.shuffle(&mut self.rng);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chip(value: u8, size: usize) -> ChipSource {
        let rgb = vec![value; size * size * 3];
        let labels = (0..size * size).map(|i| (i % 3) as i32).collect();
        ChipSource::Memory(Rc::new(Chip::new(size, size, rgb, labels).unwrap()))
    }

    fn first_pixels(partition: &mut ChipPartition) -> Vec<f64> {
        let mut seen = Vec::new();
        for i in 0..partition.num_batches() {
            let batch = partition.get_batch(i).unwrap();
            for n in 0..batch.len() {
                seen.push(batch.images.get(n, 0, 0, 0));
            }
        }
        seen
    }

    #[test]
    fn last_batch_may_be_partial() {
        let chips = (0..5).map(|v| chip(v, 4)).collect();
        let mut partition = ChipPartition::new("train", chips, 2, false, 3, 0, None);
        assert_eq!(partition.num_batches(), 3);
        assert_eq!(partition.get_batch(2).unwrap().len(), 1);
        assert!(partition.get_batch(3).is_err());
        assert_eq!(first_pixels(&mut partition), vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn reshuffles_only_when_shuffling() {
        let chips: Vec<ChipSource> = (0..16).map(|v| chip(v, 2)).collect();
        let mut fixed = ChipPartition::new("val", chips.clone(), 4, false, 3, 0, None);
        let before = first_pixels(&mut fixed);
        fixed.on_epoch_end();
        assert_eq!(first_pixels(&mut fixed), before);

        let mut shuffled = ChipPartition::new("val", chips, 4, true, 3, 0, Some(3));
        let first = first_pixels(&mut shuffled);
        shuffled.on_epoch_end();
        let second = first_pixels(&mut shuffled);
        assert_ne!(first, second);
        let mut sorted = second.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(sorted, (0..16).map(f64::from).collect::<Vec<_>>());
    }

    #[test]
    fn proportions_are_class_fractions() {
        let c = Chip::new(1, 4, vec![0; 12], vec![0, 2, 2, 9]).unwrap();
        assert_eq!(c.proportions(3), vec![0.25, 0.0, 0.5]);
    }

    #[test]
    fn cache_evicts_oldest() {
        let mut cache = ChipCache::new(2);
        let c = Rc::new(Chip::new(1, 1, vec![0; 3], vec![0]).unwrap());
        cache.insert(1, c.clone());
        cache.insert(2, c.clone());
        cache.insert(3, c);
        assert!(cache.get(1).is_none());
        assert!(cache.get(2).is_some() && cache.get(3).is_some());
    }
}
