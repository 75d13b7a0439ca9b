use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::data::chip::{ChipPartition, ChipSource};
use crate::data::memory::build_splits;
use crate::data::partition::{DataGenerator, SplitRequest, Splits};
use crate::error::{Error, Result};

const RGB_SUFFIX: &str = "_rgb.png";
const LABEL_SUFFIX: &str = "_label.png";

/// Loads chips from disk, laid out as
///
/// ```text
/// <basedir>/<partitions_id>/<group>/<stem>_rgb.png    RGB8 image
/// <basedir>/<partitions_id>/<group>/<stem>_label.png  Luma8 class ids
/// ```
///
/// Each `<group>` directory (typically one geographic tile) goes to a single
/// split as a whole, so neighbouring chips never straddle train and test.
#[derive(Debug, Clone)]
pub struct ChipDirectoryGenerator {
    pub num_classes: usize,
}

impl ChipDirectoryGenerator {
    pub fn new(num_classes: usize) -> ChipDirectoryGenerator {
        ChipDirectoryGenerator { num_classes }
    }

    /// Group directories in name order, each with its chips in name order.
    pub fn scan(root: &Path) -> Result<Vec<(PathBuf, Vec<ChipSource>)>> {
        if !root.is_dir() {
            return Err(Error::Dataset(format!(
                "partitions directory {} does not exist",
                root.display()
            )));
        }
        let mut groups = Vec::new();
        for entry in sorted_entries(root)? {
            if entry.is_dir() {
                let chips = scan_group(&entry)?;
                if !chips.is_empty() {
                    groups.push((entry, chips));
                }
            }
        }
        if groups.is_empty() {
            return Err(Error::Dataset(format!("no chips found under {}", root.display())));
        }
        Ok(groups)
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)
        .map_err(|e| Error::io(dir, e))?
        .map(|entry| entry.map(|e| e.path()).map_err(|e| Error::io(dir, e)))
        .collect::<Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}

fn scan_group(dir: &Path) -> Result<Vec<ChipSource>> {
    let mut chips = Vec::new();
    for path in sorted_entries(dir)? {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(stem) = name.strip_suffix(RGB_SUFFIX) else {
            continue;
        };
        let label = dir.join(format!("{}{}", stem, LABEL_SUFFIX));
        if !label.is_file() {
            return Err(Error::Dataset(format!(
                "chip {} has no label map {}",
                path.display(),
                label.display()
            )));
        }
        chips.push(ChipSource::Files { rgb: path, label });
    }
    Ok(chips)
}

impl DataGenerator for ChipDirectoryGenerator {
    type Partition = ChipPartition;

    fn split(&self, request: &SplitRequest) -> Result<Splits<ChipPartition>> {
        request.validate()?;
        let root = request.basedir.join(&request.partitions_id);
        let mut groups = ChipDirectoryGenerator::scan(&root)?;
        if request.shuffle {
            let mut rng = match request.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            groups.shuffle(&mut rng);
        }

        let (n_train, n_val, n_test) = request.split_counts(groups.len());
        info!(
            root = %root.display(),
            groups = groups.len(),
            train = n_train,
            val = n_val,
            test = n_test,
            "assigning chip groups to splits"
        );
        let mut chips = groups.into_iter().map(|(_, chips)| chips);
        let train = chips.by_ref().take(n_train).flatten().collect();
        let val = chips.by_ref().take(n_val).flatten().collect();
        let test = chips.flatten().collect();
        build_splits(request, self.num_classes, train, val, test)
    }
}
