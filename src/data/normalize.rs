use serde::{Serialize, Deserialize};

use crate::error::{Error, Result};
use crate::math::map_batch::{LabelBatch, MaskBatch};
use crate::math::tensor::Tensor;

/// Crops a border off images and labels and collapses labels to a 0/1 mask
/// of one target class.
///
/// Applied before prediction, loss and metrics so that labels and
/// predictions always share a shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Normalizer {
    /// Cells removed from each of the four spatial edges.
    pub margin: usize,
    /// Label value that maps to 1; every other class maps to 0.
    pub target_class: i32,
}

impl Default for Normalizer {
    fn default() -> Self {
        Normalizer { margin: 2, target_class: 2 }
    }
}

impl Normalizer {
    pub fn normalize(&self, images: &Tensor, labels: &LabelBatch) -> Result<(Tensor, MaskBatch)> {
        if images.shape[..3] != [labels.batch, labels.height, labels.width] {
            return Err(Error::Shape(format!(
                "images {:?} do not match labels {}x{}x{}",
                images.shape, labels.batch, labels.height, labels.width
            )));
        }
        let images = images.crop_spatial(self.margin)?;
        let target = self.target_class;
        let mask = labels.crop(self.margin)?.map(|class| if class == target { 1.0 } else { 0.0 });
        Ok((images, mask))
    }
}
