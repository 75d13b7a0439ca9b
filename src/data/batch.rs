use crate::math::map_batch::LabelBatch;
use crate::math::tensor::Tensor;

/// Per-sample auxiliary values (class proportions); passed through to the
/// loss untouched.
pub type Proportions = Vec<Vec<f64>>;

/// One step's worth of samples: `(x, (p, l))`.
#[derive(Debug, Clone)]
pub struct Batch {
    /// RGB chips, `(batch, height, width, 3)`, pixel values in [0, 255].
    pub images: Tensor,
    pub proportions: Proportions,
    /// Class id per cell, `(batch, height, width)`.
    pub labels: LabelBatch,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.batch
    }

    pub fn is_empty(&self) -> bool {
        self.labels.batch == 0
    }
}
