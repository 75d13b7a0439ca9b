use serde::{Serialize, Deserialize};

use crate::data::batch::Proportions;
use crate::error::Result;
use crate::math::map_batch::{LabelBatch, MaskBatch};
use crate::math::tensor::Tensor;
use crate::metrics::iou::mean_iou;

/// Which partition an operation reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    Train,
    Validation,
    Test,
}

impl Split {
    pub fn name(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Validation => "val",
            Split::Test => "test",
        }
    }
}

/// One normalized validation batch with the model's prediction for it.
#[derive(Debug, Clone)]
pub struct ValSample {
    pub images: Tensor,
    pub proportions: Proportions,
    /// 0/1 target-class mask.
    pub labels: MaskBatch,
    /// Target-class probabilities.
    pub prediction: MaskBatch,
}

impl ValSample {
    pub fn len(&self) -> usize {
        self.labels.batch
    }

    pub fn is_empty(&self) -> bool {
        self.labels.batch == 0
    }

    /// Prediction cut at `threshold` (strictly greater maps to 1).
    pub fn thresholded(&self, threshold: f64) -> LabelBatch {
        self.prediction.threshold(threshold)
    }

    /// Per-sample IoU of the thresholded prediction, averaged over `classes`
    /// (`&[0, 1]` scores background and target alike).
    pub fn ious(&self, threshold: f64, classes: &[i32]) -> Result<Vec<f64>> {
        mean_iou(classes, &self.labels.threshold(0.5), &self.thresholded(threshold))
    }
}

/// Loss and IoU over every batch of one partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalReport {
    pub split: Split,
    pub batches: usize,
    pub samples: usize,
    /// Sample-weighted mean loss; NaN when the partition is empty.
    pub mean_loss: f64,
    /// Mean per-sample target-class IoU at threshold 0.5; NaN when empty.
    pub mean_iou: f64,
}
