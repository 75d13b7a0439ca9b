use serde::{Serialize, Deserialize};

/// Per-epoch summary returned by `Trainer::fit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    /// 1-based epoch number within the `fit` call.
    pub epoch: usize,
    /// Epochs requested for this `fit` call.
    pub total_epochs: usize,
    /// Training steps (batches) taken in this epoch.
    pub steps: usize,
    /// Mean training loss over the epoch's steps.
    pub train_loss: f64,
    /// Mean loss over the validation batches drawn alongside them.
    pub val_loss: f64,
    /// Wall-clock duration of this epoch in milliseconds.
    pub elapsed_ms: u64,
}
