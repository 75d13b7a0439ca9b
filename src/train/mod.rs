pub mod epoch_stats;
pub mod train_config;
pub mod val_sample;
pub mod trainer;

pub use epoch_stats::EpochStats;
pub use train_config::{RunConfig, TrackingConfig};
pub use val_sample::{EvalReport, Split, ValSample};
pub use trainer::{Trainer, TrainerState};
