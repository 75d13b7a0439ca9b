pub mod error;
pub mod math;
pub mod activation;
pub mod layers;
pub mod network;
pub mod loss;
pub mod optim;
pub mod metrics;
pub mod data;
pub mod model;
pub mod tracking;
pub mod train;

// Convenience re-exports
pub use error::{Error, Result};
pub use math::{Tensor, MapBatch, LabelBatch, MaskBatch};
pub use activation::ActivationFunction;
pub use network::{UnetModel, UnetSpec};
pub use loss::LossType;
pub use optim::Adam;
pub use metrics::{iou, mean_iou};
pub use data::{Batch, Chip, ChipDirectoryGenerator, DataGenerator, InMemoryGenerator, Normalizer, Partition};
pub use model::{ArchitectureConfig, BackboneKeywords, BackboneUnet, CustomUnet, GenericUnet, ModelContract, UnetVariant};
pub use tracking::{JsonlSink, LiveSink, MemorySink, TrackingSink};
pub use train::{EpochStats, EvalReport, RunConfig, Split, Trainer, TrainerState, ValSample};
