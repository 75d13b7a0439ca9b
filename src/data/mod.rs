pub mod batch;
pub mod normalize;
pub mod partition;
pub mod chip;
pub mod memory;
pub mod directory;

pub use batch::{Batch, Proportions};
pub use normalize::Normalizer;
pub use partition::{BatchCursor, DataGenerator, Partition, SplitRequest, Splits};
pub use chip::{Chip, ChipPartition, ChipSource};
pub use memory::InMemoryGenerator;
pub use directory::ChipDirectoryGenerator;
