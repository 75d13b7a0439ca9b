pub mod tensor;
pub mod map_batch;

pub use tensor::Tensor;
pub use map_batch::{MapBatch, LabelBatch, MaskBatch};
