pub mod param;
pub mod conv2d;
pub mod conv_transpose;
pub mod pool;
pub mod dropout;

pub use param::Param;
pub use conv2d::{Conv2d, Init};
pub use conv_transpose::ConvTranspose2d;
pub use pool::MaxPool2d;
pub use dropout::Dropout;
