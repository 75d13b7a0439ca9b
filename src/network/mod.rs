pub mod spec;
pub mod unet;
pub mod backbone;

pub use spec::UnetSpec;
pub use unet::{UnetModel, ParamCounts, ConvBlock, DecoderLevel};
pub use backbone::{BackboneSpec, EncoderWeights};
