pub mod contract;
pub mod custom;
pub mod backbone;
pub mod variant;

pub use contract::{GenericUnet, ModelContract};
pub use custom::CustomUnet;
pub use backbone::{BackboneKeywords, BackboneUnet};
pub use variant::{ArchitectureConfig, UnetVariant};
