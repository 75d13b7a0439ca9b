use serde::{Serialize, Deserialize};

use crate::data::batch::Proportions;
use crate::error::Result;
use crate::math::map_batch::MaskBatch;
use crate::math::tensor::Tensor;
use crate::model::backbone::{BackboneKeywords, BackboneUnet};
use crate::model::custom::CustomUnet;
use crate::model::contract::ModelContract;
use crate::network::unet::UnetModel;

/// Architecture section of a run configuration.
///
/// ```json
/// { "kind": "custom", "loss": "mse" }
/// { "kind": "backbone", "backbone_name": "vgg-m", "encoder_freeze": true }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArchitectureConfig {
    Custom(CustomUnet),
    Backbone(BackboneKeywords),
}

impl Default for ArchitectureConfig {
    fn default() -> Self {
        ArchitectureConfig::Custom(CustomUnet::default())
    }
}

/// A concrete architecture chosen once, at construction.
#[derive(Debug, Clone, PartialEq)]
pub enum UnetVariant {
    Custom(CustomUnet),
    Backbone(BackboneUnet),
}

impl From<ArchitectureConfig> for UnetVariant {
    fn from(config: ArchitectureConfig) -> Self {
        match config {
            ArchitectureConfig::Custom(unet) => UnetVariant::Custom(unet),
            ArchitectureConfig::Backbone(keywords) => UnetVariant::Backbone(BackboneUnet::new(keywords)),
        }
    }
}

impl UnetVariant {
    fn contract(&self) -> &dyn ModelContract {
        match self {
            UnetVariant::Custom(unet) => unet,
            UnetVariant::Backbone(unet) => unet,
        }
    }
}

impl ModelContract for UnetVariant {
    fn get_name(&self) -> Result<String> {
        self.contract().get_name()
    }

    fn get_model(&self) -> Result<UnetModel> {
        self.contract().get_model()
    }

    fn get_loss(&self, prediction: &MaskBatch, proportions: &Proportions, labels: &MaskBatch) -> Result<f64> {
        self.contract().get_loss(prediction, proportions, labels)
    }

    fn get_loss_gradient(
        &self,
        prediction: &MaskBatch,
        proportions: &Proportions,
        labels: &MaskBatch,
    ) -> Result<MaskBatch> {
        self.contract().get_loss_gradient(prediction, proportions, labels)
    }

    fn predict(&self, model: &mut UnetModel, images: &Tensor) -> Result<MaskBatch> {
        self.contract().predict(model, images)
    }

    fn backpropagate(&self, model: &mut UnetModel, grad: &MaskBatch) -> Result<()> {
        self.contract().backpropagate(model, grad)
    }
}
