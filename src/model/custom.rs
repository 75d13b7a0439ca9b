use serde::{Serialize, Deserialize};

use crate::data::batch::Proportions;
use crate::error::Result;
use crate::loss::loss_type::LossType;
use crate::math::map_batch::MaskBatch;
use crate::model::contract::{check_pair, ModelContract};
use crate::network::spec::UnetSpec;
use crate::network::unet::UnetModel;

/// The hand-built U-Net of [`UnetSpec::custom`]: fixed 96×96 RGB input,
/// four pooling levels, mean-squared-error loss by default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomUnet {
    pub loss: LossType,
    pub seed: Option<u64>,
}

impl CustomUnet {
    pub fn new(loss: LossType) -> CustomUnet {
        CustomUnet { loss, seed: None }
    }

    pub fn with_seed(mut self, seed: u64) -> CustomUnet {
        self.seed = Some(seed);
        self
    }
}

impl ModelContract for CustomUnet {
    fn get_name(&self) -> Result<String> {
        Ok("custom_unet".to_owned())
    }

    fn get_model(&self) -> Result<UnetModel> {
        UnetModel::new(UnetSpec { seed: self.seed, ..UnetSpec::custom() })
    }

    fn get_loss(&self, prediction: &MaskBatch, _: &Proportions, labels: &MaskBatch) -> Result<f64> {
        check_pair(prediction, labels)?;
        Ok(self.loss.loss(&prediction.data, &labels.data))
    }

    fn get_loss_gradient(
        &self,
        prediction: &MaskBatch,
        _: &Proportions,
        labels: &MaskBatch,
    ) -> Result<MaskBatch> {
        check_pair(prediction, labels)?;
        MaskBatch::new(
            prediction.batch,
            prediction.height,
            prediction.width,
            self.loss.derivative(&prediction.data, &labels.data),
        )
    }
}
