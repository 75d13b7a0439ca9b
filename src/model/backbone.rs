use serde::{Serialize, Deserialize};
use std::path::PathBuf;
use tracing::info;

use crate::data::batch::Proportions;
use crate::error::{Error, Result};
use crate::math::map_batch::MaskBatch;
use crate::model::contract::{check_pair, ModelContract};
use crate::loss::mse::MseLoss;
use crate::network::backbone::{lookup, EncoderWeights};
use crate::network::unet::UnetModel;

/// Architecture keywords of a backbone-based U-Net.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackboneKeywords {
    /// Registry name, e.g. `vgg-m`.
    pub backbone_name: String,
    #[serde(default = "default_classes")]
    pub classes: usize,
    /// JSON file of encoder weights to start from.
    #[serde(default)]
    pub encoder_weights: Option<PathBuf>,
    /// Keep encoder and bottleneck weights fixed during training.
    #[serde(default)]
    pub encoder_freeze: bool,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_classes() -> usize { 1 }

impl BackboneKeywords {
    pub fn new(backbone_name: impl Into<String>) -> BackboneKeywords {
        BackboneKeywords {
            backbone_name: backbone_name.into(),
            classes: default_classes(),
            encoder_weights: None,
            encoder_freeze: false,
            seed: None,
        }
    }
}

/// U-Net around a registered encoder. Accepts any input size divisible by
/// the encoder's pooling factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackboneUnet {
    pub keywords: BackboneKeywords,
}

impl BackboneUnet {
    pub fn new(keywords: BackboneKeywords) -> BackboneUnet {
        BackboneUnet { keywords }
    }
}

impl ModelContract for BackboneUnet {
    fn get_name(&self) -> Result<String> {
        Ok(format!("{}_unet", self.keywords.backbone_name))
    }

    fn get_model(&self) -> Result<UnetModel> {
        let kw = &self.keywords;
        let backbone = lookup(&kw.backbone_name)?;
        if kw.classes == 0 {
            return Err(Error::Config("a backbone U-Net needs at least one class".to_owned()));
        }
        let mut model = UnetModel::new(backbone.unet_spec(kw.classes, kw.seed))?;

        if let Some(path) = &kw.encoder_weights {
            let weights = EncoderWeights::load_json(path)?;
            model.load_encoder_state(&weights).map_err(|e| Error::Pretrained {
                path: path.clone(),
                msg: e.to_string(),
            })?;
            info!(backbone = backbone.name, path = %path.display(), "loaded encoder weights");
        }
        if kw.encoder_freeze {
            model.freeze_encoder(true);
        }
        Ok(model)
    }

    fn get_loss(&self, prediction: &MaskBatch, _: &Proportions, labels: &MaskBatch) -> Result<f64> {
        check_pair(prediction, labels)?;
        Ok(MseLoss::loss(&prediction.data, &labels.data))
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
            MseLoss::derivative(&prediction.data, &labels.data),
        )
    }
}
