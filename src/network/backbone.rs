//! Named encoder presets used by the backbone-based U-Net, plus the JSON
//! format for shipping pretrained encoder weights between runs.

use serde::{Serialize, Deserialize};
use std::path::Path;

use crate::activation::activation::ActivationFunction;
use crate::error::{Error, Result};
use crate::layers::conv2d::Init;
use crate::network::spec::UnetSpec;
use crate::network::unet::ConvBlock;

/// A VGG-style encoder: double 3×3 ReLU convolutions per level, 2×2 pooling
/// between levels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackboneSpec {
    pub name: &'static str,
    pub filters: &'static [usize],
    pub dropout: &'static [f64],
}

pub const BACKBONES: &[BackboneSpec] = &[
    BackboneSpec {
        name: "vgg-s",
        filters: &[8, 16, 32],
        dropout: &[0.0, 0.0, 0.1],
    },
    BackboneSpec {
        name: "vgg-m",
        filters: &[16, 32, 64, 128],
        dropout: &[0.0, 0.1, 0.1, 0.2],
    },
    BackboneSpec {
        name: "vgg-l",
        filters: &[32, 64, 128, 256, 512],
        dropout: &[0.0, 0.1, 0.1, 0.2, 0.3],
    },
];

pub fn lookup(name: &str) -> Result<&'static BackboneSpec> {
    BACKBONES
        .iter()
        .find(|b| b.name == name)
        .ok_or_else(|| Error::UnknownBackbone(name.to_owned()))
}

impl BackboneSpec {
    /// Full U-Net spec around this encoder; spatial size is left open.
    pub fn unet_spec(&self, output_channels: usize, seed: Option<u64>) -> UnetSpec {
        UnetSpec {
            name: format!("{}_unet", self.name),
            input_shape: None,
            input_channels: 3,
            input_scale: 1.0 / 255.0,
            filters: self.filters.to_vec(),
            dropout: self.dropout.to_vec(),
            activation: ActivationFunction::ReLU,
            init: Init::HeNormal,
            output_channels,
            output_activation: ActivationFunction::Sigmoid,
            seed,
        }
    }
}

/// Encoder and bottleneck weights exported from a trained model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderWeights {
    /// Name of the model the weights came from.
    pub backbone: String,
    pub input_channels: usize,
    pub filters: Vec<usize>,
    pub blocks: Vec<ConvBlock>,
}

impl EncoderWeights {
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = std::fs::File::create(path).map_err(|e| Error::io(path, e))?;
        serde_json::to_writer(std::io::BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<EncoderWeights> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| Error::Pretrained {
            path: path.to_owned(),
            msg: e.to_string(),
        })?;
        serde_json::from_reader(std::io::BufReader::new(file)).map_err(|e| Error::Pretrained {
            path: path.to_owned(),
            msg: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::param::Param;
    use crate::network::unet::UnetModel;

    #[test]
    fn every_backbone_builds_a_valid_spec() {
        for backbone in BACKBONES {
            let spec = backbone.unet_spec(1, Some(0));
            spec.validate().unwrap();
            assert_eq!(spec.name, format!("{}_unet", backbone.name));
        }
    }

    #[test]
    fn unknown_backbone_is_reported() {
        assert!(matches!(lookup("resnet34"), Err(Error::UnknownBackbone(n)) if n == "resnet34"));
    }

    #[test]
    fn encoder_weights_survive_a_file_round_trip() {
        let model = UnetModel::new(lookup("vgg-s").unwrap().unet_spec(1, Some(3))).unwrap();
        let weights = model.encoder_state();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vgg-s.encoder.json");
        weights.save_json(&path).unwrap();

        let loaded = EncoderWeights::load_json(&path).unwrap();
        assert_eq!(loaded.backbone, weights.backbone);
        assert_eq!(loaded.filters, weights.filters);
        assert_eq!(loaded.blocks.len(), weights.blocks.len());
        for (a, b) in loaded.blocks.iter().zip(weights.blocks.iter()) {
            for (x, y) in [(&a.conv_a, &b.conv_a), (&a.conv_b, &b.conv_b)] {
                let bits = |p: &Param| p.value.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
                assert_eq!(bits(&x.weights), bits(&y.weights));
                assert_eq!(bits(&x.biases), bits(&y.biases));
            }
        }
    }

    #[test]
    fn missing_weights_file_is_a_pretrained_error() {
        let err = EncoderWeights::load_json("/nonexistent/encoder.json").unwrap_err();
        assert!(matches!(err, Error::Pretrained { .. }));
    }
}
