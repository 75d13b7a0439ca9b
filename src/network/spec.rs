use serde::{Serialize, Deserialize};
use std::path::Path;

use crate::activation::activation::ActivationFunction;
use crate::error::{Error, Result};
use crate::layers::conv2d::Init;

/// A fully serializable description of a U-Net architecture.
///
/// `filters[i]` is the width of encoder level `i`; the last entry is the
/// bottleneck. The decoder mirrors the encoder, so a spec with `L` entries
/// pools `L - 1` times and needs inputs whose height and width are
/// divisible by `2^(L-1)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnetSpec {
    /// Human-readable name, also used as the model file stem.
    pub name: String,
    /// Fixed `(height, width)`; `None` accepts any divisible size.
    #[serde(default)]
    pub input_shape: Option<[usize; 2]>,
    #[serde(default = "default_input_channels")]
    pub input_channels: usize,
    /// Multiplier applied to raw pixels before the first convolution.
    #[serde(default = "default_input_scale")]
    pub input_scale: f64,
    pub filters: Vec<usize>,
    /// Dropout rate between the two convolutions of each level, one per `filters` entry.
    pub dropout: Vec<f64>,
    pub activation: ActivationFunction,
    #[serde(default = "default_init")]
    pub init: Init,
    #[serde(default = "default_output_channels")]
    pub output_channels: usize,
    #[serde(default = "default_output_activation")]
    pub output_activation: ActivationFunction,
    /// Seeds weight initialization and dropout masks; `None` draws from entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_input_channels() -> usize { 3 }
fn default_input_scale() -> f64 { 1.0 / 255.0 }
fn default_init() -> Init { Init::HeNormal }
fn default_output_channels() -> usize { 1 }
fn default_output_activation() -> ActivationFunction { ActivationFunction::Sigmoid }

impl UnetSpec {
    /// The hand-built U-Net: 96×96 RGB chips, four pooling levels,
    /// ELU convolutions and a single sigmoid output channel.
    pub fn custom() -> UnetSpec {
        UnetSpec {
            name: "custom_unet".to_owned(),
            input_shape: Some([96, 96]),
            input_channels: 3,
            input_scale: default_input_scale(),
            filters: vec![16, 32, 64, 128, 256],
            dropout: vec![0.1, 0.1, 0.2, 0.2, 0.3],
            activation: ActivationFunction::ELU,
            init: Init::HeNormal,
            output_channels: 1,
            output_activation: ActivationFunction::Sigmoid,
            seed: None,
        }
    }

    pub fn levels(&self) -> usize {
        self.filters.len()
    }

    /// Height and width must be multiples of this.
    pub fn spatial_divisor(&self) -> usize {
        1 << self.levels().saturating_sub(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.filters.is_empty() {
            return Err(Error::Config("a U-Net needs at least one level".to_owned()));
        }
        if self.filters.contains(&0) || self.input_channels == 0 || self.output_channels == 0 {
            return Err(Error::Config("channel counts must be positive".to_owned()));
        }
        if self.dropout.len() != self.filters.len() {
            return Err(Error::Config(format!(
                "{} dropout rates given for {} levels",
                self.dropout.len(),
                self.filters.len()
            )));
        }
        if self.dropout.iter().any(|r| !(0.0..1.0).contains(r)) {
            return Err(Error::Config("dropout rates must lie in [0, 1)".to_owned()));
        }
        if let Some([h, w]) = self.input_shape {
            let d = self.spatial_divisor();
            if h % d != 0 || w % d != 0 {
                return Err(Error::Config(format!(
                    "input shape {}x{} is not divisible by {}",
                    h, w, d
                )));
            }
        }
        Ok(())
    }

    /// Serializes the spec to a pretty-printed JSON file.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = std::fs::File::create(path).map_err(|e| Error::io(path, e))?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        Ok(())
    }

    /// Deserializes a `UnetSpec` from a JSON file.
    pub fn load_json(path: impl AsRef<Path>) -> Result<UnetSpec> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| Error::io(path, e))?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}
