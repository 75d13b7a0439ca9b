use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Serialize, Deserialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::layers::{Conv2d, ConvTranspose2d, Dropout, Init, MaxPool2d, Param};
use crate::math::tensor::Tensor;
use crate::network::backbone::EncoderWeights;
use crate::network::spec::UnetSpec;

/// Trainable vs frozen parameter totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParamCounts {
    pub trainable: usize,
    pub non_trainable: usize,
}

impl ParamCounts {
    pub fn total(&self) -> usize {
        self.trainable + self.non_trainable
    }
}

/// conv → dropout → conv, the unit repeated at every U-Net level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvBlock {
    pub conv_a: Conv2d,
    pub dropout: Dropout,
    pub conv_b: Conv2d,
}

impl ConvBlock {
    fn new(in_channels: usize, out_channels: usize, rate: f64, spec: &UnetSpec, rng: &mut StdRng) -> ConvBlock {
        let conv_a = Conv2d::new(in_channels, out_channels, 3, spec.activation, spec.init, rng);
        let dropout_seed = spec.seed.map(|_| rng.gen());
        let conv_b = Conv2d::new(out_channels, out_channels, 3, spec.activation, spec.init, rng);
        ConvBlock { conv_a, dropout: Dropout::new(rate, dropout_seed), conv_b }
    }

    fn forward(&mut self, input: &Tensor, training: bool) -> Result<Tensor> {
        let a = self.conv_a.forward(input)?;
        let a = self.dropout.forward(&a, training);
        self.conv_b.forward(&a)
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor> {
        let g = self.conv_b.backward(grad)?;
        let g = self.dropout.backward(&g)?;
        self.conv_a.backward(&g)
    }

    fn params(&self) -> impl Iterator<Item = &Param> {
        self.conv_a.params().into_iter().chain(self.conv_b.params())
    }

    fn params_mut(&mut self) -> impl Iterator<Item = &mut Param> {
        self.conv_a.params_mut().into_iter().chain(self.conv_b.params_mut())
    }

    fn clear_cache(&mut self) {
        self.conv_a.clear_cache();
        self.dropout.clear_cache();
        self.conv_b.clear_cache();
    }
}

/// Upsampling step followed by a conv block over `[upsampled, skip]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderLevel {
    pub up: ConvTranspose2d,
    pub block: ConvBlock,
}

/// Encoder-decoder segmentation network with skip connections.
///
/// Owns its parameters and the activations cached by the last forward
/// pass; `backward` must follow the `forward` whose output it differentiates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnetModel {
    pub spec: UnetSpec,
    pub encoder: Vec<ConvBlock>,
    #[serde(skip)]
    pools: Vec<MaxPool2d>,
    pub bottleneck: ConvBlock,
    /// Deepest level first.
    pub decoder: Vec<DecoderLevel>,
    pub head: Conv2d,
    #[serde(skip)]
    training: bool,
}

impl UnetModel {
    pub fn new(spec: UnetSpec) -> Result<UnetModel> {
        spec.validate()?;
        let mut rng = match spec.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let depth = spec.levels() - 1;
        let mut encoder = Vec::with_capacity(depth);
        let mut in_channels = spec.input_channels;
        for level in 0..depth {
            let out = spec.filters[level];
            encoder.push(ConvBlock::new(in_channels, out, spec.dropout[level], &spec, &mut rng));
            in_channels = out;
        }
        let bottleneck = ConvBlock::new(in_channels, spec.filters[depth], spec.dropout[depth], &spec, &mut rng);

        let mut decoder = Vec::with_capacity(depth);
        for level in (0..depth).rev() {
            let width = spec.filters[level];
            let up = ConvTranspose2d::new(spec.filters[level + 1], width, &mut rng);
            let block = ConvBlock::new(2 * width, width, spec.dropout[level], &spec, &mut rng);
            decoder.push(DecoderLevel { up, block });
        }

        let head = Conv2d::new(
            spec.filters[0],
            spec.output_channels,
            1,
            spec.output_activation,
            Init::GlorotUniform,
            &mut rng,
        );

        Ok(UnetModel {
            pools: vec![MaxPool2d::new(); depth],
            spec,
            encoder,
            bottleneck,
            decoder,
            head,
            training: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn output_channels(&self) -> usize {
        self.spec.output_channels
    }

    /// Enables dropout for subsequent forward passes.
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    fn check_input(&self, input: &Tensor) -> Result<()> {
        let [n, h, w, c] = input.shape;
        if c != self.spec.input_channels {
            return Err(Error::Shape(format!(
                "model expects {} input channels, got {}",
                self.spec.input_channels, c
            )));
        }
        if let Some([eh, ew]) = self.spec.input_shape {
            if (h, w) != (eh, ew) {
                return Err(Error::Shape(format!(
                    "model expects {}x{} inputs, got {}x{}",
                    eh, ew, h, w
                )));
            }
        }
        let d = self.spec.spatial_divisor();
        if n == 0 || h == 0 || w == 0 || h % d != 0 || w % d != 0 {
            return Err(Error::Shape(format!(
                "input {}x{} must be non-empty and divisible by {}",
                h, w, d
            )));
        }
        Ok(())
    }

    /// Forward pass over a batch of raw NHWC images; returns the head's
    /// output `(batch, height, width, output_channels)`.
    pub fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        self.check_input(input)?;
        if self.pools.len() != self.encoder.len() {
            self.pools = vec![MaxPool2d::new(); self.encoder.len()];
        }
        let training = self.training;

        let mut h = input.scale(self.spec.input_scale);
        let mut skips = Vec::with_capacity(self.encoder.len());
        for (block, pool) in self.encoder.iter_mut().zip(self.pools.iter_mut()) {
            let features = block.forward(&h, training)?;
            h = pool.forward(&features)?;
            skips.push(features);
        }
        h = self.bottleneck.forward(&h, training)?;
        for (level, skip) in self.decoder.iter_mut().zip(skips.iter().rev()) {
            let up = level.up.forward(&h)?;
            h = level.block.forward(&up.concat_channels(skip)?, training)?;
        }
        self.head.forward(&h)
    }

    /// Backpropagates ∂L/∂output through the network, accumulating
    /// gradients into every parameter.
    pub fn backward(&mut self, grad: &Tensor) -> Result<()> {
        let mut g = self.head.backward(grad)?;
        let mut skip_grads = Vec::with_capacity(self.decoder.len());
        // decoder is stored deepest first; the gradient enters at the shallowest level
        for level in self.decoder.iter_mut().rev() {
            let joined = level.block.backward(&g)?;
            let (up_grad, skip_grad) = joined.split_channels(level.up.out_channels)?;
            skip_grads.push(skip_grad);
            g = level.up.backward(&up_grad)?;
        }
        g = self.bottleneck.backward(&g)?;
        let levels = self.encoder.iter_mut().zip(self.pools.iter_mut()).rev();
        for ((block, pool), skip_grad) in levels.zip(skip_grads.iter().rev()) {
            let mut features_grad = pool.backward(&g)?;
            features_grad.add_assign(skip_grad)?;
            g = block.backward(&features_grad)?;
        }
        Ok(())
    }

    /// All parameters in a fixed order: encoder, bottleneck, decoder, head.
    pub fn params(&self) -> Vec<&Param> {
        let mut params: Vec<&Param> = Vec::new();
        for block in &self.encoder {
            params.extend(block.params());
        }
        params.extend(self.bottleneck.params());
        for level in &self.decoder {
            params.extend(level.up.params());
            params.extend(level.block.params());
        }
        params.extend(self.head.params());
        params
    }

    /// Visits every parameter in the same order as `params`.
    pub fn visit_params_mut(&mut self, f: &mut dyn FnMut(&mut Param)) {
        for block in &mut self.encoder {
            block.params_mut().for_each(&mut *f);
        }
        self.bottleneck.params_mut().for_each(&mut *f);
        for level in &mut self.decoder {
            level.up.params_mut().into_iter().for_each(&mut *f);
            level.block.params_mut().for_each(&mut *f);
        }
        self.head.params_mut().into_iter().for_each(&mut *f);
    }

    pub fn zero_grad(&mut self) {
        self.visit_params_mut(&mut |p: &mut Param| p.zero_grad());
    }

    pub fn param_counts(&self) -> ParamCounts {
        self.params().into_iter().fold(ParamCounts::default(), |mut counts, p| {
            if p.trainable {
                counts.trainable += p.len();
            } else {
                counts.non_trainable += p.len();
            }
            counts
        })
    }

    /// Marks the encoder and bottleneck as (non-)trainable.
    pub fn freeze_encoder(&mut self, frozen: bool) {
        for block in &mut self.encoder {
            block.params_mut().for_each(|p| p.trainable = !frozen);
        }
        self.bottleneck.params_mut().for_each(|p| p.trainable = !frozen);
    }

    /// Drops cached activations from the last forward pass.
    pub fn clear_cache(&mut self) {
        for block in &mut self.encoder {
            block.clear_cache();
        }
        self.pools.iter_mut().for_each(MaxPool2d::clear_cache);
        self.bottleneck.clear_cache();
        for level in &mut self.decoder {
            level.up.clear_cache();
            level.block.clear_cache();
        }
        self.head.clear_cache();
    }

    /// Snapshot of the encoder and bottleneck weights.
    pub fn encoder_state(&self) -> EncoderWeights {
        let mut blocks = self.encoder.clone();
        blocks.push(self.bottleneck.clone());
        blocks.iter_mut().for_each(ConvBlock::clear_cache);
        EncoderWeights {
            backbone: self.spec.name.clone(),
            input_channels: self.spec.input_channels,
            filters: self.spec.filters.clone(),
            blocks,
        }
    }

    /// Copies encoder and bottleneck weights from `weights`, keeping this
    /// model's dropout rates and trainable flags.
    pub fn load_encoder_state(&mut self, weights: &EncoderWeights) -> Result<()> {
        if weights.filters != self.spec.filters
            || weights.input_channels != self.spec.input_channels
            || weights.blocks.len() != self.spec.levels()
        {
            return Err(Error::Shape(format!(
                "encoder weights for filters {:?} ({} input channels) do not fit filters {:?} ({} input channels)",
                weights.filters, weights.input_channels, self.spec.filters, self.spec.input_channels
            )));
        }
        let ours = self.encoder.iter_mut().chain(std::iter::once(&mut self.bottleneck));
        for (target, source) in ours.zip(weights.blocks.iter()) {
            for (dst, src) in target.params_mut().zip(source.params()) {
                if dst.len() != src.len() {
                    return Err(Error::Shape(format!(
                        "encoder parameter of length {} cannot load {} values",
                        dst.len(),
                        src.len()
                    )));
                }
                dst.value.copy_from_slice(&src.value);
            }
        }
        Ok(())
    }

    /// Serializes the model (spec and weights) to a JSON file.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = std::fs::File::create(path).map_err(|e| Error::io(path, e))?;
        serde_json::to_writer(std::io::BufWriter::new(file), self)?;
        Ok(())
    }

    /// Deserializes a model previously written by `save_json`.
    pub fn load_json(path: impl AsRef<Path>) -> Result<UnetModel> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| Error::io(path, e))?;
        let model: UnetModel = serde_json::from_reader(std::io::BufReader::new(file))?;
        model.spec.validate()?;
        Ok(model)
    }
}
