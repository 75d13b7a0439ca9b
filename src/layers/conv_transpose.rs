use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::error::{Error, Result};
use crate::layers::param::Param;
use crate::math::tensor::Tensor;

/// 2×2 transposed convolution with stride 2: doubles height and width.
///
/// Each output cell receives exactly one input cell's contribution, so the
/// layer is linear with no activation. Weights are `[ky][kx][in][out]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvTranspose2d {
    pub in_channels: usize,
    pub out_channels: usize,
    pub weights: Param,
    pub biases: Param,
    #[serde(skip)]
    input: Option<Tensor>,
}

const FACTOR: usize = 2;

impl ConvTranspose2d {
    pub fn new<R: Rng>(in_channels: usize, out_channels: usize, rng: &mut R) -> ConvTranspose2d {
        let fan_in = FACTOR * FACTOR * in_channels;
        let fan_out = FACTOR * FACTOR * out_channels;
        let weights = Tensor::glorot_uniform(fan_in * out_channels, fan_in, fan_out, rng);
        ConvTranspose2d {
            in_channels,
            out_channels,
            weights: Param::new(weights),
            biases: Param::zeros(out_channels),
            input: None,
        }
    }

    pub fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        if input.channels() != self.in_channels {
            return Err(Error::Shape(format!(
                "transposed conv expects {} input channels, got {}",
                self.in_channels,
                input.channels()
            )));
        }
        let [n, h, w, cin] = input.shape;
        let cout = self.out_channels;
        let mut out = Tensor::zeros([n, h * FACTOR, w * FACTOR, cout]);

        for b in 0..n {
            for y in 0..h {
                for x in 0..w {
                    let in_base = input.offset(b, y, x, 0);
                    let cell = &input.data[in_base..in_base + cin];
                    for ky in 0..FACTOR {
                        for kx in 0..FACTOR {
                            let out_base = out.offset(b, y * FACTOR + ky, x * FACTOR + kx, 0);
                            let target = &mut out.data[out_base..out_base + cout];
                            target.copy_from_slice(&self.biases.value);
                            for (i, &v) in cell.iter().enumerate() {
                                let w_base = ((ky * FACTOR + kx) * cin + i) * cout;
                                let kernel_row = &self.weights.value[w_base..w_base + cout];
                                for (acc, wv) in target.iter_mut().zip(kernel_row) {
                                    *acc += v * wv;
                                }
                            }
                        }
                    }
                }
            }
        }

        self.input = Some(input.clone());
        Ok(out)
    }

    pub fn backward(&mut self, grad: &Tensor) -> Result<Tensor> {
        self.weights.grad_mut();
        self.biases.grad_mut();
        let input = self.input.as_ref().ok_or(Error::NoForwardState("conv_transpose2d"))?;
        let [n, h, w, cin] = input.shape;
        let cout = self.out_channels;
        if grad.shape != [n, h * FACTOR, w * FACTOR, cout] {
            return Err(Error::Shape(format!(
                "transposed conv gradient {:?} does not match its output",
                grad.shape
            )));
        }

        let mut input_grad = Tensor::zeros(input.shape);
        let kernel = &self.weights.value;
        let kernel_grad = &mut self.weights.grad;
        let bias_grad = &mut self.biases.grad;

        for b in 0..n {
            for y in 0..h {
                for x in 0..w {
                    let in_base = input.offset(b, y, x, 0);
                    for ky in 0..FACTOR {
                        for kx in 0..FACTOR {
                            let out_base = grad.offset(b, y * FACTOR + ky, x * FACTOR + kx, 0);
                            let g = &grad.data[out_base..out_base + cout];
                            for (bg, gv) in bias_grad.iter_mut().zip(g) {
                                *bg += gv;
                            }
                            for i in 0..cin {
                                let v = input.data[in_base + i];
                                let w_base = ((ky * FACTOR + kx) * cin + i) * cout;
                                let mut acc = 0.0;
                                for o in 0..cout {
                                    acc += kernel[w_base + o] * g[o];
                                    kernel_grad[w_base + o] += v * g[o];
                                }
                                input_grad.data[in_base + i] += acc;
                            }
                        }
                    }
                }
            }
        }

        Ok(input_grad)
    }

    pub fn params_mut(&mut self) -> [&mut Param; 2] {
        [&mut self.weights, &mut self.biases]
    }

    pub fn params(&self) -> [&Param; 2] {
        [&self.weights, &self.biases]
    }

    pub fn clear_cache(&mut self) {
        self.input = None;
    }
}
