use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::activation::activation::ActivationFunction;
use crate::error::{Error, Result};
use crate::layers::param::Param;
use crate::math::tensor::Tensor;

/// Weight initialization scheme for convolution kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Init {
    HeNormal,
    GlorotUniform,
}

/// Stride-1 2-D convolution with "same" zero padding and a fused activation.
///
/// Kernel weights are laid out `[ky][kx][in][out]`; `kernel` must be odd so
/// the output keeps the input's spatial size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conv2d {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel: usize,
    pub weights: Param,
    pub biases: Param,
    pub activator: ActivationFunction,
    #[serde(skip)]
    input: Option<Tensor>,
    #[serde(skip)]
    pre: Option<Tensor>,
}

impl Conv2d {
    pub fn new<R: Rng>(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        activation: ActivationFunction,
        init: Init,
        rng: &mut R,
    ) -> Conv2d {
        let fan_in = kernel * kernel * in_channels;
        let fan_out = kernel * kernel * out_channels;
        let len = fan_in * out_channels;
        let weights = match init {
            Init::HeNormal => Tensor::he_normal(len, fan_in, rng),
            Init::GlorotUniform => Tensor::glorot_uniform(len, fan_in, fan_out, rng),
        };
        Conv2d {
            in_channels,
            out_channels,
            kernel,
            weights: Param::new(weights),
            biases: Param::zeros(out_channels),
            activator: activation,
            input: None,
            pre: None,
        }
    }

    pub fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        if input.channels() != self.in_channels {
            return Err(Error::Shape(format!(
                "conv2d expects {} input channels, got {}",
                self.in_channels,
                input.channels()
            )));
        }
        let [n, h, w, cin] = input.shape;
        let (k, cout) = (self.kernel, self.out_channels);
        let pad = (k / 2) as isize;
        let mut z = Tensor::zeros([n, h, w, cout]);

        for b in 0..n {
            for y in 0..h {
                for x in 0..w {
                    let out_base = z.offset(b, y, x, 0);
                    let out = &mut z.data[out_base..out_base + cout];
                    out.copy_from_slice(&self.biases.value);
                    for ky in 0..k {
                        let iy = y as isize + ky as isize - pad;
                        if iy < 0 || iy >= h as isize {
                            continue;
                        }
                        for kx in 0..k {
                            let ix = x as isize + kx as isize - pad;
                            if ix < 0 || ix >= w as isize {
                                continue;
                            }
                            let in_base = input.offset(b, iy as usize, ix as usize, 0);
                            for i in 0..cin {
                                let v = input.data[in_base + i];
                                if v == 0.0 {
                                    continue;
                                }
                                let w_base = ((ky * k + kx) * cin + i) * cout;
                                let kernel_row = &self.weights.value[w_base..w_base + cout];
                                for (acc, wv) in out.iter_mut().zip(kernel_row) {
                                    *acc += v * wv;
                                }
                            }
                        }
                    }
                }
            }
        }

        let activated = Tensor { shape: z.shape, data: self.activator.apply(&z.data) };
        self.input = Some(input.clone());
        self.pre = Some(z);
        Ok(activated)
    }

    /// Accumulates parameter gradients and returns ∂L/∂input.
    /// `grad` is ∂L/∂a for this layer's activated output.
    pub fn backward(&mut self, grad: &Tensor) -> Result<Tensor> {
        self.weights.grad_mut();
        self.biases.grad_mut();
        let input = self.input.as_ref().ok_or(Error::NoForwardState("conv2d"))?;
        let pre = self.pre.as_ref().ok_or(Error::NoForwardState("conv2d"))?;
        if grad.shape != pre.shape {
            return Err(Error::Shape(format!(
                "conv2d gradient {:?} does not match output {:?}",
                grad.shape, pre.shape
            )));
        }

        // δ = grad ⊙ σ'(z)
        let delta = self.activator.backprop(&pre.data, &grad.data);
        let [n, h, w, cin] = input.shape;
        let (k, cout) = (self.kernel, self.out_channels);
        let pad = (k / 2) as isize;
        let mut input_grad = Tensor::zeros(input.shape);
        let kernel = &self.weights.value;
        let kernel_grad = &mut self.weights.grad;
        let bias_grad = &mut self.biases.grad;

        for b in 0..n {
            for y in 0..h {
                for x in 0..w {
                    let out_base = ((b * h + y) * w + x) * cout;
                    let d = &delta[out_base..out_base + cout];
                    for (bg, dv) in bias_grad.iter_mut().zip(d) {
                        *bg += dv;
                    }
                    for ky in 0..k {
                        let iy = y as isize + ky as isize - pad;
                        if iy < 0 || iy >= h as isize {
                            continue;
                        }
                        for kx in 0..k {
                            let ix = x as isize + kx as isize - pad;
                            if ix < 0 || ix >= w as isize {
                                continue;
                            }
                            let in_base = input.offset(b, iy as usize, ix as usize, 0);
                            for i in 0..cin {
                                let v = input.data[in_base + i];
                                let w_base = ((ky * k + kx) * cin + i) * cout;
                                let mut acc = 0.0;
                                for o in 0..cout {
                                    acc += kernel[w_base + o] * d[o];
                                    kernel_grad[w_base + o] += v * d[o];
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

    /// Drops cached activations.
    pub fn clear_cache(&mut self) {
        self.input = None;
        self.pre = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn sample_input() -> Tensor {
        let data = (0..2 * 4 * 4 * 2).map(|v| ((v * 7 % 11) as f64 - 5.0) / 5.0).collect();
        Tensor::from_vec([2, 4, 4, 2], data).unwrap()
    }

    // Loss = sum(output * weighting), so ∂L/∂output = weighting.
    fn weighted_loss(layer: &mut Conv2d, input: &Tensor, weighting: &Tensor) -> f64 {
        let out = layer.forward(input).unwrap();
        out.data.iter().zip(weighting.data.iter()).map(|(a, b)| a * b).sum()
    }

    #[test]
    fn identity_kernel_copies_input() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut conv = Conv2d::new(1, 1, 3, ActivationFunction::Identity, Init::HeNormal, &mut rng);
        conv.weights.value = vec![0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0];
        let input = Tensor::from_vec([1, 3, 3, 1], (1..=9).map(f64::from).collect()).unwrap();
        let out = conv.forward(&input).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn gradients_match_finite_differences() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut conv = Conv2d::new(2, 3, 3, ActivationFunction::ELU, Init::HeNormal, &mut rng);
        let input = sample_input();
        let out = conv.forward(&input).unwrap();
        let weighting = Tensor::from_vec(
            out.shape,
            (0..out.data.len()).map(|v| ((v % 5) as f64 - 2.0) / 3.0).collect(),
        )
        .unwrap();
        let input_grad = conv.backward(&weighting).unwrap();

        let h = 1e-6;
        for idx in [0, 13, 37] {
            let original = conv.weights.value[idx];
            conv.weights.value[idx] = original + h;
            let plus = weighted_loss(&mut conv, &input, &weighting);
            conv.weights.value[idx] = original - h;
            let minus = weighted_loss(&mut conv, &input, &weighting);
            conv.weights.value[idx] = original;
            let numeric = (plus - minus) / (2.0 * h);
            assert!((numeric - conv.weights.grad[idx]).abs() < 1e-4);
        }

        for idx in [3, 20, 61] {
            let mut shifted = input.clone();
            shifted.data[idx] += h;
            let plus = weighted_loss(&mut conv, &shifted, &weighting);
            shifted.data[idx] -= 2.0 * h;
            let minus = weighted_loss(&mut conv, &shifted, &weighting);
            let numeric = (plus - minus) / (2.0 * h);
            assert!((numeric - input_grad.data[idx]).abs() < 1e-4);
        }
    }

    #[test]
    fn backward_without_forward_fails() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut conv = Conv2d::new(1, 1, 1, ActivationFunction::Sigmoid, Init::GlorotUniform, &mut rng);
        let grad = Tensor::zeros([1, 2, 2, 1]);
        assert!(matches!(conv.backward(&grad), Err(Error::NoForwardState(_))));
    }
}
