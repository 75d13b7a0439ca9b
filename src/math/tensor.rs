use rand::Rng;
use serde::{Serialize, Deserialize};
use std::f64::consts::PI;

use crate::error::{Error, Result};
use crate::math::map_batch::MapBatch;

/// Dense 4-D tensor in NHWC layout (batch, height, width, channels).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    pub shape: [usize; 4],
    pub data: Vec<f64>,
}

impl Tensor {
    pub fn zeros(shape: [usize; 4]) -> Tensor {
        Tensor { shape, data: vec![0.0; shape.iter().product()] }
    }

    pub fn from_vec(shape: [usize; 4], data: Vec<f64>) -> Result<Tensor> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(Error::Shape(format!(
                "tensor of shape {:?} needs {} values, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Tensor { shape, data })
    }

    /// Samples a single value from N(0, 1) using the Box-Muller transform.
    fn sample_standard_normal<R: Rng>(rng: &mut R) -> f64 {
        // Both uniforms in (0, 1] to avoid log(0).
        let u1: f64 = 1.0 - rng.gen::<f64>();
        let u2: f64 = 1.0 - rng.gen::<f64>();
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }

    /// He initialization: N(0, sqrt(2 / fan_in)), truncated at two standard
    /// deviations. Used ahead of ELU/ReLU convolutions.
    pub fn he_normal<R: Rng>(len: usize, fan_in: usize, rng: &mut R) -> Vec<f64> {
        let std_dev = (2.0 / fan_in as f64).sqrt();
        (0..len)
            .map(|_| loop {
                let z = Tensor::sample_standard_normal(rng);
                if z.abs() <= 2.0 {
                    break z * std_dev;
                }
            })
            .collect()
    }

    /// Glorot (Xavier) uniform initialization: U(-l, l), l = sqrt(6 / (fan_in + fan_out)).
    pub fn glorot_uniform<R: Rng>(len: usize, fan_in: usize, fan_out: usize, rng: &mut R) -> Vec<f64> {
        let limit = (6.0 / (fan_in + fan_out) as f64).sqrt();
        (0..len).map(|_| rng.gen_range(-limit..limit)).collect()
    }

    pub fn batch(&self) -> usize { self.shape[0] }
    pub fn height(&self) -> usize { self.shape[1] }
    pub fn width(&self) -> usize { self.shape[2] }
    pub fn channels(&self) -> usize { self.shape[3] }

    /// Flat offset of element (n, y, x, c).
    #[inline]
    pub fn offset(&self, n: usize, y: usize, x: usize, c: usize) -> usize {
        ((n * self.shape[1] + y) * self.shape[2] + x) * self.shape[3] + c
    }

    pub fn get(&self, n: usize, y: usize, x: usize, c: usize) -> f64 {
        self.data[self.offset(n, y, x, c)]
    }

    pub fn map<F>(&self, functor: F) -> Tensor
    where
        F: Fn(f64) -> f64,
    {
        Tensor { shape: self.shape, data: self.data.iter().map(|&x| functor(x)).collect() }
    }

    pub fn scale(&self, factor: f64) -> Tensor {
        self.map(|x| x * factor)
    }

    pub fn add_assign(&mut self, other: &Tensor) -> Result<()> {
        if self.shape != other.shape {
            return Err(Error::Shape(format!(
                "cannot add {:?} to {:?}",
                other.shape, self.shape
            )));
        }
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += b;
        }
        Ok(())
    }

    /// Removes `margin` cells from each of the four spatial borders.
    pub fn crop_spatial(&self, margin: usize) -> Result<Tensor> {
        let [n, h, w, c] = self.shape;
        if h <= 2 * margin || w <= 2 * margin {
            return Err(Error::Shape(format!(
                "cannot crop {} cells from each side of a {}x{} image",
                margin, h, w
            )));
        }
        let (oh, ow) = (h - 2 * margin, w - 2 * margin);
        let mut data = Vec::with_capacity(n * oh * ow * c);
        for b in 0..n {
            for y in margin..h - margin {
                let start = self.offset(b, y, margin, 0);
                data.extend_from_slice(&self.data[start..start + ow * c]);
            }
        }
        Ok(Tensor { shape: [n, oh, ow, c], data })
    }

    /// Stacks `self` and `other` along the channel axis (self first).
    pub fn concat_channels(&self, other: &Tensor) -> Result<Tensor> {
        let [n, h, w, ca] = self.shape;
        if other.shape[..3] != self.shape[..3] {
            return Err(Error::Shape(format!(
                "cannot concatenate {:?} with {:?}",
                self.shape, other.shape
            )));
        }
        let cb = other.shape[3];
        let mut data = Vec::with_capacity(n * h * w * (ca + cb));
        for (left, right) in self.data.chunks(ca).zip(other.data.chunks(cb)) {
            data.extend_from_slice(left);
            data.extend_from_slice(right);
        }
        Ok(Tensor { shape: [n, h, w, ca + cb], data })
    }

    /// Inverse of `concat_channels`: the first `left_channels` go left.
    pub fn split_channels(&self, left_channels: usize) -> Result<(Tensor, Tensor)> {
        let [n, h, w, c] = self.shape;
        if left_channels > c {
            return Err(Error::Shape(format!(
                "cannot split {} channels off a {}-channel tensor",
                left_channels, c
            )));
        }
        let right_channels = c - left_channels;
        let mut left = Vec::with_capacity(n * h * w * left_channels);
        let mut right = Vec::with_capacity(n * h * w * right_channels);
        for cell in self.data.chunks(c) {
            left.extend_from_slice(&cell[..left_channels]);
            right.extend_from_slice(&cell[left_channels..]);
        }
        Ok((
            Tensor { shape: [n, h, w, left_channels], data: left },
            Tensor { shape: [n, h, w, right_channels], data: right },
        ))
    }

    /// Selects one channel as a batch of 2-D maps.
    pub fn channel(&self, channel: usize) -> Result<MapBatch<f64>> {
        let [n, h, w, c] = self.shape;
        if channel >= c {
            return Err(Error::Shape(format!(
                "channel {} out of range for a {}-channel tensor",
                channel, c
            )));
        }
        let data = self.data.iter().skip(channel).step_by(c).copied().collect();
        MapBatch::new(n, h, w, data)
    }

    /// Embeds `map` as channel `channel` of an otherwise zero tensor.
    pub fn from_channel(map: &MapBatch<f64>, channels: usize, channel: usize) -> Result<Tensor> {
        if channel >= channels {
            return Err(Error::Shape(format!(
                "channel {} out of range for a {}-channel tensor",
                channel, channels
            )));
        }
        let mut out = Tensor::zeros([map.batch, map.height, map.width, channels]);
        for (i, &v) in map.data.iter().enumerate() {
            out.data[i * channels + channel] = v;
        }
        Ok(out)
    }
}

impl Default for Tensor {
    fn default() -> Self {
        Tensor { shape: [0; 4], data: vec![] }
    }
}
