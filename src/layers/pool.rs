use crate::error::{Error, Result};
use crate::math::tensor::Tensor;

/// 2×2 max pooling, stride 2, "valid" padding (odd trailing rows/cols dropped).
#[derive(Debug, Clone, Default)]
pub struct MaxPool2d {
    input_shape: Option<[usize; 4]>,
    /// Flat input offset of the winning cell for every output cell.
    argmax: Vec<usize>,
}

impl MaxPool2d {
    pub fn new() -> MaxPool2d {
        MaxPool2d::default()
    }

    pub fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let [n, h, w, c] = input.shape;
        let (oh, ow) = (h / 2, w / 2);
        if oh == 0 || ow == 0 {
            return Err(Error::Shape(format!("cannot max-pool a {}x{} map", h, w)));
        }
        let mut out = Tensor::zeros([n, oh, ow, c]);
        let mut argmax = vec![0; out.data.len()];

        for b in 0..n {
            for y in 0..oh {
                for x in 0..ow {
                    for ch in 0..c {
                        let mut best = input.offset(b, 2 * y, 2 * x, ch);
                        for (dy, dx) in [(0, 1), (1, 0), (1, 1)] {
                            let candidate = input.offset(b, 2 * y + dy, 2 * x + dx, ch);
                            if input.data[candidate] > input.data[best] {
                                best = candidate;
                            }
                        }
                        let o = out.offset(b, y, x, ch);
                        out.data[o] = input.data[best];
                        argmax[o] = best;
                    }
                }
            }
        }

        self.input_shape = Some(input.shape);
        self.argmax = argmax;
        Ok(out)
    }

    /// Routes each output gradient back to the cell that won the max.
    pub fn backward(&mut self, grad: &Tensor) -> Result<Tensor> {
        let shape = self.input_shape.ok_or(Error::NoForwardState("max_pool2d"))?;
        if grad.data.len() != self.argmax.len() {
            return Err(Error::Shape(format!(
                "max-pool gradient {:?} does not match its output",
                grad.shape
            )));
        }
        let mut input_grad = Tensor::zeros(shape);
        for (&src, &g) in self.argmax.iter().zip(grad.data.iter()) {
            input_grad.data[src] += g;
        }
        Ok(input_grad)
    }

    pub fn clear_cache(&mut self) {
        self.input_shape = None;
        self.argmax.clear();
    }
}
