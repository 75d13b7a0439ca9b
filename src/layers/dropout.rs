use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Serialize, Deserialize};

use crate::error::Result;
use crate::math::tensor::Tensor;

/// Inverted dropout: in training mode each unit is zeroed with probability
/// `rate` and survivors are scaled by `1 / (1 - rate)`; in inference mode it
/// is the identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dropout {
    pub rate: f64,
    #[serde(skip)]
    mask: Option<Vec<f64>>,
    #[serde(skip)]
    rng: Option<StdRng>,
}

impl Dropout {
    pub fn new(rate: f64, seed: Option<u64>) -> Dropout {
        Dropout { rate, mask: None, rng: seed.map(StdRng::seed_from_u64) }
    }

    pub fn forward(&mut self, input: &Tensor, training: bool) -> Tensor {
        if !training || self.rate <= 0.0 {
            self.mask = None;
            return input.clone();
        }
        let keep = 1.0 - self.rate;
        let scale = 1.0 / keep;
        let rng = self.rng.get_or_insert_with(StdRng::from_entropy);
        let mask: Vec<f64> = (0..input.data.len())
            .map(|_| if rng.gen::<f64>() < keep { scale } else { 0.0 })
            .collect();
        let data = input.data.iter().zip(mask.iter()).map(|(v, m)| v * m).collect();
        self.mask = Some(mask);
        Tensor { shape: input.shape, data }
    }

    pub fn backward(&self, grad: &Tensor) -> Result<Tensor> {
        Ok(match &self.mask {
            Some(mask) => Tensor {
                shape: grad.shape,
                data: grad.data.iter().zip(mask.iter()).map(|(g, m)| g * m).collect(),
            },
            None => grad.clone(),
        })
    }

    pub fn clear_cache(&mut self) {
        self.mask = None;
    }
}
