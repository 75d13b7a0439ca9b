use serde::{Serialize, Deserialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivationFunction {
    Sigmoid,
    #[serde(rename = "relu")]
    ReLU,
    Identity,
    Elu { alpha: f64 },
    Tanh,
}

impl ActivationFunction {
    /// ELU with the conventional alpha of 1.0.
    pub const ELU: ActivationFunction = ActivationFunction::Elu { alpha: 1.0 };

    /// Element-wise activation.
    pub fn function(&self, x: f64) -> f64 {
        match self {
            ActivationFunction::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            ActivationFunction::ReLU => if x > 0.0 { x } else { 0.0 },
            ActivationFunction::Identity => x,
            ActivationFunction::Elu { alpha } => {
                if x > 0.0 { x } else { alpha * (x.exp() - 1.0) }
            }
            ActivationFunction::Tanh => x.tanh(),
        }
    }

    /// Element-wise derivative, evaluated at the pre-activation `x`.
    pub fn derivative(&self, x: f64) -> f64 {
        match self {
            ActivationFunction::Sigmoid => {
                let fx = self.function(x);
                fx * (1.0 - fx)
            }
            ActivationFunction::ReLU => if x > 0.0 { 1.0 } else { 0.0 },
            ActivationFunction::Identity => 1.0,
            ActivationFunction::Elu { alpha } => {
                if x > 0.0 { 1.0 } else { alpha * x.exp() }
            }
            ActivationFunction::Tanh => {
                let t = x.tanh();
                1.0 - t * t
            }
        }
    }

    /// Applies the activation to every pre-activation value.
    pub fn apply(&self, pre: &[f64]) -> Vec<f64> {
        pre.iter().map(|&x| self.function(x)).collect()
    }

    /// Chains `grad` (w.r.t. the activation output) through the derivative at `pre`.
    pub fn backprop(&self, pre: &[f64], grad: &[f64]) -> Vec<f64> {
        pre.iter().zip(grad.iter()).map(|(&z, &g)| g * self.derivative(z)).collect()
    }
}
