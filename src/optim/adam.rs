use crate::layers::param::Param;
use crate::network::unet::UnetModel;

/// Adam: gradient descent with per-parameter adaptive learning rates.
///
/// Moment buffers are matched to parameters by visiting order, so one
/// optimizer must only ever step one model.
#[derive(Debug, Clone)]
pub struct Adam {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    step: u64,
    first_moment: Vec<Vec<f64>>,
    second_moment: Vec<Vec<f64>>,
}

impl Adam {
    /// Adam with the usual defaults (β1 = 0.9, β2 = 0.999, ε = 1e-7).
    pub fn new(learning_rate: f64) -> Adam {
        Adam {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            step: 0,
            first_moment: Vec::new(),
            second_moment: Vec::new(),
        }
    }

    /// Number of updates applied so far.
    pub fn iterations(&self) -> u64 {
        self.step
    }

    /// Applies one update from the gradients accumulated in `model`.
    /// Non-trainable parameters are left untouched.
    pub fn step(&mut self, model: &mut UnetModel) {
        self.step += 1;
        let t = self.step as i32;
        let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);
        let lr_t = self.learning_rate * (1.0 - beta2.powi(t)).sqrt() / (1.0 - beta1.powi(t));
        let first = &mut self.first_moment;
        let second = &mut self.second_moment;
        let mut index = 0;

        model.visit_params_mut(&mut |param: &mut Param| {
            if first.len() <= index {
                first.push(vec![0.0; param.len()]);
                second.push(vec![0.0; param.len()]);
            }
            if param.trainable {
                let grad = param.grad_mut().to_vec();
                let (m, v) = (&mut first[index], &mut second[index]);
                for (i, g) in grad.into_iter().enumerate() {
                    m[i] = beta1 * m[i] + (1.0 - beta1) * g;
                    v[i] = beta2 * v[i] + (1.0 - beta2) * g * g;
                    param.value[i] -= lr_t * m[i] / (v[i].sqrt() + epsilon);
                }
            }
            index += 1;
        });
    }
}
