use serde::{Serialize, Deserialize};

/// One trainable tensor of a layer together with its accumulated gradient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub value: Vec<f64>,
    #[serde(skip)]
    pub grad: Vec<f64>,
    #[serde(default = "default_trainable")]
    pub trainable: bool,
}

fn default_trainable() -> bool {
    true
}

impl Param {
    pub fn new(value: Vec<f64>) -> Param {
        let grad = vec![0.0; value.len()];
        Param { value, grad, trainable: true }
    }

    pub fn zeros(len: usize) -> Param {
        Param::new(vec![0.0; len])
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn zero_grad(&mut self) {
        self.grad.clear();
        self.grad.resize(self.value.len(), 0.0);
    }

    /// Gradient buffer sized to the value; deserialized params start without one.
    pub fn grad_mut(&mut self) -> &mut [f64] {
        if self.grad.len() != self.value.len() {
            self.zero_grad();
        }
        &mut self.grad
    }
}
