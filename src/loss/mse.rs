pub struct MseLoss;

impl MseLoss {
    /// Scalar MSE over every cell: mean((expected - predicted)²)
    pub fn loss(predicted: &[f64], expected: &[f64]) -> f64 {
        let n = predicted.len() as f64;
        predicted.iter().zip(expected.iter())
            .map(|(p, y)| (y - p).powi(2))
            .sum::<f64>() / n
    }

    /// Per-cell gradient of the mean: 2·(predicted - expected) / n
    pub fn derivative(predicted: &[f64], expected: &[f64]) -> Vec<f64> {
        let scale = 2.0 / predicted.len() as f64;
        predicted.iter().zip(expected.iter())
            .map(|(p, y)| scale * (p - y))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loss_and_gradient() {
        let predicted = [0.5, 1.0, 0.0, 0.25];
        let expected = [1.0, 1.0, 0.0, 0.0];
        assert!((MseLoss::loss(&predicted, &expected) - 0.078125).abs() < 1e-12);
        assert_eq!(MseLoss::derivative(&predicted, &expected), vec![-0.25, 0.0, 0.0, 0.125]);
    }
}
