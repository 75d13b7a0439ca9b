pub struct BceLoss;

const EPS: f64 = 1e-12;

impl BceLoss {
    /// Scalar BCE: -mean(y·log(p+ε) + (1-y)·log(1-p+ε))
    pub fn loss(predicted: &[f64], expected: &[f64]) -> f64 {
        let n = predicted.len() as f64;
        predicted.iter().zip(expected.iter())
            .map(|(p, y)| -(y * (p + EPS).ln() + (1.0 - y) * (1.0 - p + EPS).ln()))
            .sum::<f64>() / n
    }

    /// Per-cell gradient of the mean: (p - y) / ((p + ε) · (1 - p + ε) · n)
    pub fn derivative(predicted: &[f64], expected: &[f64]) -> Vec<f64> {
        let n = predicted.len() as f64;
        predicted.iter().zip(expected.iter())
            .map(|(p, y)| (p - y) / ((p + EPS) * (1.0 - p + EPS) * n))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confident_correct_prediction_costs_little() {
        let good = BceLoss::loss(&[0.99, 0.01], &[1.0, 0.0]);
        let bad = BceLoss::loss(&[0.01, 0.99], &[1.0, 0.0]);
        assert!(good < 0.02);
        assert!(bad > 4.0);
    }

    #[test]
    fn gradient_matches_finite_difference() {
        let expected = [1.0, 0.0, 1.0];
        let predicted = [0.3, 0.6, 0.8];
        let grad = BceLoss::derivative(&predicted, &expected);
        let h = 1e-7;
        let mut plus = predicted;
        plus[1] += h;
        let mut minus = predicted;
        minus[1] -= h;
        let numeric = (BceLoss::loss(&plus, &expected) - BceLoss::loss(&minus, &expected)) / (2.0 * h);
        assert!((numeric - grad[1]).abs() < 1e-5);
    }
}
