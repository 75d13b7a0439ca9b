use crate::error::{Error, Result};
use crate::math::map_batch::LabelBatch;

/// Per-sample Intersection-over-Union of `class_id` between two batches of
/// discrete label maps.
///
/// Both maps are binarized against `class_id`; a sample where the class is
/// absent from both scores 1.0. Predictions must already be discretized
/// (see `MapBatch::threshold`).
pub fn iou(class_id: i32, y_true: &LabelBatch, y_pred: &LabelBatch) -> Result<Vec<f64>> {
    if !y_true.same_dims(y_pred) {
        return Err(Error::Shape(format!(
            "iou needs equal batches, got {}x{}x{} and {}x{}x{}",
            y_true.batch, y_true.height, y_true.width, y_pred.batch, y_pred.height, y_pred.width
        )));
    }

    Ok((0..y_true.batch)
        .map(|i| {
            let (mut union, mut intersection) = (0usize, 0usize);
            for (&t, &p) in y_true.sample(i).iter().zip(y_pred.sample(i)) {
                let hits = u8::from(t == class_id) + u8::from(p == class_id);
                if hits >= 1 {
                    union += 1;
                }
                if hits == 2 {
                    intersection += 1;
                }
            }
            if union == 0 { 1.0 } else { intersection as f64 / union as f64 }
        })
        .collect())
}

/// Per-sample IoU averaged over `classes`, which must not be empty.
pub fn mean_iou(classes: &[i32], y_true: &LabelBatch, y_pred: &LabelBatch) -> Result<Vec<f64>> {
    if classes.is_empty() {
        return Err(Error::Config("mean_iou needs at least one class".to_owned()));
    }
    let mut totals = vec![0.0; y_true.batch];
    for &class_id in classes {
        for (total, score) in totals.iter_mut().zip(iou(class_id, y_true, y_pred)?) {
            *total += score;
        }
    }
    let n = classes.len() as f64;
    Ok(totals.into_iter().map(|t| t / n).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::map_batch::MapBatch;

    fn labels(maps: &[Vec<Vec<i32>>]) -> LabelBatch {
        MapBatch::from_maps(maps).unwrap()
    }

    #[test]
    fn perfect_match_scores_one() {
        let y = labels(&[vec![vec![0, 1], vec![1, 1]]]);
        assert_eq!(iou(1, &y, &y).unwrap(), vec![1.0]);
    }

    #[test]
    fn absent_class_is_vacuous_agreement() {
        let y = labels(&[vec![vec![0, 0], vec![0, 0]]]);
        assert_eq!(iou(1, &y, &y).unwrap(), vec![1.0]);
    }

    #[test]
    fn partial_overlap_per_sample() {
        let y_true = labels(&[
            vec![vec![1, 1], vec![0, 0]],
            vec![vec![2, 2], vec![2, 2]],
        ]);
        let y_pred = labels(&[
            vec![vec![1, 0], vec![1, 0]],
            vec![vec![0, 0], vec![0, 0]],
        ]);
        let scores = iou(1, &y_true, &y_pred).unwrap();
        assert!((scores[0] - 1.0 / 3.0).abs() < 1e-12);
        // class 1 absent from both maps of the second sample
        assert_eq!(scores[1], 1.0);
        assert_eq!(iou(2, &y_true, &y_pred).unwrap()[1], 0.0);
    }

    #[test]
    fn scores_stay_within_unit_interval() {
        let y_true = labels(&[vec![vec![0, 1, 2], vec![2, 1, 0]]]);
        for pred in [[0, 0, 0], [1, 2, 0], [2, 2, 2], [1, 1, 1]] {
            let y_pred = labels(&[vec![pred.to_vec(), pred.iter().rev().copied().collect()]]);
            for class_id in 0..3 {
                let score = iou(class_id, &y_true, &y_pred).unwrap()[0];
                assert!((0.0..=1.0).contains(&score));
            }
        }
    }

    #[test]
    fn mismatched_batches_are_rejected() {
        let a = labels(&[vec![vec![0, 1]]]);
        let b = labels(&[vec![vec![0], vec![1]]]);
        assert!(iou(1, &a, &b).is_err());
    }

    #[test]
    fn mean_over_classes() {
        let y_true = labels(&[vec![vec![0, 1], vec![1, 1]]]);
        let y_pred = labels(&[vec![vec![0, 0], vec![1, 1]]]);
        // class 0: 1/2, class 1: 2/3
        let mean = mean_iou(&[0, 1], &y_true, &y_pred).unwrap();
        assert!((mean[0] - (0.5 + 2.0 / 3.0) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn mean_over_no_classes_is_rejected() {
        let y = labels(&[vec![vec![0, 1]], vec![vec![1, 1]]]);
        assert!(matches!(mean_iou(&[], &y, &y), Err(Error::Config(_))));
    }
}
