//! Classification metrics over softmax outputs.

use ndarray::{ArrayView1, ArrayView2, Axis};

/// Index of the largest entry of every row.
pub fn argmax_rows(probs: ArrayView2<f32>) -> Vec<usize> {
    probs
        .axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (i, &p)| if p > best.1 { (i, p) } else { best })
                .0
        })
        .collect()
}

/// Fraction of predictions that differ from the labels.
pub fn error_rate(predictions: &[usize], labels: ArrayView1<i32>) -> f32 {
    if predictions.is_empty() {
        return 0.0;
    }
    let wrong = predictions
        .iter()
        .zip(labels.iter())
        .filter(|(p, y)| **p as i64 != **y as i64)
        .count();
    wrong as f32 / predictions.len() as f32
}

/// Mean `-log(p[label])` over the rows of `probs`.
pub fn sparse_cross_entropy(probs: ArrayView2<f32>, labels: ArrayView1<i32>, eps: f32) -> f32 {
    let n = probs.nrows().min(labels.len());
    if n == 0 {
        return 0.0;
    }
    let total: f32 = probs
        .axis_iter(Axis(0))
        .zip(labels.iter())
        .map(|(row, &y)| {
            let p = usize::try_from(y).ok().and_then(|y| row.get(y)).copied().unwrap_or(0.0);
            -(p + eps).ln()
        })
        .sum();
    total / n as f32
}
