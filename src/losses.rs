//! Symbolic loss terms.
//!
//! Each function appends the nodes computing one scalar to the graph of its
//! inputs. Nothing is evaluated here.

use crate::asg::AsgResult;
use crate::tensor::Tensor;

/// Mean absolute error: `mean(|target - prediction|)`.
pub fn abs_loss(target: &Tensor, prediction: &Tensor) -> Tensor {
    (target - prediction).abs().mean()
}

/// Element-wise squared error, not reduced.
pub fn squared_error(target: &Tensor, prediction: &Tensor) -> Tensor {
    (target - prediction).square()
}

/// Mean squared error.
pub fn mse_loss(target: &Tensor, prediction: &Tensor) -> Tensor {
    squared_error(target, prediction).mean()
}

/// Squared error averaged over the elements where `mask` is set.
///
/// Formula: `sum((target - prediction)^2 * mask) / sum(mask)`.
pub fn masked_mse_loss(target: &Tensor, prediction: &Tensor, mask: &Tensor) -> Tensor {
    let masked = &squared_error(target, prediction) * mask;
    &masked.sum() / &mask.sum()
}

/// Mean sparse softmax cross-entropy of `[N, C]` logits against `[N]` labels.
pub fn sparse_cross_entropy(logits: &Tensor, labels: &Tensor) -> AsgResult<Tensor> {
    Tensor::sparse_softmax_cross_entropy(logits, labels)
}

// ============================================================================
// Regularization
// ============================================================================

/// `decay * sum(|w|)` over every weight.
pub fn l1_regularization(weights: &[Tensor], decay: f32) -> Option<Tensor> {
    let first = weights.first()?;
    let total = weights[1..].iter().fold(first.abs().sum(), |acc, w| &acc + &w.abs().sum());
    Some(&total * &Tensor::scalar(&first.context, decay))
}

/// `decay * sum(w^2) / 2` over every weight.
pub fn l2_regularization(weights: &[Tensor], decay: f32) -> Option<Tensor> {
    let first = weights.first()?;
    let total = weights[1..].iter().fold(first.square().sum(), |acc, w| &acc + &w.square().sum());
    Some(&total * &Tensor::scalar(&first.context, decay / 2.0))
}
