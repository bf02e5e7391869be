//! Activations, softmax and losses as free functions.
//!
//! Activations are thin wrappers over the tensor methods. Losses validate
//! their inputs, compute the forward value with the CPU kernels and record
//! a single node whose backward rule sends gradient to the prediction only.

use crate::buffer::{Buffer, cpu};
use crate::error::{Error, Result};
use crate::graph::Op;
use crate::tensor::Tensor;

/// Hyperbolic tangent.
pub fn tanh(x: &Tensor) -> Tensor {
    x.tanh()
}

/// Logistic sigmoid.
pub fn sigmoid(x: &Tensor) -> Tensor {
    x.sigmoid()
}

/// Rectified linear unit.
pub fn relu(x: &Tensor) -> Tensor {
    x.relu()
}

/// Softmax along `axis`, composed from differentiable primitives:
///
/// `exp(x - max(x)) / sum(exp(x - max(x)))`
///
/// Subtracting the row maximum keeps large inputs finite, and `-inf` inputs
/// come out as exactly 0 with a zero (not NaN) gradient, which is what a
/// causal attention mask needs.
///
/// # Errors
/// [`Error::Axis`] for an out-of-range axis.
///
/// # Example
/// ```
/// use briny_grad::{nn::functional::softmax, tensor};
/// let x = tensor!([[1.0, 1.0, f64::NEG_INFINITY]]);
/// let p = softmax(&x, -1).unwrap();
/// assert_eq!(p.data(), vec![0.5, 0.5, 0.0]);
/// ```
pub fn softmax(x: &Tensor, axis: isize) -> Result<Tensor> {
    let (m, _) = x.max(axis, true)?;
    let e = x.sub(&m)?.exp();
    let total = e.sum(Some(axis), true)?;
    e.div(&total)
}

/// Mean squared error `mean((prediction - target)^2)` as a rank-0 tensor.
///
/// Only `prediction` receives a gradient: `2 * (prediction - target) / N`.
///
/// # Errors
/// [`Error::Shape`] when the two shapes differ.
pub fn mse_loss(prediction: &Tensor, target: &Tensor) -> Result<Tensor> {
    if prediction.shape() != target.shape() {
        return Err(Error::shape("mse_loss", prediction.shape(), target.shape(), 0));
    }
    let loss = cpu::mse(&prediction.data(), &target.data());
    Ok(Tensor::from_op(
        Buffer::scalar(loss),
        Op::MseLoss,
        vec![prediction.clone(), target.clone()],
    ))
}

/// Cross-entropy between `(N, C)` logits and `N` integer class labels,
/// averaged over the batch.
///
/// The labels are ordinary tensors holding integral values. A single sample
/// may be passed as `(C,)` logits with a one-element label tensor.
///
/// The result is a rank-0 tensor, so calling `sum` on it before `backward`
/// changes nothing. The gradient of the logits is
/// `(softmax(logits) - one_hot(labels)) / N`.
///
/// # Errors
/// - [`Error::Shape`] when the logits are not 1-D/2-D or the label count
///   differs from the batch size.
/// - [`Error::Label`] for non-integral or out-of-range labels.
pub fn cross_entropy(logits: &Tensor, labels: &Tensor) -> Result<Tensor> {
    let (rows, classes) = match *logits.shape() {
        [c] => (1, c),
        [n, c] => (n, c),
        _ => return Err(Error::shape("cross_entropy", logits.shape(), labels.shape(), 0)),
    };
    if labels.numel() != rows {
        return Err(Error::shape("cross_entropy", logits.shape(), labels.shape(), 0));
    }

    let labels_idx = labels
        .data()
        .into_iter()
        .map(|label| class_index(label, classes))
        .collect::<Result<Vec<usize>>>()?;

    let flat = logits.data();
    let (probs, lse) = cpu::softmax_rows(&flat, classes);
    let total: f64 = labels_idx
        .iter()
        .enumerate()
        .map(|(row, &label)| lse[row] - flat[row * classes + label])
        .sum();
    #[allow(clippy::cast_precision_loss)]
    let loss = total / rows as f64;

    let probs = Buffer::new(probs, [rows, classes])?;
    Ok(Tensor::from_op(
        Buffer::scalar(loss),
        Op::CrossEntropy {
            probs,
            labels: labels_idx,
        },
        vec![logits.clone(), labels.clone()],
    ))
}

fn class_index(label: f64, classes: usize) -> Result<usize> {
    let err = || Error::Label {
        label,
        num_classes: classes,
    };
    if label.fract() != 0.0 || label < 0.0 {
        return Err(err());
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let index = label as usize;
    if index < classes { Ok(index) } else { Err(err()) }
}
