//! Finite-difference gradient checking.
//!
//! [`check_gradients`] runs a function of tensors once with the autograd
//! engine and then perturbs every input element by `±epsilon`, comparing
//! the backward gradient with the central difference
//!
//! `(f(x + h) - f(x - h)) / 2h`
//!
//! of `sum(f(inputs))`. Non-scalar outputs are therefore checked against an
//! all-ones seed. The perturbed evaluations run under [`no_grad`] and never
//! touch the caller's tensors.
//!
//! # Example
//!
//! ```rust
//! use briny_grad::gradcheck::{check_gradients, GradCheckConfig};
//! use briny_grad::tensor;
//!
//! let x = tensor!([[0.3, -1.2], [2.0, 0.7]]; requires_grad);
//! let report = check_gradients(|t| Ok(t[0].tanh()), &[x], &GradCheckConfig::default()).unwrap();
//! assert!(report.passed, "{report:?}");
//! ```

use crate::approx::isclose;
use crate::buffer::Buffer;
use crate::config::no_grad;
use crate::error::{Error, Result};
use crate::tensor::Tensor;
use tracing::debug;

/// Gradient checking configuration.
#[derive(Debug, Clone, Copy)]
pub struct GradCheckConfig {
    /// Step size for finite differences (default: 1e-6).
    pub epsilon: f64,

    /// Relative tolerance for the comparison (default: 1e-4).
    pub rtol: f64,

    /// Absolute tolerance for the comparison (default: 1e-5).
    pub atol: f64,
}

impl Default for GradCheckConfig {
    fn default() -> Self {
        Self {
            epsilon: 1e-6,
            rtol: 1e-4,
            atol: 1e-5,
        }
    }
}

/// Outcome of [`check_gradients`].
#[derive(Debug, Clone)]
pub struct GradCheckReport {
    /// Largest `|analytical - numerical|` over all checked elements.
    pub max_abs_diff: f64,

    /// Number of elements checked.
    pub num_elements: usize,

    /// Number of elements outside tolerance.
    pub num_failures: usize,

    /// `true` when nothing failed.
    pub passed: bool,

    /// Backward-pass gradient per input (`None` for inputs that do not
    /// require grad).
    pub analytical: Vec<Option<Buffer>>,

    /// Finite-difference gradient per input, same layout as `analytical`.
    pub numerical: Vec<Option<Buffer>>,
}

/// Compares autograd gradients of `sum(f(inputs))` with central differences.
///
/// Only inputs with `requires_grad` are checked.
///
/// # Errors
/// - Whatever `f` returns.
/// - [`Error::GraphMisuse`] when no input requires grad.
pub fn check_gradients<F>(
    f: F,
    inputs: &[Tensor],
    config: &GradCheckConfig,
) -> Result<GradCheckReport>
where
    F: Fn(&[Tensor]) -> Result<Tensor>,
{
    if !inputs.iter().any(Tensor::requires_grad) {
        return Err(Error::GraphMisuse("gradcheck: no input requires grad".into()));
    }

    // fresh leaves so the caller's gradients stay untouched
    let leaves: Vec<Tensor> = inputs
        .iter()
        .map(|t| Tensor::from_buffer(t.buffer().clone(), t.requires_grad()))
        .collect();
    f(&leaves)?.sum_all().backward()?;

    let mut report = GradCheckReport {
        max_abs_diff: 0.0,
        num_elements: 0,
        num_failures: 0,
        passed: true,
        analytical: Vec::with_capacity(inputs.len()),
        numerical: Vec::with_capacity(inputs.len()),
    };

    for (i, leaf) in leaves.iter().enumerate() {
        if !leaf.requires_grad() {
            report.analytical.push(None);
            report.numerical.push(None);
            continue;
        }
        let analytical = leaf.grad().unwrap_or_else(|| Buffer::zeros(leaf.shape()));
        let numerical = numerical_gradient(&f, inputs, i, config.epsilon)?;

        for (a, n) in analytical.to_vec().into_iter().zip(numerical.to_vec()) {
            report.num_elements += 1;
            report.max_abs_diff = report.max_abs_diff.max((a - n).abs());
            if !isclose(a, n, config.rtol, config.atol) {
                report.num_failures += 1;
            }
        }
        report.analytical.push(Some(analytical));
        report.numerical.push(Some(numerical));
    }

    report.passed = report.num_failures == 0;
    debug!(
        elements = report.num_elements,
        failures = report.num_failures,
        max_abs_diff = report.max_abs_diff,
        "gradient check finished"
    );
    Ok(report)
}

/// Central-difference gradient of `sum(f(inputs))` with respect to
/// `inputs[index]`.
///
/// # Errors
/// Whatever `f` returns; [`Error::GraphMisuse`] for an `index` past the end.
pub fn numerical_gradient<F>(f: F, inputs: &[Tensor], index: usize, epsilon: f64) -> Result<Buffer>
where
    F: Fn(&[Tensor]) -> Result<Tensor>,
{
    let target = inputs
        .get(index)
        .ok_or_else(|| Error::GraphMisuse(format!("gradcheck: no input at index {index}")))?;
    let _guard = no_grad();

    let base = target.data();
    let mut args: Vec<Tensor> = inputs.iter().map(Tensor::detach).collect();
    let mut eval = |values: Vec<f64>| -> Result<f64> {
        args[index] = Tensor::new(values, target.shape(), false)?;
        f(&args)?.sum_all().item()
    };

    let mut out = Vec::with_capacity(base.len());
    for k in 0..base.len() {
        let mut plus = base.clone();
        plus[k] += epsilon;
        let mut minus = base.clone();
        minus[k] -= epsilon;
        out.push((eval(plus)? - eval(minus)?) / (2.0 * epsilon));
    }
    Buffer::new(out, target.shape())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor;

    #[test]
    fn polynomial_gradient_matches() {
        let x = tensor!([1.5, -0.5, 2.0]; requires_grad);
        let cube = |t: &[Tensor]| -> Result<Tensor> { Ok(&t[0] * &t[0].powi(2)) };
        let report = check_gradients(cube, &[x.clone()], &GradCheckConfig::default()).unwrap();
        assert!(report.passed, "{report:?}");
        assert_eq!(report.num_elements, 3);
        // the caller's tensor is left alone
        assert!(x.grad().is_none());
    }

    #[test]
    fn constants_are_skipped() {
        let x = tensor!([1.0, 2.0]; requires_grad);
        let c = tensor!([3.0, 4.0]);
        let report =
            check_gradients(|t| t[0].mul(&t[1]), &[x, c], &GradCheckConfig::default()).unwrap();
        assert!(report.numerical[1].is_none());
        assert_eq!(report.numerical[0].as_ref().unwrap().to_vec().len(), 2);
    }

    #[test]
    fn wrong_gradient_is_caught() {
        // relu has a kink at 0: the analytical gradient is 0, the central
        // difference is 0.5
        let x = tensor!([0.0]; requires_grad);
        let report =
            check_gradients(|t| Ok(t[0].relu()), &[x], &GradCheckConfig::default()).unwrap();
        assert!(!report.passed);
        assert_eq!(report.num_failures, 1);
    }

    #[test]
    fn needs_a_differentiable_input() {
        let c = tensor!([1.0]);
        assert!(matches!(
            check_gradients(|t| Ok(t[0].clone()), &[c], &GradCheckConfig::default()),
            Err(Error::GraphMisuse(_))
        ));
    }
}
