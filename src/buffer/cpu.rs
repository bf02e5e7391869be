//! Parallel CPU kernels.
//!
//! Every kernel produces its output element by element from an index, so the
//! sequential and `rayon` paths evaluate exactly the same arithmetic in the
//! same order per element. Which path runs is decided by
//! [`config::should_parallelize`](crate::config).
//!
//! ## Implemented kernels
//!
//! - `fill`: generic index -> value generator
//! - `map` / `zip`: elementwise over contiguous slices
//! - `mse`: mean squared error
//! - `softmax_rows`: numerically stable row softmax with log-sum-exp

use crate::config::should_parallelize;
use rayon::prelude::*;

/// Builds `len` values by calling `f` on every index.
pub fn fill<T, F>(len: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    if should_parallelize(len) {
        (0..len).into_par_iter().map(f).collect()
    } else {
        (0..len).map(f).collect()
    }
}

/// Applies `f` to every element of `src`.
pub fn map<F>(src: &[f64], f: F) -> Vec<f64>
where
    F: Fn(f64) -> f64 + Sync + Send,
{
    if should_parallelize(src.len()) {
        src.par_iter().map(|&x| f(x)).collect()
    } else {
        src.iter().map(|&x| f(x)).collect()
    }
}

/// Applies `f` pairwise to two slices of equal length.
pub fn zip<F>(lhs: &[f64], rhs: &[f64], f: F) -> Vec<f64>
where
    F: Fn(f64, f64) -> f64 + Sync + Send,
{
    debug_assert_eq!(lhs.len(), rhs.len());
    if should_parallelize(lhs.len()) {
        lhs.par_iter().zip(rhs).map(|(&a, &b)| f(a, b)).collect()
    } else {
        lhs.iter().zip(rhs).map(|(&a, &b)| f(a, b)).collect()
    }
}

/// Mean squared error over two slices of equal length.
///
/// $$ L = \\frac{1}{n} \\sum_i (y_i - t_i)^2 $$
pub fn mse(prediction: &[f64], target: &[f64]) -> f64 {
    debug_assert_eq!(prediction.len(), target.len());
    let n = prediction.len() as f64;
    // summed sequentially so the result never depends on scheduling
    prediction
        .iter()
        .zip(target)
        .map(|(&y, &t)| (y - t).powi(2))
        .sum::<f64>()
        / n
}

/// Row softmax of a `rows x cols` matrix.
///
/// Returns the probabilities and the per-row log-sum-exp. The row maximum is
/// subtracted first, so large logits do not overflow and `-inf` entries map
/// to exactly 0.
pub fn softmax_rows(logits: &[f64], cols: usize) -> (Vec<f64>, Vec<f64>) {
    let rows = if cols == 0 { 0 } else { logits.len() / cols };
    let per_row: Vec<(Vec<f64>, f64)> = fill(rows, |r| {
        let row = &logits[r * cols..(r + 1) * cols];
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = row.iter().map(|&x| (x - max).exp()).collect();
        let total: f64 = exps.iter().sum();
        let probs = exps.iter().map(|&e| e / total).collect();
        (probs, max + total.ln())
    });

    let mut probs = Vec::with_capacity(logits.len());
    let mut lse = Vec::with_capacity(rows);
    for (p, l) in per_row {
        probs.extend(p);
        lse.push(l);
    }
    (probs, lse)
}
