//! Error taxonomy shared by every fallible operation in the crate.
//!
//! Errors are raised where they are detected and never retried: shape and
//! axis problems surface while an expression is being built, graph misuse
//! surfaces when `backward` is called. A failed `backward` leaves every
//! accumulated gradient untouched.
//!
//! Non-finite values (`-inf`, `NaN`) are **not** errors. They propagate with
//! IEEE semantics, which masked attention relies on.

use thiserror::Error;

/// Everything that can go wrong while building or differentiating a graph.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Two shapes cannot be combined (broadcast, matmul, reshape, stack...).
    #[error("{op}: incompatible shapes {lhs:?} and {rhs:?} at dimension {dim}")]
    Shape {
        /// Operation that rejected the shapes.
        op: &'static str,
        /// Left (or source) shape.
        lhs: Vec<usize>,
        /// Right (or requested) shape.
        rhs: Vec<usize>,
        /// Offending dimension, counted on the left shape.
        dim: usize,
    },

    /// An axis argument is outside `[-ndim, ndim)` or otherwise invalid.
    #[error("{op}: axis {axis} is out of range for a tensor of rank {ndim}")]
    Axis {
        /// Operation that rejected the axis.
        op: &'static str,
        /// Axis as given by the caller.
        axis: isize,
        /// Rank of the tensor the axis was applied to.
        ndim: usize,
    },

    /// A classification label is not an integer in `[0, num_classes)`.
    #[error("class label {label} is not an integer in [0, {num_classes})")]
    Label {
        /// Offending label value.
        label: f64,
        /// Number of classes of the logits.
        num_classes: usize,
    },

    /// `backward` was called in a way the graph cannot honour.
    #[error("backward: {0}")]
    GraphMisuse(String),
}

impl Error {
    pub(crate) fn shape(op: &'static str, lhs: &[usize], rhs: &[usize], dim: usize) -> Self {
        Self::Shape {
            op,
            lhs: lhs.to_vec(),
            rhs: rhs.to_vec(),
            dim,
        }
    }

    pub(crate) fn axis(op: &'static str, axis: isize, ndim: usize) -> Self {
        Self::Axis { op, axis, ndim }
    }
}

/// Crate-wide result alias.
pub type Result<T> = core::result::Result<T, Error>;
