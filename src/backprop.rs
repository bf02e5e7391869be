//! Differentiable operations.
//!
//! # Operation protocol
//!
//! Every operation here follows the same three steps:
//! 1. **Forward**: compute the output [`Buffer`] with the buffer primitive.
//! 2. **Record**: if gradient mode is on and any input requires grad, attach a
//!    graph node holding the [`Op`] tag, the input handles and the saved
//!    context (reduced axes, exponent, permutation, argmax...).
//! 3. **Return** the new tensor; `requires_grad` is the OR of the inputs.
//!
//! Shape and axis problems are reported as [`Error`]s before anything is
//! recorded. The arithmetic operators (`+ - * /`, unary `-`) call the
//! fallible methods and **panic** on shape mismatches, like array libraries
//! usually do; use the methods to handle the error instead.
//!
//! ## Broadcasting
//!
//! Binary operations broadcast NumPy style. The backward pass sums gradients
//! over every broadcast dimension, so each input receives a gradient of its
//! own shape.
//!
//! ## Example
//!
//! ```rust
//! use briny_grad::tensor;
//! let x = tensor!([[1.0, 2.0], [3.0, 4.0]]; requires_grad);
//! let b = tensor!([10.0, 20.0]; requires_grad);
//! let y = (&x + &b).sum_all();
//! y.backward().unwrap();
//! assert_eq!(b.grad().unwrap().to_vec(), vec![2.0, 2.0]);
//! ```

use crate::buffer::Buffer;
use crate::buffer::shape::normalize_axis;
use crate::error::{Error, Result};
use crate::graph::Op;
use crate::tensor::Tensor;
use core::ops;

impl Tensor {
    /// Elementwise `self + other` with broadcasting.
    ///
    /// # Errors
    /// [`Error::Shape`] if the shapes do not broadcast.
    pub fn add(&self, other: &Tensor) -> Result<Tensor> {
        let out = self.buffer().add(other.buffer())?;
        Ok(Tensor::from_op(out, Op::Add, vec![self.clone(), other.clone()]))
    }

    /// Elementwise `self - other` with broadcasting.
    ///
    /// # Errors
    /// [`Error::Shape`] if the shapes do not broadcast.
    pub fn sub(&self, other: &Tensor) -> Result<Tensor> {
        let out = self.buffer().sub(other.buffer())?;
        Ok(Tensor::from_op(out, Op::Sub, vec![self.clone(), other.clone()]))
    }

    /// Elementwise `self * other` with broadcasting.
    ///
    /// # Errors
    /// [`Error::Shape`] if the shapes do not broadcast.
    pub fn mul(&self, other: &Tensor) -> Result<Tensor> {
        let out = self.buffer().mul(other.buffer())?;
        Ok(Tensor::from_op(out, Op::Mul, vec![self.clone(), other.clone()]))
    }

    /// Elementwise `self / other` with broadcasting. Division by zero
    /// follows IEEE rules.
    ///
    /// # Errors
    /// [`Error::Shape`] if the shapes do not broadcast.
    pub fn div(&self, other: &Tensor) -> Result<Tensor> {
        let out = self.buffer().div(other.buffer())?;
        Ok(Tensor::from_op(out, Op::Div, vec![self.clone(), other.clone()]))
    }

    /// Elementwise negation.
    pub fn neg(&self) -> Tensor {
        Tensor::from_op(self.buffer().neg(), Op::Neg, vec![self.clone()])
    }

    /// Elementwise power with a constant exponent.
    pub fn pow(&self, exponent: f64) -> Tensor {
        let out = self.buffer().map(move |v| v.powf(exponent));
        Tensor::from_op(out, Op::Pow { exponent }, vec![self.clone()])
    }

    /// Elementwise integer power; `x.powi(2)` squares.
    pub fn powi(&self, exponent: i32) -> Tensor {
        let out = self.buffer().map(move |v| v.powi(exponent));
        let exponent = f64::from(exponent);
        Tensor::from_op(out, Op::Pow { exponent }, vec![self.clone()])
    }

    /// Elementwise `e^x`. `exp(-inf)` is exactly 0.
    pub fn exp(&self) -> Tensor {
        Tensor::from_op(self.buffer().map(f64::exp), Op::Exp, vec![self.clone()])
    }

    /// Elementwise natural logarithm.
    pub fn log(&self) -> Tensor {
        Tensor::from_op(self.buffer().map(f64::ln), Op::Log, vec![self.clone()])
    }

    /// Hyperbolic tangent.
    pub fn tanh(&self) -> Tensor {
        Tensor::from_op(self.buffer().map(f64::tanh), Op::Tanh, vec![self.clone()])
    }

    /// Logistic sigmoid `1 / (1 + e^-x)`.
    pub fn sigmoid(&self) -> Tensor {
        let out = self.buffer().map(|v| 1.0 / (1.0 + (-v).exp()));
        Tensor::from_op(out, Op::Sigmoid, vec![self.clone()])
    }

    /// Rectified linear unit `max(0, x)`; the gradient at 0 is 0.
    pub fn relu(&self) -> Tensor {
        let out = self.buffer().map(|v| if v > 0.0 { v } else { 0.0 });
        Tensor::from_op(out, Op::Relu, vec![self.clone()])
    }

    /// Batched matrix product `(..., m, k) @ (..., k, n)`.
    ///
    /// 1-D operands are promoted as vectors and batch dimensions broadcast.
    ///
    /// # Errors
    /// [`Error::Shape`] for incompatible operands.
    pub fn matmul(&self, other: &Tensor) -> Result<Tensor> {
        let out = self.buffer().matmul(other.buffer())?;
        Ok(Tensor::from_op(out, Op::MatMul, vec![self.clone(), other.clone()]))
    }

    /// Sum over one axis (`Some(axis)`, negative counts from the end) or over
    /// everything (`None`).
    ///
    /// # Errors
    /// [`Error::Axis`] for an out-of-range axis.
    pub fn sum(&self, axis: Option<isize>, keepdims: bool) -> Result<Tensor> {
        let axes = match axis {
            Some(axis) => vec![normalize_axis("sum", axis, self.ndim())?],
            None => (0..self.ndim()).collect(),
        };
        self.sum_axes(axes, keepdims)
    }

    /// Sum over several axes at once.
    ///
    /// # Errors
    /// [`Error::Axis`] for an out-of-range or repeated axis.
    pub fn sum_over(&self, axes: &[isize], keepdims: bool) -> Result<Tensor> {
        let mut resolved = Vec::with_capacity(axes.len());
        for &axis in axes {
            let a = normalize_axis("sum", axis, self.ndim())?;
            if resolved.contains(&a) {
                return Err(Error::axis("sum", axis, self.ndim()));
            }
            resolved.push(a);
        }
        self.sum_axes(resolved, keepdims)
    }

    fn sum_axes(&self, mut axes: Vec<usize>, keepdims: bool) -> Result<Tensor> {
        axes.sort_unstable();
        let out = self.buffer().sum_axes(&axes, keepdims);
        Ok(Tensor::from_op(out, Op::Sum { axes, keepdims }, vec![self.clone()]))
    }

    /// Sum of all elements as a rank-0 tensor.
    pub fn sum_all(&self) -> Tensor {
        let axes: Vec<usize> = (0..self.ndim()).collect();
        let out = self.buffer().sum_axes(&axes, false);
        Tensor::from_op(out, Op::Sum { axes, keepdims: false }, vec![self.clone()])
    }

    /// Mean of all elements as a rank-0 tensor.
    pub fn mean_all(&self) -> Tensor {
        #[allow(clippy::cast_precision_loss)]
        let n = self.numel() as f64;
        &self.sum_all() * (1.0 / n)
    }

    /// Maximum along `axis` and the (constant) index of the first maximum.
    ///
    /// Only the values are differentiable; their gradient flows to the
    /// selected positions.
    ///
    /// # Errors
    /// [`Error::Axis`] for an out-of-range axis, [`Error::Shape`] for an
    /// empty axis.
    pub fn max(&self, axis: isize, keepdims: bool) -> Result<(Tensor, Tensor)> {
        let axis = normalize_axis("max", axis, self.ndim())?;
        let (values, argmax) = self.buffer().max_axis(axis, keepdims)?;
        #[allow(clippy::cast_precision_loss)]
        let indices = Buffer::new(argmax.iter().map(|&i| i as f64).collect(), values.shape())?;
        let values = Tensor::from_op(values, Op::Max { axis, argmax }, vec![self.clone()]);
        Ok((values, Tensor::from_buffer(indices, false)))
    }

    /// Same data under a new shape. One dimension may be `-1` and is inferred.
    ///
    /// # Errors
    /// [`Error::Shape`] when the element count does not match.
    pub fn reshape(&self, shape: &[isize]) -> Result<Tensor> {
        let resolved = self.infer_shape(shape)?;
        let out = self.buffer().reshape(&resolved)?;
        Ok(Tensor::from_op(out, Op::Reshape, vec![self.clone()]))
    }

    fn infer_shape(&self, shape: &[isize]) -> Result<Vec<usize>> {
        let err = || {
            let requested: Vec<usize> = shape.iter().map(|d| d.unsigned_abs()).collect();
            Error::shape("reshape", self.shape(), &requested, 0)
        };
        let mut inferred = None;
        let mut known = 1usize;
        let mut out = Vec::with_capacity(shape.len());
        for (d, &size) in shape.iter().enumerate() {
            match size {
                -1 if inferred.is_none() => {
                    inferred = Some(d);
                    out.push(1);
                }
                s if s >= 0 => {
                    known *= s.unsigned_abs();
                    out.push(s.unsigned_abs());
                }
                _ => return Err(err()),
            }
        }
        if let Some(d) = inferred {
            if known == 0 || self.numel() % known != 0 {
                return Err(err());
            }
            out[d] = self.numel() / known;
        }
        Ok(out)
    }

    /// Reorders dimensions (`perm[i]` is the source of output dimension `i`).
    ///
    /// # Errors
    /// [`Error::Axis`] if `perm` is not a permutation.
    pub fn permute(&self, perm: &[isize]) -> Result<Tensor> {
        let resolved = perm
            .iter()
            .map(|&p| normalize_axis("permute", p, self.ndim()))
            .collect::<Result<Vec<_>>>()?;
        let out = self.buffer().permute(&resolved)?;
        Ok(Tensor::from_op(out, Op::Permute { perm: resolved }, vec![self.clone()]))
    }

    /// Swaps two dimensions; negative axes count from the end.
    ///
    /// # Errors
    /// [`Error::Axis`] if either axis is out of range.
    pub fn transpose(&self, a: isize, b: isize) -> Result<Tensor> {
        let ndim = self.ndim();
        let a = normalize_axis("transpose", a, ndim)?;
        let b = normalize_axis("transpose", b, ndim)?;
        let mut perm: Vec<usize> = (0..ndim).collect();
        perm.swap(a, b);
        let out = self.buffer().permute(&perm)?;
        Ok(Tensor::from_op(out, Op::Permute { perm }, vec![self.clone()]))
    }

    /// Matrix transpose of a rank-2 (or lower) tensor.
    ///
    /// # Errors
    /// [`Error::Axis`] for tensors of rank above 2.
    pub fn t(&self) -> Result<Tensor> {
        match self.ndim() {
            0 | 1 => {
                let shape: Vec<isize> = self.shape().iter().map(|&d| d.cast_signed()).collect();
                self.reshape(&shape)
            }
            2 => self.transpose(0, 1),
            n => Err(Error::axis("t", n.cast_signed(), n)),
        }
    }

    /// Sub-range `start..start + len` along `axis`.
    ///
    /// # Errors
    /// [`Error::Axis`] for a bad axis, [`Error::Shape`] when the range does
    /// not fit.
    pub fn narrow(&self, axis: isize, start: usize, len: usize) -> Result<Tensor> {
        let axis = normalize_axis("narrow", axis, self.ndim())?;
        let out = self.buffer().narrow(axis, start, len)?;
        Ok(Tensor::from_op(out, Op::Narrow { axis, start }, vec![self.clone()]))
    }

    /// Picks index `index` along `axis`, removing that dimension.
    ///
    /// # Errors
    /// [`Error::Axis`] for a bad axis, [`Error::Shape`] for an index out of
    /// range.
    pub fn select(&self, axis: isize, index: usize) -> Result<Tensor> {
        let axis = normalize_axis("select", axis, self.ndim())?;
        let narrowed = self.buffer().narrow(axis, index, 1)?;
        let mut shape = narrowed.shape().to_vec();
        shape.remove(axis);
        let out = narrowed.reshape(&shape)?;
        Ok(Tensor::from_op(out, Op::Select { axis, index }, vec![self.clone()]))
    }

    /// Splits along the leading dimension, like iterating a tensor.
    ///
    /// # Errors
    /// [`Error::Axis`] on rank-0 tensors.
    pub fn rows(&self) -> Result<Vec<Tensor>> {
        let len = *self
            .shape()
            .first()
            .ok_or_else(|| Error::axis("rows", 0, 0))?;
        (0..len).map(|i| self.select(0, i)).collect()
    }
}

/// Stacks equally shaped tensors along a new `axis` (`-ndim-1..=ndim`).
///
/// # Errors
/// [`Error::Shape`] for an empty list or mismatched shapes, [`Error::Axis`]
/// for an out-of-range axis.
///
/// # Example
/// ```
/// use briny_grad::{stack, tensor};
/// let x = tensor!([1.0, 2.0]);
/// let y = tensor!([3.0, 4.0]);
/// assert_eq!(stack(&[x, y], 0).unwrap().shape(), &[2, 2]);
/// ```
pub fn stack(tensors: &[Tensor], axis: isize) -> Result<Tensor> {
    let ndim = tensors.first().map_or(0, Tensor::ndim);
    let axis = normalize_axis("stack", axis, ndim + 1)?;
    let buffers: Vec<&Buffer> = tensors.iter().map(Tensor::buffer).collect();
    let out = Buffer::stack(&buffers, axis)?;
    Ok(Tensor::from_op(out, Op::Stack { axis }, tensors.to_vec()))
}

fn expect_shape<T>(result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("{e}"),
    }
}

macro_rules! binary_operator {
    ($trait:ident, $method:ident) => {
        impl ops::$trait<&Tensor> for &Tensor {
            type Output = Tensor;

            fn $method(self, rhs: &Tensor) -> Tensor {
                expect_shape(Tensor::$method(self, rhs))
            }
        }

        impl ops::$trait<f64> for &Tensor {
            type Output = Tensor;

            fn $method(self, rhs: f64) -> Tensor {
                expect_shape(Tensor::$method(self, &Tensor::scalar(rhs)))
            }
        }

        impl ops::$trait<&Tensor> for f64 {
            type Output = Tensor;

            fn $method(self, rhs: &Tensor) -> Tensor {
                expect_shape(Tensor::$method(&Tensor::scalar(self), rhs))
            }
        }
    };
}

binary_operator!(Add, add);
binary_operator!(Sub, sub);
binary_operator!(Mul, mul);
binary_operator!(Div, div);

impl ops::Neg for &Tensor {
    type Output = Tensor;

    fn neg(self) -> Tensor {
        Tensor::neg(self)
    }
}

impl ops::AddAssign<&Tensor> for Tensor {
    /// Rebinds `self` to the (recorded) sum, like `loss += step_loss`.
    fn add_assign(&mut self, rhs: &Tensor) {
        *self = &*self + rhs;
    }
}
