//! Core tensor handle.
//!
//! # Tensors and the graph
//!
//! A [`Tensor`] is a cheap-to-clone handle. Cloning shares the same value,
//! gradient slot and graph node, exactly like passing a reference around in
//! an eager autograd framework.
//!
//! Each tensor carries:
//! - its forward value as a [`Buffer`],
//! - a `requires_grad` flag,
//! - an accumulated gradient, allocated on the first `backward` that reaches it,
//! - the [`GraphNode`] that produced it, when it was produced by an operation
//!   on at least one gradient-requiring input while gradient mode was on.
//!
//! Nodes hold handles to their parents, and parents are always created before
//! their children (every tensor gets a strictly increasing id), so the graph
//! is a DAG and it is freed as soon as the last handle to its root goes away.
//!
//! ## Example
//!
//! ```rust
//! use briny_grad::tensor;
//! let x = tensor!([[1.0, 2.0], [3.0, 4.0]]; requires_grad);
//! let y = (&x * &x).sum_all();
//! y.backward().unwrap();
//! assert_eq!(x.grad().unwrap().to_vec(), vec![2.0, 4.0, 6.0, 8.0]);
//! ```

use crate::autograd;
use crate::buffer::Buffer;
use crate::config;
use crate::error::{Error, Result};
use crate::graph::{GraphNode, Op};
use core::cell::{Cell, RefCell};
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use rand::Rng;
use std::rc::Rc;

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

struct TensorCell {
    id: u64,
    data: Buffer,
    requires_grad: Cell<bool>,
    grad: RefCell<Option<Buffer>>,
    node: Option<GraphNode>,
}

// Drops the parent chain with a worklist instead of recursing once per level.
// Only cells whose last handle is going away are taken apart.
impl Drop for TensorCell {
    fn drop(&mut self) {
        let Some(node) = self.node.take() else { return };
        let mut pending = node.parents;
        while let Some(Tensor(cell)) = pending.pop() {
            if let Ok(mut cell) = Rc::try_unwrap(cell)
                && let Some(node) = cell.node.take()
            {
                pending.extend(node.parents);
            }
        }
    }
}

/// N-dimensional `f64` tensor with reverse-mode autograd support.
#[derive(Clone)]
pub struct Tensor(Rc<TensorCell>);

impl Tensor {
    fn from_cell(data: Buffer, requires_grad: bool, node: Option<GraphNode>) -> Self {
        Self(Rc::new(TensorCell {
            id: next_id(),
            data,
            requires_grad: Cell::new(requires_grad),
            grad: RefCell::new(None),
            node,
        }))
    }

    /// Creates a leaf tensor from row-major data.
    ///
    /// # Errors
    /// [`Error::Shape`] if `data.len()` does not match `shape`.
    pub fn new(data: Vec<f64>, shape: impl Into<Vec<usize>>, requires_grad: bool) -> Result<Self> {
        Ok(Self::from_buffer(Buffer::new(data, shape)?, requires_grad))
    }

    /// Wraps an existing buffer as a leaf tensor.
    pub fn from_buffer(data: Buffer, requires_grad: bool) -> Self {
        Self::from_cell(data, requires_grad, None)
    }

    /// 1-D leaf tensor without gradient tracking.
    pub fn from_vec(data: Vec<f64>) -> Self {
        let len = data.len();
        Self::from_buffer(Buffer::from_vec(vec![len], data), false)
    }

    /// Builds a leaf tensor from nested arrays or vectors.
    ///
    /// Integer and float leaves are both accepted; integers are converted to
    /// `f64`, which is how classification labels are passed in.
    ///
    /// # Errors
    /// [`Error::Shape`] for ragged nested vectors.
    pub fn from_nested<T: NestedData + ?Sized>(data: &T, requires_grad: bool) -> Result<Self> {
        let mut shape = Vec::new();
        data.shape_into(&mut shape);
        let mut flat = Vec::with_capacity(shape.iter().product());
        data.flatten_into(&shape, &mut flat)?;
        Self::new(flat, shape, requires_grad)
    }

    /// Rank-0 constant.
    pub fn scalar(value: f64) -> Self {
        Self::from_buffer(Buffer::scalar(value), false)
    }

    /// Constant zeros.
    pub fn zeros(shape: &[usize]) -> Self {
        Self::from_buffer(Buffer::zeros(shape), false)
    }

    /// Constant ones.
    pub fn ones(shape: &[usize]) -> Self {
        Self::from_buffer(Buffer::ones(shape), false)
    }

    /// Leaf tensor sampled uniformly from `[low, high)`.
    ///
    /// An empty range fills the tensor with `low`.
    pub fn rand_uniform<R: Rng>(shape: &[usize], low: f64, high: f64, rng: &mut R) -> Self {
        let len = shape.iter().product();
        let data = if low < high {
            (0..len).map(|_| rng.random_range(low..high)).collect()
        } else {
            vec![low; len]
        };
        Self::from_buffer(Buffer::from_vec(shape.to_vec(), data), false)
    }

    /// Result of an operation. Records `op` when gradient mode is on and any
    /// parent requires grad; otherwise the result is a constant.
    pub(crate) fn from_op(data: Buffer, op: Op, parents: Vec<Tensor>) -> Self {
        let track = config::is_grad_enabled() && parents.iter().any(Tensor::requires_grad);
        let node = track.then(|| GraphNode { op, parents });
        Self::from_cell(data, track, node)
    }

    /// Unique, monotonically increasing construction id.
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Forward value.
    pub fn buffer(&self) -> &Buffer {
        &self.0.data
    }

    /// Forward value copied out in row-major order.
    pub fn data(&self) -> Vec<f64> {
        self.0.data.to_vec()
    }

    /// Shape of the forward value.
    pub fn shape(&self) -> &[usize] {
        self.0.data.shape()
    }

    /// Rank.
    pub fn ndim(&self) -> usize {
        self.0.data.ndim()
    }

    /// Element count.
    pub fn numel(&self) -> usize {
        self.0.data.len()
    }

    /// Value of a one-element tensor.
    ///
    /// # Errors
    /// [`Error::Shape`] if the tensor holds more than one element.
    pub fn item(&self) -> Result<f64> {
        self.0
            .data
            .item()
            .ok_or_else(|| Error::shape("item", self.shape(), &[], 0))
    }

    /// Whether gradients flow into this tensor.
    pub fn requires_grad(&self) -> bool {
        self.0.requires_grad.get()
    }

    /// Turns gradient tracking on or off for a leaf tensor.
    ///
    /// # Errors
    /// [`Error::GraphMisuse`] on tensors produced by an operation.
    pub fn requires_grad_(&self, requires_grad: bool) -> Result<&Self> {
        if !self.is_leaf() {
            return Err(Error::GraphMisuse(
                "requires_grad can only be changed on leaf tensors".into(),
            ));
        }
        self.0.requires_grad.set(requires_grad);
        Ok(self)
    }

    /// `true` when no graph node produced this tensor.
    pub fn is_leaf(&self) -> bool {
        self.0.node.is_none()
    }

    pub(crate) fn node(&self) -> Option<&GraphNode> {
        self.0.node.as_ref()
    }

    pub(crate) fn parents(&self) -> &[Tensor] {
        self.0.node.as_ref().map_or(&[], |node| node.parents.as_slice())
    }

    /// Accumulated gradient, `None` until a backward pass reached this tensor.
    pub fn grad(&self) -> Option<Buffer> {
        self.0.grad.borrow().clone()
    }

    /// Drops the accumulated gradient.
    pub fn zero_grad(&self) {
        self.0.grad.borrow_mut().take();
    }

    /// Adds `grad` into the gradient slot, allocating zeros on first touch.
    pub(crate) fn accumulate_grad(&self, grad: &Buffer) -> Result<()> {
        let mut slot = self.0.grad.borrow_mut();
        match slot.as_mut() {
            Some(existing) => existing.add_assign(grad),
            None => {
                let mut fresh = Buffer::zeros(self.shape());
                fresh.add_assign(grad)?;
                *slot = Some(fresh);
                Ok(())
            }
        }
    }

    /// Same value, cut from the graph and without gradient tracking.
    pub fn detach(&self) -> Self {
        Self::from_buffer(self.0.data.clone(), false)
    }

    /// Backpropagates from this tensor with an implicit all-ones seed.
    ///
    /// On a multi-element tensor this is the same as `sum().backward()`.
    /// Gradients are **added** to whatever earlier passes left behind; call
    /// [`zero_grad`](Self::zero_grad) to reset.
    ///
    /// # Errors
    /// [`Error::GraphMisuse`] when this tensor does not require grad or was
    /// not produced by a recorded operation; seed a leaf with
    /// [`backward_with`](Self::backward_with).
    pub fn backward(&self) -> Result<()> {
        autograd::backward(self, None)
    }

    /// Backpropagates from this tensor with an explicit seed gradient.
    ///
    /// # Errors
    /// [`Error::GraphMisuse`] when this tensor does not require grad or the
    /// seed shape differs from the tensor's shape.
    pub fn backward_with(&self, seed: &Buffer) -> Result<()> {
        autograd::backward(self, Some(seed))
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Tensor");
        s.field("shape", &self.shape())
            .field("data", &self.data())
            .field("requires_grad", &self.requires_grad());
        if let Some(node) = self.node() {
            s.field("grad_fn", &node.op.name());
        }
        s.finish()
    }
}

impl From<f64> for Tensor {
    fn from(value: f64) -> Self {
        Self::scalar(value)
    }
}

impl From<Buffer> for Tensor {
    fn from(data: Buffer) -> Self {
        Self::from_buffer(data, false)
    }
}

/// Nested numeric data accepted by [`Tensor::from_nested`] and [`tensor!`](crate::tensor!).
pub trait NestedData {
    /// Appends this level's dimensions to `shape`.
    fn shape_into(&self, shape: &mut Vec<usize>);

    /// Appends the row-major values; `shape` is this level's expected shape.
    ///
    /// # Errors
    /// [`Error::Shape`] when a nested row does not match `shape`.
    fn flatten_into(&self, shape: &[usize], out: &mut Vec<f64>) -> Result<()>;
}

macro_rules! nested_scalar {
    ($($t:ty),*) => {$(
        impl NestedData for $t {
            fn shape_into(&self, _shape: &mut Vec<usize>) {}

            #[allow(clippy::cast_lossless, clippy::cast_precision_loss)]
            fn flatten_into(&self, shape: &[usize], out: &mut Vec<f64>) -> Result<()> {
                if !shape.is_empty() {
                    return Err(Error::shape("tensor", shape, &[], 0));
                }
                out.push(*self as f64);
                Ok(())
            }
        }
    )*};
}

nested_scalar!(f64, f32, i32, i64, u8, u32, usize);

impl<T: NestedData> NestedData for [T] {
    fn shape_into(&self, shape: &mut Vec<usize>) {
        shape.push(self.len());
        if let Some(first) = self.first() {
            first.shape_into(shape);
        }
    }

    fn flatten_into(&self, shape: &[usize], out: &mut Vec<f64>) -> Result<()> {
        match shape.split_first() {
            Some((&len, rest)) if len == self.len() => {
                self.iter().try_for_each(|row| row.flatten_into(rest, out))
            }
            _ => Err(Error::shape("tensor", shape, &[self.len()], 0)),
        }
    }
}

impl<T: NestedData, const N: usize> NestedData for [T; N] {
    fn shape_into(&self, shape: &mut Vec<usize>) {
        self.as_slice().shape_into(shape);
    }

    fn flatten_into(&self, shape: &[usize], out: &mut Vec<f64>) -> Result<()> {
        self.as_slice().flatten_into(shape, out)
    }
}

impl<T: NestedData> NestedData for Vec<T> {
    fn shape_into(&self, shape: &mut Vec<usize>) {
        self.as_slice().shape_into(shape);
    }

    fn flatten_into(&self, shape: &[usize], out: &mut Vec<f64>) -> Result<()> {
        self.as_slice().flatten_into(shape, out)
    }
}

/// Defines a tensor from nested literal arrays.
///
/// Append `; requires_grad` to create a gradient-tracking leaf.
///
/// # Panics
/// Panics on ragged input (only possible with nested `Vec`s).
///
/// # Example
/// ```
/// use briny_grad::tensor;
/// let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
/// assert_eq!(t.shape(), &[2, 2]);
/// let labels = tensor!([0, 2, 1]);
/// assert_eq!(labels.data(), vec![0.0, 2.0, 1.0]);
/// let w = tensor!([0.5, -0.5]; requires_grad);
/// assert!(w.requires_grad());
/// ```
#[macro_export]
macro_rules! tensor {
    ($data:expr; requires_grad) => {
        match $crate::tensor::Tensor::from_nested(&$data, true) {
            Ok(t) => t,
            Err(e) => panic!("{}", e),
        }
    };
    ($data:expr) => {
        match $crate::tensor::Tensor::from_nested(&$data, false) {
            Ok(t) => t,
            Err(e) => panic!("{}", e),
        }
    };
}
