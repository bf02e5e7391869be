//! Strided numeric storage.
//!
//! # Buffer
//!
//! A [`Buffer`] is an immutable, reference-counted `f64` payload read through
//! a shape, a set of strides and an offset. Views (reshape of contiguous
//! data, permute, narrow, broadcast) share the payload and only rewrite the
//! metadata; every operation that computes values returns a fresh contiguous
//! buffer.
//!
//! ## Design Highlights
//! - Row-major logical order everywhere (`to_vec`, indices, kernels)
//! - NumPy broadcasting for binary operations and batched matmul
//! - IEEE arithmetic, no clamping: `1/0 = inf`, `exp(-inf) = 0`
//! - Kernels run through [`cpu`], which picks sequential or `rayon` execution
//!
//! ## Example
//!
//! ```rust
//! use briny_grad::buffer::Buffer;
//! let a = Buffer::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], [2, 3]).unwrap();
//! let t = a.transpose(0, 1).unwrap();
//! assert_eq!(t.shape(), &[3, 2]);
//! assert_eq!(t.to_vec(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
//! ```

pub mod cpu;
pub mod shape;

use crate::error::{Error, Result};
use shape::{broadcast_shapes, broadcast_strides, contiguous_strides, numel, offset_of};
use std::sync::Arc;

/// Shape-aware view over shared `f64` storage.
#[derive(Debug, Clone)]
pub struct Buffer {
    data: Arc<Vec<f64>>,
    shape: Vec<usize>,
    strides: Vec<usize>,
    offset: usize,
}

impl PartialEq for Buffer {
    /// Logical equality: same shape and same values in row-major order.
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.to_vec() == other.to_vec()
    }
}

impl Buffer {
    /// Creates a contiguous buffer from row-major `data`.
    ///
    /// # Errors
    /// [`Error::Shape`] if `data.len()` differs from the product of `shape`.
    pub fn new(data: Vec<f64>, shape: impl Into<Vec<usize>>) -> Result<Self> {
        let shape = shape.into();
        if numel(&shape) != data.len() {
            return Err(Error::shape("buffer", &shape, &[data.len()], 0));
        }
        Ok(Self::from_vec(shape, data))
    }

    /// Trusted constructor for kernels that already produced `numel` values.
    pub(crate) fn from_vec(shape: Vec<usize>, data: Vec<f64>) -> Self {
        debug_assert_eq!(numel(&shape), data.len());
        Self {
            strides: contiguous_strides(&shape),
            data: Arc::new(data),
            shape,
            offset: 0,
        }
    }

    /// Rank-0 buffer holding `value`.
    pub fn scalar(value: f64) -> Self {
        Self::from_vec(Vec::new(), vec![value])
    }

    /// Buffer of `shape` filled with `value`.
    pub fn full(shape: &[usize], value: f64) -> Self {
        Self::from_vec(shape.to_vec(), vec![value; numel(shape)])
    }

    /// Buffer of zeros.
    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, 0.0)
    }

    /// Buffer of ones.
    pub fn ones(shape: &[usize]) -> Self {
        Self::full(shape, 1.0)
    }

    /// Logical shape.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Strides in elements, one per dimension.
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Rank.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Element count.
    pub fn len(&self) -> usize {
        numel(&self.shape)
    }

    /// `true` when some dimension is 0.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` when the logical order matches the storage order.
    pub fn is_contiguous(&self) -> bool {
        // size-1 dimensions never move the offset, their stride is irrelevant
        let expected = contiguous_strides(&self.shape);
        self.shape
            .iter()
            .zip(self.strides.iter().zip(&expected))
            .all(|(&dim, (&s, &e))| dim <= 1 || s == e)
    }

    /// Contiguous slice of the logical elements, if no copy is needed.
    pub fn as_slice(&self) -> Option<&[f64]> {
        self.is_contiguous()
            .then(|| &self.data[self.offset..self.offset + self.len()])
    }

    /// Copies the elements out in row-major order.
    pub fn to_vec(&self) -> Vec<f64> {
        match self.as_slice() {
            Some(slice) => slice.to_vec(),
            None => cpu::fill(self.len(), |i| self.at_linear(i)),
        }
    }

    /// Returns a contiguous buffer, copying only when needed.
    pub fn into_contiguous(self) -> Self {
        if self.is_contiguous() {
            self
        } else {
            Self::from_vec(self.shape.clone(), self.to_vec())
        }
    }

    /// The single value of a one-element buffer.
    pub fn item(&self) -> Option<f64> {
        (self.len() == 1).then(|| self.data[self.offset])
    }

    /// Element at a full multi-index, `None` when out of bounds.
    pub fn get(&self, index: &[usize]) -> Option<f64> {
        if index.len() != self.ndim() || index.iter().zip(&self.shape).any(|(&i, &d)| i >= d) {
            return None;
        }
        let offset: usize = index.iter().zip(&self.strides).map(|(&i, &s)| i * s).sum();
        Some(self.data[self.offset + offset])
    }

    #[inline]
    fn at_linear(&self, linear: usize) -> f64 {
        self.data[self.offset + offset_of(linear, &self.shape, &self.strides)]
    }

    /// Applies `f` to every element.
    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(f64) -> f64 + Sync + Send,
    {
        let data = match self.as_slice() {
            Some(slice) => cpu::map(slice, f),
            None => cpu::fill(self.len(), |i| f(self.at_linear(i))),
        };
        Self::from_vec(self.shape.clone(), data)
    }

    /// Broadcasting elementwise binary operation.
    ///
    /// # Errors
    /// [`Error::Shape`] if the shapes do not broadcast.
    pub fn zip_map<F>(&self, other: &Self, op: &'static str, f: F) -> Result<Self>
    where
        F: Fn(f64, f64) -> f64 + Sync + Send,
    {
        if self.shape == other.shape {
            if let (Some(a), Some(b)) = (self.as_slice(), other.as_slice()) {
                return Ok(Self::from_vec(self.shape.clone(), cpu::zip(a, b, f)));
            }
        }

        let shape = broadcast_shapes(op, &self.shape, &other.shape)?;
        let sa = broadcast_strides(&self.shape, &self.strides, &shape);
        let sb = broadcast_strides(&other.shape, &other.strides, &shape);
        let data = cpu::fill(numel(&shape), |i| {
            let a = self.data[self.offset + offset_of(i, &shape, &sa)];
            let b = other.data[other.offset + offset_of(i, &shape, &sb)];
            f(a, b)
        });
        Ok(Self::from_vec(shape, data))
    }

    /// `self + other` with broadcasting.
    ///
    /// # Errors
    /// [`Error::Shape`] if the shapes do not broadcast.
    pub fn add(&self, other: &Self) -> Result<Self> {
        self.zip_map(other, "add", |a, b| a + b)
    }

    /// `self - other` with broadcasting.
    ///
    /// # Errors
    /// [`Error::Shape`] if the shapes do not broadcast.
    pub fn sub(&self, other: &Self) -> Result<Self> {
        self.zip_map(other, "sub", |a, b| a - b)
    }

    /// `self * other` with broadcasting.
    ///
    /// # Errors
    /// [`Error::Shape`] if the shapes do not broadcast.
    pub fn mul(&self, other: &Self) -> Result<Self> {
        self.zip_map(other, "mul", |a, b| a * b)
    }

    /// `self / other` with broadcasting.
    ///
    /// # Errors
    /// [`Error::Shape`] if the shapes do not broadcast.
    pub fn div(&self, other: &Self) -> Result<Self> {
        self.zip_map(other, "div", |a, b| a / b)
    }

    /// Elementwise negation.
    pub fn neg(&self) -> Self {
        self.map(|x| -x)
    }

    /// Multiplies every element by `k`.
    pub fn scale(&self, k: f64) -> Self {
        self.map(|x| x * k)
    }

    /// In-place accumulation used for gradients.
    ///
    /// # Errors
    /// [`Error::Shape`] if `other` does not have exactly this shape.
    pub fn add_assign(&mut self, other: &Self) -> Result<()> {
        if self.shape != other.shape {
            return Err(Error::shape("accumulate", &self.shape, &other.shape, 0));
        }
        *self = self.add(other)?;
        Ok(())
    }

    /// Sums over the given (normalised, distinct) axes.
    ///
    /// With `keepdims` the reduced axes stay as size 1, otherwise they are
    /// removed. An empty axis list returns a contiguous copy.
    pub fn sum_axes(&self, axes: &[usize], keepdims: bool) -> Self {
        let kept_shape: Vec<usize> = self
            .shape
            .iter()
            .enumerate()
            .map(|(d, &size)| if axes.contains(&d) { 1 } else { size })
            .collect();
        let red_shape: Vec<usize> = axes.iter().map(|&d| self.shape[d]).collect();
        let red_strides: Vec<usize> = axes.iter().map(|&d| self.strides[d]).collect();
        let red_len = numel(&red_shape);

        let data = cpu::fill(numel(&kept_shape), |o| {
            let base = self.offset + offset_of(o, &kept_shape, &self.strides);
            (0..red_len)
                .map(|j| self.data[base + offset_of(j, &red_shape, &red_strides)])
                .sum()
        });

        let shape = if keepdims {
            kept_shape
        } else {
            self.shape
                .iter()
                .enumerate()
                .filter(|(d, _)| !axes.contains(d))
                .map(|(_, &size)| size)
                .collect()
        };
        Self::from_vec(shape, data)
    }

    /// Sum of every element as a rank-0 buffer.
    pub fn sum_all(&self) -> Self {
        let axes: Vec<usize> = (0..self.ndim()).collect();
        self.sum_axes(&axes, false)
    }

    /// Maximum along `axis` with the index of the first maximal element.
    ///
    /// # Errors
    /// [`Error::Axis`] for an out-of-range axis, [`Error::Shape`] when the
    /// axis has length 0.
    pub fn max_axis(&self, axis: usize, keepdims: bool) -> Result<(Self, Vec<usize>)> {
        if axis >= self.ndim() {
            return Err(Error::axis("max", axis.cast_signed(), self.ndim()));
        }
        let dim = self.shape[axis];
        if dim == 0 {
            return Err(Error::shape("max", &self.shape, &[], axis));
        }
        let stride = self.strides[axis];
        let mut kept_shape = self.shape.clone();
        kept_shape[axis] = 1;

        let pairs: Vec<(f64, usize)> = cpu::fill(numel(&kept_shape), |o| {
            let base = self.offset + offset_of(o, &kept_shape, &self.strides);
            let mut best = (self.data[base], 0);
            for j in 1..dim {
                let v = self.data[base + j * stride];
                // strict comparison keeps the first occurrence on ties
                if v > best.0 {
                    best = (v, j);
                }
            }
            best
        });

        let (values, indices): (Vec<f64>, Vec<usize>) = pairs.into_iter().unzip();
        let shape = if keepdims {
            kept_shape
        } else {
            let mut s = self.shape.clone();
            s.remove(axis);
            s
        };
        Ok((Self::from_vec(shape, values), indices))
    }

    /// Same data under a new shape: a view when contiguous, a copy otherwise.
    ///
    /// # Errors
    /// [`Error::Shape`] when the element counts differ.
    pub fn reshape(&self, shape: &[usize]) -> Result<Self> {
        if numel(shape) != self.len() {
            return Err(Error::shape("reshape", &self.shape, shape, 0));
        }
        if self.is_contiguous() {
            Ok(Self {
                data: Arc::clone(&self.data),
                shape: shape.to_vec(),
                strides: contiguous_strides(shape),
                offset: self.offset,
            })
        } else {
            Ok(Self::from_vec(shape.to_vec(), self.to_vec()))
        }
    }

    /// Reorders dimensions: output dimension `i` is input dimension `perm[i]`.
    ///
    /// # Errors
    /// [`Error::Axis`] if `perm` is not a permutation of `0..ndim`.
    pub fn permute(&self, perm: &[usize]) -> Result<Self> {
        let ndim = self.ndim();
        let mut seen = vec![false; ndim];
        if perm.len() != ndim {
            return Err(Error::axis("permute", perm.len().cast_signed(), ndim));
        }
        for &p in perm {
            if p >= ndim || seen[p] {
                return Err(Error::axis("permute", p.cast_signed(), ndim));
            }
            seen[p] = true;
        }
        Ok(Self {
            data: Arc::clone(&self.data),
            shape: perm.iter().map(|&p| self.shape[p]).collect(),
            strides: perm.iter().map(|&p| self.strides[p]).collect(),
            offset: self.offset,
        })
    }

    /// Swaps two dimensions (a strided view).
    ///
    /// # Errors
    /// [`Error::Axis`] if either axis is out of range.
    pub fn transpose(&self, a: usize, b: usize) -> Result<Self> {
        let ndim = self.ndim();
        for axis in [a, b] {
            if axis >= ndim {
                return Err(Error::axis("transpose", axis.cast_signed(), ndim));
            }
        }
        let mut perm: Vec<usize> = (0..ndim).collect();
        perm.swap(a, b);
        self.permute(&perm)
    }

    /// Reads the buffer as `shape` through zero strides (no copy).
    ///
    /// # Errors
    /// [`Error::Shape`] unless this shape broadcasts to exactly `shape`.
    pub fn broadcast_to(&self, shape: &[usize]) -> Result<Self> {
        let out = broadcast_shapes("broadcast_to", &self.shape, shape)?;
        if out != shape {
            return Err(Error::shape("broadcast_to", &self.shape, shape, 0));
        }
        Ok(Self {
            data: Arc::clone(&self.data),
            strides: broadcast_strides(&self.shape, &self.strides, shape),
            shape: shape.to_vec(),
            offset: self.offset,
        })
    }

    /// Broadcast-reduction: sums over every dimension that broadcasting
    /// would have expanded when going from `target` to this shape.
    ///
    /// # Errors
    /// [`Error::Shape`] if `target` does not broadcast to this shape.
    pub fn sum_to_shape(&self, target: &[usize]) -> Result<Self> {
        if self.shape == target {
            return Ok(self.clone());
        }
        if target.len() > self.ndim() {
            return Err(Error::shape("sum_to_shape", &self.shape, target, 0));
        }
        let lead = self.ndim() - target.len();
        let mut axes: Vec<usize> = (0..lead).collect();
        for (d, &size) in target.iter().enumerate() {
            match (size, self.shape[lead + d]) {
                (t, s) if t == s => {}
                (1, _) => axes.push(lead + d),
                _ => return Err(Error::shape("sum_to_shape", &self.shape, target, lead + d)),
            }
        }
        self.sum_axes(&axes, true).reshape(target)
    }

    /// Sub-range `start..start + len` along `axis` (a view).
    ///
    /// # Errors
    /// [`Error::Axis`] for a bad axis, [`Error::Shape`] when the range does
    /// not fit.
    pub fn narrow(&self, axis: usize, start: usize, len: usize) -> Result<Self> {
        if axis >= self.ndim() {
            return Err(Error::axis("narrow", axis.cast_signed(), self.ndim()));
        }
        if start + len > self.shape[axis] {
            let mut requested = self.shape.clone();
            requested[axis] = start + len;
            return Err(Error::shape("narrow", &self.shape, &requested, axis));
        }
        let mut shape = self.shape.clone();
        shape[axis] = len;
        Ok(Self {
            data: Arc::clone(&self.data),
            shape,
            strides: self.strides.clone(),
            offset: self.offset + start * self.strides[axis],
        })
    }

    /// Inverse of [`narrow`](Self::narrow): places this buffer at
    /// `start` along `axis` inside zeros of `source_shape`.
    pub(crate) fn embed(&self, source_shape: &[usize], axis: usize, start: usize) -> Self {
        let len = self.shape[axis];
        let dim = source_shape[axis];
        let inner = numel(&source_shape[axis + 1..]);
        let grad = self.to_vec();
        let data = cpu::fill(numel(source_shape), |o| {
            let c = (o / inner) % dim;
            if c < start || c >= start + len {
                return 0.0;
            }
            let outer = o / (inner * dim);
            grad[(outer * len + (c - start)) * inner + o % inner]
        });
        Self::from_vec(source_shape.to_vec(), data)
    }

    /// Scatters one value per kept position onto `indices[k]` along `axis`
    /// inside zeros of `source_shape`. Used to route gradients to the argmax.
    pub(crate) fn scatter_axis(
        &self,
        source_shape: &[usize],
        axis: usize,
        indices: &[usize],
    ) -> Self {
        let dim = source_shape[axis];
        let inner = numel(&source_shape[axis + 1..]);
        let values = self.to_vec();
        let mut data = vec![0.0; numel(source_shape)];
        for (k, (&v, &idx)) in values.iter().zip(indices).enumerate() {
            let outer = k / inner;
            data[(outer * dim + idx) * inner + k % inner] += v;
        }
        Self::from_vec(source_shape.to_vec(), data)
    }

    /// Stacks equally shaped buffers along a new `axis` (`0..=ndim`).
    ///
    /// # Errors
    /// [`Error::Shape`] for an empty list or mismatched members,
    /// [`Error::Axis`] for an out-of-range axis.
    pub fn stack(buffers: &[&Self], axis: usize) -> Result<Self> {
        let Some(first) = buffers.first() else {
            return Err(Error::shape("stack", &[], &[], 0));
        };
        for b in &buffers[1..] {
            if b.shape != first.shape {
                return Err(Error::shape("stack", &first.shape, &b.shape, 0));
            }
        }
        if axis > first.ndim() {
            return Err(Error::axis("stack", axis.cast_signed(), first.ndim() + 1));
        }

        let outer = numel(&first.shape[..axis]);
        let inner = numel(&first.shape[axis..]);
        let members: Vec<Vec<f64>> = buffers.iter().map(|b| b.to_vec()).collect();
        let mut data = Vec::with_capacity(outer * inner * members.len());
        for o in 0..outer {
            for m in &members {
                data.extend_from_slice(&m[o * inner..(o + 1) * inner]);
            }
        }

        let mut shape = first.shape.clone();
        shape.insert(axis, buffers.len());
        Ok(Self::from_vec(shape, data))
    }

    /// Batched matrix product `(..., m, k) @ (..., k, n) -> (..., m, n)`.
    ///
    /// Batch dimensions broadcast. A 1-D left operand is treated as `(1, k)`
    /// and a 1-D right operand as `(k, 1)`; the promoted dimension is dropped
    /// from the result.
    ///
    /// # Errors
    /// [`Error::Shape`] for scalars, mismatched inner dimensions or
    /// non-broadcastable batch dimensions.
    pub fn matmul(&self, other: &Self) -> Result<Self> {
        if self.ndim() == 0 || other.ndim() == 0 {
            return Err(Error::shape("matmul", &self.shape, &other.shape, 0));
        }
        let a = self.promote_matrix(true)?;
        let b = other.promote_matrix(false)?;

        let (ar, br) = (a.ndim(), b.ndim());
        let (m, k) = (a.shape[ar - 2], a.shape[ar - 1]);
        let (k2, n) = (b.shape[br - 2], b.shape[br - 1]);
        if k != k2 {
            return Err(Error::shape("matmul", &self.shape, &other.shape, self.ndim() - 1));
        }

        let batch = broadcast_shapes("matmul", &a.shape[..ar - 2], &b.shape[..br - 2])?;
        let a_batch = broadcast_strides(&a.shape[..ar - 2], &a.strides[..ar - 2], &batch);
        let b_batch = broadcast_strides(&b.shape[..br - 2], &b.strides[..br - 2], &batch);
        let (a_m, a_k) = (a.strides[ar - 2], a.strides[ar - 1]);
        let (b_k, b_n) = (b.strides[br - 2], b.strides[br - 1]);

        let data = cpu::fill(numel(&batch) * m * n, |o| {
            let bi = o / (m * n);
            let i = (o / n) % m;
            let j = o % n;
            let a_base = a.offset + offset_of(bi, &batch, &a_batch) + i * a_m;
            let b_base = b.offset + offset_of(bi, &batch, &b_batch) + j * b_n;
            let mut sum = 0.0;
            for l in 0..k {
                sum += a.data[a_base + l * a_k] * b.data[b_base + l * b_k];
            }
            sum
        });

        let mut shape = batch;
        if self.ndim() > 1 {
            shape.push(m);
        }
        if other.ndim() > 1 {
            shape.push(n);
        }
        Ok(Self::from_vec(shape, data))
    }

    /// Views a 1-D buffer as a row (`lhs`) or column matrix.
    pub(crate) fn promote_matrix(&self, lhs: bool) -> Result<Self> {
        match (self.ndim(), lhs) {
            (1, true) => self.reshape(&[1, self.shape[0]]),
            (1, false) => self.reshape(&[self.shape[0], 1]),
            _ => Ok(self.clone()),
        }
    }

    /// Swaps the last two dimensions.
    ///
    /// # Errors
    /// [`Error::Axis`] for buffers of rank below 2.
    pub fn transpose_last2(&self) -> Result<Self> {
        let ndim = self.ndim();
        if ndim < 2 {
            return Err(Error::axis("transpose", -2, ndim));
        }
        self.transpose(ndim - 2, ndim - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iota(shape: &[usize]) -> Buffer {
        Buffer::new((0..numel(shape)).map(|i| i as f64).collect(), shape).unwrap()
    }

    #[test]
    fn new_rejects_wrong_length() {
        assert!(Buffer::new(vec![1.0, 2.0, 3.0], [2, 2]).is_err());
    }

    #[test]
    fn reshape_of_contiguous_is_a_view() {
        let a = iota(&[2, 3, 4]);
        let b = a.reshape(&[3, 2, 4]).unwrap();
        assert!(Arc::ptr_eq(&a.data, &b.data));
        assert_eq!(a.to_vec(), b.to_vec());
    }

    #[test]
    fn reshape_of_transposed_copies() {
        let a = iota(&[2, 3]);
        let t = a.transpose(0, 1).unwrap();
        assert!(!t.is_contiguous());
        let r = t.reshape(&[6]).unwrap();
        assert_eq!(r.to_vec(), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
    }

    #[test]
    fn sum_axes_with_and_without_keepdims() {
        let a = iota(&[2, 3]);
        assert_eq!(a.sum_axes(&[1], false).to_vec(), vec![3.0, 12.0]);
        assert_eq!(a.sum_axes(&[0], true).shape(), &[1, 3]);
        assert_eq!(a.sum_axes(&[0], true).to_vec(), vec![3.0, 5.0, 7.0]);
        assert_eq!(a.sum_all().item(), Some(15.0));
    }

    #[test]
    fn max_prefers_first_occurrence() {
        let a = Buffer::new(vec![1.0, 3.0, 3.0, 2.0, 2.0, 0.0], [2, 3]).unwrap();
        let (values, idx) = a.max_axis(1, false).unwrap();
        assert_eq!(values.to_vec(), vec![3.0, 2.0]);
        assert_eq!(idx, vec![1, 0]);
    }

    #[test]
    fn sum_to_shape_reduces_broadcast_dims() {
        let g = Buffer::ones(&[3, 5, 7, 7]);
        let r = g.sum_to_shape(&[1, 1, 7, 7]).unwrap();
        assert_eq!(r.shape(), &[1, 1, 7, 7]);
        assert!(r.to_vec().iter().all(|&v| v == 15.0));
        let r = g.sum_to_shape(&[7]).unwrap();
        assert!(r.to_vec().iter().all(|&v| v == 105.0));
    }

    #[test]
    fn matmul_handles_vectors_and_batches() {
        let a = iota(&[2, 3]);
        let b = iota(&[3, 2]);
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.to_vec(), vec![10.0, 13.0, 28.0, 40.0]);

        let v = Buffer::new(vec![1.0, 1.0], [2]).unwrap();
        assert_eq!(v.matmul(&a).unwrap().to_vec(), vec![3.0, 5.0, 7.0]);
        assert_eq!(v.matmul(&a).unwrap().shape(), &[3]);

        let batched = iota(&[2, 2, 3]).matmul(&b).unwrap();
        assert_eq!(batched.shape(), &[2, 2, 2]);
        assert_eq!(&batched.to_vec()[..4], &[10.0, 13.0, 28.0, 40.0]);
    }

    #[test]
    fn matmul_rejects_inner_mismatch() {
        assert!(matches!(
            iota(&[2, 3]).matmul(&iota(&[2, 3])),
            Err(Error::Shape { op: "matmul", .. })
        ));
    }

    #[test]
    fn narrow_and_embed_are_inverse() {
        let a = iota(&[4, 4]);
        let n = a.narrow(1, 1, 2).unwrap();
        assert_eq!(n.to_vec(), vec![1.0, 2.0, 5.0, 6.0, 9.0, 10.0, 13.0, 14.0]);
        let e = n.embed(&[4, 4], 1, 1);
        assert_eq!(e.get(&[2, 2]), Some(10.0));
        assert_eq!(e.get(&[2, 3]), Some(0.0));
        assert!(a.narrow(0, 3, 2).is_err());
    }

    #[test]
    fn stack_interleaves_members() {
        let a = iota(&[2]);
        let b = Buffer::new(vec![10.0, 11.0], [2]).unwrap();
        assert_eq!(Buffer::stack(&[&a, &b], 0).unwrap().to_vec(), vec![0.0, 1.0, 10.0, 11.0]);
        assert_eq!(Buffer::stack(&[&a, &b], 1).unwrap().to_vec(), vec![0.0, 10.0, 1.0, 11.0]);
        assert!(Buffer::stack(&[&a, &b], 2).is_err());
    }

    #[test]
    fn division_follows_ieee() {
        let a = Buffer::new(vec![1.0, -1.0, 0.0], [3]).unwrap();
        let z = Buffer::zeros(&[3]);
        let q = a.div(&z).unwrap().to_vec();
        assert_eq!(q[0], f64::INFINITY);
        assert_eq!(q[1], f64::NEG_INFINITY);
        assert!(q[2].is_nan());
    }
}
