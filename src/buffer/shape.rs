//! Shape arithmetic: strides, broadcasting and axis normalisation.

use crate::error::{Error, Result};

/// Number of elements described by `shape` (1 for a scalar).
pub fn numel(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Row-major strides, in elements.
pub fn contiguous_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }
    strides
}

/// Resolves the NumPy broadcast of two shapes.
///
/// Shapes are aligned on their trailing dimension; each aligned pair must be
/// equal or contain a 1, and missing leading dimensions count as 1.
///
/// # Errors
/// [`Error::Shape`] naming the first incompatible dimension (counted on the
/// broadcast result).
///
/// # Example
/// ```
/// use briny_grad::buffer::shape::broadcast_shapes;
/// assert_eq!(broadcast_shapes("add", &[3, 1], &[4]).unwrap(), vec![3, 4]);
/// assert!(broadcast_shapes("add", &[3, 2], &[3]).is_err());
/// ```
pub fn broadcast_shapes(op: &'static str, lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>> {
    let ndim = lhs.len().max(rhs.len());
    let mut out = vec![0; ndim];
    for d in 0..ndim {
        let a = dim_from_right(lhs, ndim - 1 - d);
        let b = dim_from_right(rhs, ndim - 1 - d);
        out[d] = match (a, b) {
            (a, b) if a == b => a,
            (1, b) => b,
            (a, 1) => a,
            _ => return Err(Error::shape(op, lhs, rhs, d)),
        };
    }
    Ok(out)
}

fn dim_from_right(shape: &[usize], from_right: usize) -> usize {
    if from_right < shape.len() {
        shape[shape.len() - 1 - from_right]
    } else {
        1
    }
}

/// Strides that read a buffer of `shape`/`strides` as if it had `target`'s
/// shape. Broadcast and missing dimensions get stride 0.
///
/// `shape` must already be broadcast-compatible with `target`.
pub fn broadcast_strides(shape: &[usize], strides: &[usize], target: &[usize]) -> Vec<usize> {
    let lead = target.len() - shape.len();
    (0..target.len())
        .map(|d| {
            if d < lead || shape[d - lead] == 1 {
                0
            } else {
                strides[d - lead]
            }
        })
        .collect()
}

/// Maps a possibly negative axis into `[0, ndim)`.
///
/// # Errors
/// [`Error::Axis`] when the axis is out of range.
pub fn normalize_axis(op: &'static str, axis: isize, ndim: usize) -> Result<usize> {
    let rank = isize::try_from(ndim).map_err(|_| Error::axis(op, axis, ndim))?;
    let resolved = if axis < 0 { axis + rank } else { axis };
    if (0..rank).contains(&resolved) {
        Ok(resolved.unsigned_abs())
    } else {
        Err(Error::axis(op, axis, ndim))
    }
}

/// Offset of the `linear`-th row-major element of `shape` under `strides`.
#[inline]
pub(crate) fn offset_of(mut linear: usize, shape: &[usize], strides: &[usize]) -> usize {
    let mut offset = 0;
    for (&dim, &stride) in shape.iter().zip(strides).rev() {
        offset += (linear % dim) * stride;
        linear /= dim;
    }
    offset
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strides_are_row_major() {
        assert_eq!(contiguous_strides(&[2, 3, 4]), vec![12, 4, 1]);
        assert_eq!(contiguous_strides(&[]), Vec::<usize>::new());
    }

    #[test]
    fn broadcast_pads_leading_dims() {
        assert_eq!(
            broadcast_shapes("add", &[1, 1, 7, 7], &[3, 5, 7, 7]).unwrap(),
            vec![3, 5, 7, 7]
        );
        assert_eq!(broadcast_shapes("add", &[], &[2, 2]).unwrap(), vec![2, 2]);
    }

    #[test]
    fn broadcast_reports_the_mismatch() {
        let err = broadcast_shapes("mul", &[2, 3], &[4, 3]).unwrap_err();
        assert_eq!(err, Error::shape("mul", &[2, 3], &[4, 3], 0));
    }

    #[test]
    fn broadcast_strides_zero_expanded_dims() {
        assert_eq!(broadcast_strides(&[3, 1], &[1, 1], &[2, 3, 4]), vec![0, 1, 0]);
    }

    #[test]
    fn negative_axes_wrap() {
        assert_eq!(normalize_axis("sum", -1, 3).unwrap(), 2);
        assert_eq!(normalize_axis("sum", 0, 1).unwrap(), 0);
        assert!(normalize_axis("sum", 3, 3).is_err());
        assert!(normalize_axis("sum", -4, 3).is_err());
        assert!(normalize_axis("sum", 0, 0).is_err());
    }

    #[test]
    fn offsets_follow_strides() {
        // transposed [2, 3] view of a [3, 2] buffer
        let shape = [2, 3];
        let strides = [1, 2];
        let offsets: Vec<usize> = (0..6).map(|i| offset_of(i, &shape, &strides)).collect();
        assert_eq!(offsets, vec![0, 2, 4, 1, 3, 5]);
    }
}
