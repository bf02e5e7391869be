//! Utilities to approximate equality of floating point values.
//!
//! Two flavours live here. [`RelativeEq`] grades a difference into an
//! [`ApproxEquality`] bucket against fixed epsilons, which is handy for quick
//! assertions on hand-computed values. [`allclose`] follows the NumPy rule
//! `|a - b| <= atol + rtol * |b|` and is what gradient comparisons use.

use crate::buffer::Buffer;

/// The max epsilon accepted on `f64`s.
pub const F64_MAX_ERROR: f64 = 1e-3;

/// The expected minimum epsilon accepted on `f64`s.
pub const F64_AVG_ERROR: f64 = 1e-6;

/// The best expected epsilon accepted on `f64`s.
pub const F64_MIN_ERROR: f64 = 1e-13;

/// Checks the relative distance based off epsilon.
pub trait RelativeEq<Rhs: ?Sized> {
    /// Enumerates the equality of `self`
    fn approx_eq(&self, rhs: &Rhs) -> ApproxEquality;
}

impl RelativeEq<Self> for f64 {
    fn approx_eq(&self, rhs: &Self) -> ApproxEquality {
        if self == rhs {
            // covers matching infinities
            return ApproxEquality::Precise;
        }
        let dif = (self - rhs).abs();

        if dif < F64_MIN_ERROR {
            ApproxEquality::Precise
        } else if dif < F64_AVG_ERROR {
            ApproxEquality::Partial
        } else if dif < F64_MAX_ERROR {
            ApproxEquality::Relative
        } else {
            ApproxEquality::Scarce
        }
    }
}

impl<T: RelativeEq<U>, U> RelativeEq<[U]> for [T] {
    fn approx_eq(&self, rhs: &[U]) -> ApproxEquality {
        if self.len() != rhs.len() {
            return ApproxEquality::Scarce;
        }
        self.iter()
            .zip(rhs)
            .map(|(t, u)| t.approx_eq(u))
            .max()
            .unwrap_or(ApproxEquality::Precise)
    }
}

impl<T: RelativeEq<U>, U, const N: usize> RelativeEq<[U; N]> for [T; N] {
    fn approx_eq(&self, rhs: &[U; N]) -> ApproxEquality {
        self.as_slice().approx_eq(rhs.as_slice())
    }
}

impl RelativeEq<Self> for Buffer {
    fn approx_eq(&self, rhs: &Self) -> ApproxEquality {
        if self.shape() != rhs.shape() {
            return ApproxEquality::Scarce;
        }
        self.to_vec().as_slice().approx_eq(rhs.to_vec().as_slice())
    }
}

/// The approximated equality enumerated, best first.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApproxEquality {
    /// Very strong epsilon.
    Precise = 0,

    /// Good epsilon.
    Partial = 1,

    /// Acceptable epsilon
    Relative = 2,

    /// No relative equality.
    Scarce = 3,
}

/// Approximates equality based off the relative difference.
pub fn approx_eq<A: RelativeEq<B> + ?Sized, B: ?Sized>(a: &A, b: &B) -> bool {
    a.approx_eq(b) == ApproxEquality::Precise
}

/// `true` when `|a - b| <= atol + rtol * |b|`.
///
/// Equal infinities compare equal; NaN never does.
pub fn isclose(a: f64, b: f64, rtol: f64, atol: f64) -> bool {
    if a == b {
        return true;
    }
    if !a.is_finite() || !b.is_finite() {
        return false;
    }
    (a - b).abs() <= atol + rtol * b.abs()
}

/// Elementwise [`isclose`] over two equally long slices.
pub fn allclose(a: &[f64], b: &[f64], rtol: f64, atol: f64) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(&x, &y)| isclose(x, y, rtol, atol))
}

/// Largest `|a - b|` over two slices, for failure messages.
pub fn max_abs_diff(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

impl Buffer {
    /// Same shape and [`allclose`] values.
    pub fn allclose(&self, other: &Self, rtol: f64, atol: f64) -> bool {
        self.shape() == other.shape() && allclose(&self.to_vec(), &other.to_vec(), rtol, atol)
    }
}

/// Asserts that two `f64` slices (or anything coercing to one) are
/// elementwise close.
///
/// Defaults to `rtol = 1e-5` and `atol = 1e-8`, overridable by name:
///
/// ```
/// use briny_grad::assert_allclose;
/// assert_allclose!(&[1.0, 2.0], &[1.0, 2.0 + 1e-9]);
/// assert_allclose!(&[1.0], &[1.1], atol = 0.2);
/// ```
#[macro_export]
macro_rules! assert_allclose {
    ($a:expr, $b:expr) => {
        $crate::assert_allclose!($a, $b, rtol = 1e-5, atol = 1e-8)
    };
    ($a:expr, $b:expr, atol = $atol:expr) => {
        $crate::assert_allclose!($a, $b, rtol = 0.0, atol = $atol)
    };
    ($a:expr, $b:expr, rtol = $rtol:expr, atol = $atol:expr) => {{
        let (a, b): (&[f64], &[f64]) = (&$a[..], &$b[..]);
        assert!(
            $crate::approx::allclose(a, b, $rtol, $atol),
            "not close (rtol = {}, atol = {}, max |diff| = {:e}):\n  left: {:?}\n right: {:?}",
            $rtol,
            $atol,
            $crate::approx::max_abs_diff(a, b),
            a,
            b,
        );
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grades_by_difference() {
        assert_eq!(1.0f64.approx_eq(&1.0), ApproxEquality::Precise);
        assert_eq!(1.0f64.approx_eq(&(1.0 + 1e-8)), ApproxEquality::Partial);
        assert_eq!(1.0f64.approx_eq(&1.0001), ApproxEquality::Relative);
        assert_eq!(1.0f64.approx_eq(&1.1), ApproxEquality::Scarce);
    }

    #[test]
    fn slice_grade_is_the_worst_element() {
        let a = [1.0, 2.0, 3.0];
        let b = [1.0, 2.0 + 1e-8, 3.0001];
        assert_eq!(a.approx_eq(&b), ApproxEquality::Relative);
        assert!(approx_eq(&a, &a));
        assert_eq!(a[..].approx_eq(&b[..2]), ApproxEquality::Scarce);
    }

    #[test]
    fn isclose_handles_non_finite() {
        assert!(isclose(f64::INFINITY, f64::INFINITY, 0.0, 0.0));
        assert!(!isclose(f64::INFINITY, f64::NEG_INFINITY, 1.0, 1.0));
        assert!(!isclose(f64::NAN, f64::NAN, 1.0, 1.0));
        assert!(!isclose(1.0, f64::INFINITY, 1.0, 1.0));
    }

    #[test]
    fn allclose_is_asymmetric_in_rtol() {
        // tolerance scales with |b|
        assert!(isclose(0.0, 1.0, 1.0, 0.0));
        assert!(!isclose(1.0, 0.0, 1.0, 0.0));
        assert!(!allclose(&[1.0], &[1.0, 2.0], 1.0, 1.0));
    }

    #[test]
    fn buffers_compare_shape_first() {
        let a = Buffer::ones(&[2, 2]);
        let b = Buffer::ones(&[4]);
        assert!(!a.allclose(&b, 0.0, 0.0));
        assert!(a.allclose(&Buffer::full(&[2, 2], 1.0 + 1e-12), 0.0, 1e-9));
        assert_eq!(a.approx_eq(&b), ApproxEquality::Scarce);
    }

    #[test]
    #[should_panic(expected = "not close")]
    fn assert_macro_reports() {
        assert_allclose!(&[1.0, 2.0], &[1.0, 3.0]);
    }
}
