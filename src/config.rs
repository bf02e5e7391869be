//! Runtime configuration.
//!
//! Two knobs exist:
//!
//! - **Gradient mode** (per thread): when disabled, operations skip graph
//!   recording entirely and every result is a plain constant. Use
//!   [`no_grad`] for a scoped switch.
//! - **Kernel execution** (process wide): whether buffer kernels run on the
//!   `rayon` pool. [`Execution::Auto`] parallelises once an output has at
//!   least [`parallel_threshold`] elements.
//!
//! Both the sequential and the parallel kernels compute every output element
//! with the same reduction order, so switching execution never changes
//! results.

use core::cell::Cell;
use core::convert::TryFrom;
use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

/// Default minimum element count for parallel kernels.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 4096;

/// How buffer kernels are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Execution {
    /// Parallel above the threshold, sequential below (default).
    #[default]
    Auto = 0,
    /// Always run on the calling thread.
    Sequential,
    /// Always use the `rayon` pool.
    Parallel,
}

impl TryFrom<u8> for Execution {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Auto),
            1 => Ok(Self::Sequential),
            2 => Ok(Self::Parallel),
            _ => Err(()),
        }
    }
}

// Changes rarely and never mid-kernel, relaxed-ish ordering is fine.
static GLOBAL_EXECUTION: AtomicU8 = AtomicU8::new(Execution::Auto as u8);
static PARALLEL_THRESHOLD: AtomicUsize = AtomicUsize::new(DEFAULT_PARALLEL_THRESHOLD);

thread_local! {
    static GRAD_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Sets how buffer kernels are scheduled.
///
/// # Example
///
/// ```
/// use briny_grad::config::{set_execution, get_execution, Execution};
/// set_execution(Execution::Sequential);
/// assert_eq!(get_execution(), Execution::Sequential);
/// set_execution(Execution::Auto);
/// ```
pub fn set_execution(mode: Execution) {
    GLOBAL_EXECUTION.store(mode as u8, Ordering::Release);
}

/// Returns the current kernel scheduling mode.
///
/// An invalid stored value falls back to [`Execution::Auto`].
pub fn get_execution() -> Execution {
    Execution::try_from(GLOBAL_EXECUTION.load(Ordering::Acquire)).unwrap_or_default()
}

/// Sets the element count from which [`Execution::Auto`] goes parallel.
pub fn set_parallel_threshold(elements: usize) {
    PARALLEL_THRESHOLD.store(elements, Ordering::Release);
}

/// Element count from which [`Execution::Auto`] goes parallel.
pub fn parallel_threshold() -> usize {
    PARALLEL_THRESHOLD.load(Ordering::Acquire)
}

/// Whether a kernel producing `len` elements should use the `rayon` pool.
pub(crate) fn should_parallelize(len: usize) -> bool {
    match get_execution() {
        Execution::Auto => len >= parallel_threshold(),
        Execution::Sequential => false,
        Execution::Parallel => true,
    }
}

/// Enables or disables graph recording on the current thread.
///
/// Returns the previous mode.
pub fn set_grad_enabled(enabled: bool) -> bool {
    GRAD_ENABLED.with(|mode| mode.replace(enabled))
}

/// Whether operations on the current thread record graph nodes.
pub fn is_grad_enabled() -> bool {
    GRAD_ENABLED.with(Cell::get)
}

/// Restores the previous gradient mode when dropped.
#[derive(Debug)]
#[must_use = "gradient recording is re-enabled as soon as the guard is dropped"]
pub struct NoGradGuard {
    previous: bool,
}

impl Drop for NoGradGuard {
    fn drop(&mut self) {
        set_grad_enabled(self.previous);
    }
}

/// Disables graph recording until the returned guard is dropped.
///
/// # Example
///
/// ```
/// use briny_grad::{config, tensor};
///
/// let w = tensor!([1.0, 2.0]; requires_grad);
/// let y = {
///     let _guard = config::no_grad();
///     &w * 2.0
/// };
/// assert!(!y.requires_grad());
/// assert!(config::is_grad_enabled());
/// ```
pub fn no_grad() -> NoGradGuard {
    NoGradGuard {
        previous: set_grad_enabled(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_round_trips_through_u8() {
        for mode in [Execution::Auto, Execution::Sequential, Execution::Parallel] {
            assert_eq!(Execution::try_from(mode as u8), Ok(mode));
        }
        assert!(Execution::try_from(7).is_err());
    }

    #[test]
    fn nested_guards_restore_in_order() {
        assert!(is_grad_enabled());
        {
            let _outer = no_grad();
            assert!(!is_grad_enabled());
            {
                let _inner = no_grad();
                assert!(!is_grad_enabled());
            }
            assert!(!is_grad_enabled());
        }
        assert!(is_grad_enabled());
    }
}
