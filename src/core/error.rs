//! Error types for MOS
//!
//! Recoverable failures are reported through `KernelResult`. Programmer
//! errors (invariant violations, ISR buffer overflow, frame oversize)
//! halt through the [`kassert!`] macro instead; nothing in the core
//! recovers from those.

/// Kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KernelError {
    /// MAX_TASK_NUM, POOL_SIZE, ASYNC_TASK_MAX or ASYNC_POOL_MAX reached
    CapacityExceeded,
    /// The page allocator returned no page
    Oom,
    /// A kernel invariant was broken by the caller
    InvariantViolation,
    /// A closure or coroutine frame exceeds its configured capacity
    Oversize,
    /// Task lookup by name found nothing
    UnknownName,
}

/// Result type alias for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;

/// Halt on a broken kernel invariant.
///
/// Debug and release builds both stop here; the panic handler decides
/// whether that is a breakpoint, a `defmt` report, or a reset.
#[macro_export]
macro_rules! kassert {
    ($cond:expr, $($msg:tt)+) => {
        if !$cond {
            panic!($($msg)+);
        }
    };
}
