//! Synchronization primitives
//!
//! Semaphore, non-recursive lock, priority-inheriting mutex, condition
//! variable, and generation barrier.

pub mod barrier;
pub mod cond;
pub mod lock;
pub mod mutex;
pub mod sema;

pub use barrier::Barrier;
pub use cond::CondVar;
pub use lock::Lock;
pub use mutex::{Mutex, MutexGuard};
pub use sema::Sema;
