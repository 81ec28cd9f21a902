//! MOS - a preemptive RTOS kernel for ARM Cortex-M
//!
//! A real-time operating system core providing:
//! - Priority-based preemptive scheduling with a round-robin option
//! - Page-based stack allocation with recycling
//! - Synchronization primitives (semaphore, lock, priority-inheriting
//!   mutex, condition variable, generation barrier)
//! - A cooperative async executor layering stackless coroutines atop one
//!   kernel task

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(test)]
extern crate std;

// ============ Critical Section ============

#[cfg(target_arch = "arm")]
mod cs_impl {
    use cortex_m::interrupt;
    use cortex_m::register::primask;
    use critical_section::{set_impl, Impl, RawRestoreState};

    struct SingleCoreCriticalSection;
    set_impl!(SingleCoreCriticalSection);

    unsafe impl Impl for SingleCoreCriticalSection {
        unsafe fn acquire() -> RawRestoreState {
            let was_active = primask::read().is_active();
            interrupt::disable();
            was_active
        }

        unsafe fn release(was_active: RawRestoreState) {
            if was_active {
                unsafe { interrupt::enable() }
            }
        }
    }
}

// ============ Modules ============

pub mod log;
mod lang_items;

pub mod core;
pub mod exec;
pub mod port;
pub mod sync;

// ============ Re-exports ============

pub use crate::core::config;
pub use crate::core::config::*;
pub use crate::core::critical;
pub use crate::core::critical::IrqGuard;
pub use crate::core::cs_cell;
pub use crate::core::error;
pub use crate::core::error::{KernelError, KernelResult};
pub use crate::core::kernel;
pub use crate::core::kernel::{os_init, os_start, os_ticks};
pub use crate::core::list;
pub use crate::core::page;
pub use crate::core::sched;
pub use crate::core::task;
pub use crate::core::task::Tcb;
pub use crate::core::time;
pub use crate::core::types;
pub use crate::core::types::*;

pub use exec::FixedFn;
pub use sync::{Barrier, CondVar, Lock, Mutex, Sema};

pub use port::reboot;
