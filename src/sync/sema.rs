//! Counting semaphore
//!
//! A signed counter with a priority-ordered waiting list. A negative
//! count records how many tasks are parked: `cnt < 0` exactly when
//! `-cnt` tasks wait.

use core::cell::UnsafeCell;

use crate::core::list::TcbList;
use crate::critical::IrqGuard;
use crate::kassert;
use crate::kernel;
use crate::port;
use crate::sched;
use crate::task;

struct SemaInner {
    cnt: i32,
    waiting: TcbList,
}

/// Counting semaphore
///
/// Construction requires an initial value; there is no default.
pub struct Sema {
    inner: UnsafeCell<SemaInner>,
}

unsafe impl Send for Sema {}
unsafe impl Sync for Sema {}

impl Sema {
    /// Create a semaphore with `cnt` initial permits (`cnt >= 0`).
    pub const fn new(cnt: i32) -> Self {
        assert!(cnt >= 0, "semaphore initial value must be non-negative");
        Sema {
            inner: UnsafeCell::new(SemaInner {
                cnt,
                waiting: TcbList::new(),
            }),
        }
    }

    /// P operation: take a permit, blocking when none is available.
    pub fn down(&self) {
        kassert!(port::irq_enabled(), "blocking call with IRQs disabled");

        let must_yield = {
            let _guard = IrqGuard::new();
            let inner = unsafe { &mut *self.inner.get() };
            inner.cnt -= 1;
            if inner.cnt < 0 {
                let Some(cur) = kernel::current() else {
                    panic!("blocking with no current task");
                };
                unsafe { task::block_to(cur, &mut inner.waiting) };
                true
            } else {
                false
            }
        };

        if must_yield {
            task::yield_now();
        }
    }

    /// V operation: release a permit, waking the first waiter if any,
    /// then yield if that waiter outranks the caller.
    pub fn up(&self) {
        kassert!(port::irq_enabled(), "semaphore up with IRQs disabled");

        {
            let _guard = IrqGuard::new();
            self.up_raw();
        }

        if sched::any_higher() {
            task::yield_now();
        }
    }

    /// V operation from ISR context: no yield, no IRQ toggle.
    #[inline]
    pub fn up_from_isr(&self) {
        self.up_raw();
    }

    fn up_raw(&self) {
        let inner = unsafe { &mut *self.inner.get() };
        if inner.cnt < 0 {
            if let Some(first) = inner.waiting.front() {
                unsafe { task::wake_from(first, &mut inner.waiting) };
            }
        }
        inner.cnt += 1;
    }

    /// Current counter value; negative means that many waiters.
    pub fn count(&self) -> i32 {
        let _guard = IrqGuard::new();
        unsafe { (*self.inner.get()).cnt }
    }

    /// Number of tasks parked on this semaphore.
    pub fn waiters(&self) -> usize {
        let _guard = IrqGuard::new();
        unsafe { (*self.inner.get()).waiting.len() }
    }
}
