//! Condition variable
//!
//! A bare waiting list. `wait` releases the associated mutex, parks the
//! caller until the predicate holds, and re-acquires before returning.

use core::cell::UnsafeCell;

use crate::core::list::TcbList;
use crate::critical::IrqGuard;
use crate::kassert;
use crate::kernel;
use crate::port;
use crate::sync::mutex::Mutex;
use crate::task;

/// Condition variable
pub struct CondVar {
    waiting: UnsafeCell<TcbList>,
}

unsafe impl Send for CondVar {}
unsafe impl Sync for CondVar {}

impl CondVar {
    pub const fn new() -> Self {
        CondVar {
            waiting: UnsafeCell::new(TcbList::new()),
        }
    }

    /// Any task parked on this condition?
    pub fn has_waiters(&self) -> bool {
        let _guard = IrqGuard::new();
        !unsafe { &*self.waiting.get() }.is_empty()
    }

    /// Release `mtx`, park until `pred()` holds, then re-acquire `mtx`.
    ///
    /// The caller must hold `mtx`. The predicate loop absorbs spurious
    /// wakeups.
    pub fn wait<T>(&self, mtx: &Mutex<T>, mut pred: impl FnMut() -> bool) {
        mtx.raw_unlock();
        while !pred() {
            self.block_current();
        }
        mtx.raw_lock();
    }

    /// Wake at most one waiter, then yield.
    pub fn notify(&self) {
        {
            let _guard = IrqGuard::new();
            self.wake_one();
        }
        task::yield_now();
    }

    /// Wake every waiter, then yield.
    pub fn notify_all(&self) {
        {
            let _guard = IrqGuard::new();
            while self.wake_one() {}
        }
        task::yield_now();
    }

    fn block_current(&self) {
        kassert!(port::irq_enabled(), "blocking call with IRQs disabled");
        {
            let _guard = IrqGuard::new();
            let Some(cur) = kernel::current() else {
                panic!("blocking with no current task");
            };
            unsafe { task::block_to(cur, &mut *self.waiting.get()) };
        }
        task::yield_now();
    }

    /// Wake the first waiter; caller holds the IRQ guard.
    fn wake_one(&self) -> bool {
        let waiting = unsafe { &mut *self.waiting.get() };
        match waiting.front() {
            Some(first) => {
                unsafe { task::wake_from(first, waiting) };
                true
            }
            None => false,
        }
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}
