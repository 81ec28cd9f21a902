//! Non-recursive lock
//!
//! A binary semaphore paired with an owner pointer. Re-entry is a kernel
//! invariant violation, checked before the semaphore can park the caller
//! forever.

use core::cell::UnsafeCell;
use core::ptr;

use crate::kassert;
use crate::kernel;
use crate::sync::sema::Sema;
use crate::task::Tcb;

/// Non-recursive binary lock
pub struct Lock {
    sema: Sema,
    owner: UnsafeCell<*mut Tcb>,
}

unsafe impl Send for Lock {}
unsafe impl Sync for Lock {}

impl Lock {
    pub const fn new() -> Self {
        Lock {
            sema: Sema::new(1),
            owner: UnsafeCell::new(ptr::null_mut()),
        }
    }

    /// Take the lock, blocking while another task holds it.
    ///
    /// Ownership is claimed only *after* `down` returns: a contender that
    /// blocks inside `down` must not look like the holder in the meantime.
    pub fn acquire(&self) {
        let cur = kernel::current().map_or(ptr::null_mut(), |c| c.as_ptr());
        kassert!(
            unsafe { *self.owner.get() } != cur || cur.is_null(),
            "non-recursive lock re-entered"
        );
        self.sema.down();
        unsafe { *self.owner.get() = cur };
    }

    /// Release the lock; only the holder may do this.
    pub fn release(&self) {
        let cur = kernel::current().map_or(ptr::null_mut(), |c| c.as_ptr());
        kassert!(
            unsafe { *self.owner.get() } == cur,
            "lock released by non-holder"
        );
        unsafe { *self.owner.get() = ptr::null_mut() };
        self.sema.up();
    }

    /// Whether any task currently holds the lock.
    pub fn is_held(&self) -> bool {
        !unsafe { *self.owner.get() }.is_null()
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}
