//! Recursive mutex with priority inheritance
//!
//! A low-priority holder is boosted to the highest waiting priority so a
//! medium-priority task cannot starve it (bounded priority inversion).
//! Release with waiters hands ownership directly to the first of them, so
//! no third task can slip in between wake and reschedule.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::ptr::{self, NonNull};

use crate::core::list::TcbList;
use crate::critical::IrqGuard;
use crate::kassert;
use crate::kernel;
use crate::port;
use crate::sched;
use crate::task::{self, Tcb};

struct MutexInner {
    cnt: i32,
    waiting: TcbList,
    owner: *mut Tcb,
    recursive: u32,
}

/// Priority-inheriting recursive mutex, optionally carrying the data it
/// protects.
///
/// `Mutex<()>` is a bare lock; `Mutex<T>` hands out an RAII guard that
/// dereferences to `T`.
pub struct Mutex<T = ()> {
    inner: UnsafeCell<MutexInner>,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl Mutex<()> {
    /// Create a bare mutex.
    pub const fn new() -> Self {
        Self::with(())
    }
}

impl Default for Mutex<()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Mutex<T> {
    /// Create a mutex protecting `data`.
    pub const fn with(data: T) -> Self {
        Mutex {
            inner: UnsafeCell::new(MutexInner {
                cnt: 1,
                waiting: TcbList::new(),
                owner: ptr::null_mut(),
                recursive: 0,
            }),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquire, returning a guard that releases on drop.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.raw_lock();
        MutexGuard { mtx: self }
    }

    /// Acquire, run `scope` on the protected data, release.
    pub fn lock_with<R>(&self, scope: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.lock();
        scope(&mut guard)
    }

    /// Whether any task currently owns the mutex.
    pub fn is_owned(&self) -> bool {
        let _guard = IrqGuard::new();
        !unsafe { &*self.inner.get() }.owner.is_null()
    }

    /// The owning task, if any.
    pub fn owner(&self) -> Option<NonNull<Tcb>> {
        let _guard = IrqGuard::new();
        NonNull::new(unsafe { &*self.inner.get() }.owner)
    }

    /// The owner's recursion depth, 0 when free.
    pub fn hold_count(&self) -> u32 {
        let _guard = IrqGuard::new();
        unsafe { &*self.inner.get() }.recursive
    }

    pub(crate) fn data_ptr(&self) -> *mut T {
        self.data.get()
    }

    /// Lock without constructing a guard; pair with [`Mutex::raw_unlock`].
    pub fn raw_lock(&self) {
        kassert!(port::irq_enabled(), "blocking call with IRQs disabled");

        let must_yield = {
            let _guard = IrqGuard::new();
            let inner = unsafe { &mut *self.inner.get() };
            let Some(cur) = kernel::current() else {
                panic!("locking with no current task");
            };

            if inner.owner == cur.as_ptr() {
                inner.recursive += 1;
                return;
            }

            // Priority inheritance: a holder of weaker priority rises to
            // the requester's level until it releases.
            let cur_pri = unsafe { cur.as_ref().pri };
            if let Some(owner) = NonNull::new(inner.owner) {
                if cur_pri < unsafe { owner.as_ref().pri } {
                    unsafe { task::raise_pri(owner, cur_pri) };
                }
            }

            inner.cnt -= 1;
            if inner.cnt < 0 {
                // The releaser hands ownership over before waking us.
                unsafe { task::block_to(cur, &mut inner.waiting) };
                true
            } else {
                inner.owner = cur.as_ptr();
                inner.recursive = 1;
                false
            }
        };

        if must_yield {
            task::yield_now();
        }
    }

    /// Release one level of ownership; only the holder may call this.
    pub fn raw_unlock(&self) {
        kassert!(port::irq_enabled(), "mutex unlock with IRQs disabled");

        let must_yield = {
            let _guard = IrqGuard::new();
            let inner = unsafe { &mut *self.inner.get() };
            let cur = kernel::current().map_or(ptr::null_mut(), |c| c.as_ptr());
            kassert!(inner.owner == cur, "mutex released by non-holder");

            inner.recursive -= 1;
            if inner.recursive > 0 {
                return;
            }

            if let Some(owner) = NonNull::new(inner.owner) {
                unsafe { task::drop_boost(owner) };
            }

            if let Some(first) = inner.waiting.front() {
                // Direct hand-off: the woken waiter owns the mutex before
                // anyone else can observe it free.
                unsafe { task::wake_from(first, &mut inner.waiting) };
                inner.owner = first.as_ptr();
                inner.recursive = 1;
                inner.cnt += 1;
                true
            } else {
                inner.owner = ptr::null_mut();
                inner.cnt += 1;
                false
            }
        };

        if must_yield && sched::any_higher() {
            task::yield_now();
        }
    }
}

/// RAII scope for a held [`Mutex`]
pub struct MutexGuard<'a, T> {
    mtx: &'a Mutex<T>,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.mtx.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mtx.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mtx.raw_unlock();
    }
}
