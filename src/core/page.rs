//! Page-based stack allocator
//!
//! Tasks run on fixed-size pages. Pool pages come from a static array and
//! are recycled by recognizing the head-word convention: a page is unused
//! when its first word is null (never used) or points at the page base
//! (the terminated task's list node is self-linked). Dynamic pages come
//! from the global allocator when the `alloc` feature is enabled.

use core::ptr::NonNull;

use crate::config::{PAGE_SIZE, POOL_SIZE};
use crate::core::cs_cell::CsCell;
use crate::critical::IrqGuard;

/// Words per page
pub const PAGE_WORDS: usize = PAGE_SIZE / core::mem::size_of::<u32>();

/// Where a page's storage comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagePolicy {
    /// One of the `POOL_SIZE` preallocated pages
    Pool,
    /// A fresh allocation of the given number of words
    #[cfg(feature = "alloc")]
    Dynamic(usize),
}

/// Handle to an allocated page
#[derive(Clone, Copy)]
pub struct Page {
    base: NonNull<u32>,
    words: usize,
    policy: PagePolicy,
}

impl Page {
    /// Placeholder handle for TCBs not yet bound to a page; never valid to
    /// dereference.
    pub(crate) const fn invalid() -> Self {
        Page {
            base: NonNull::dangling(),
            words: 0,
            policy: PagePolicy::Pool,
        }
    }

    /// Base address, also where the owning TCB is constructed
    #[inline]
    pub fn base(&self) -> NonNull<u32> {
        self.base
    }

    /// Page length in words
    #[inline]
    pub fn words(&self) -> usize {
        self.words
    }

    /// One past the last word, where the initial stack frame is built
    #[inline]
    pub fn top(&self) -> *mut u32 {
        unsafe { self.base.as_ptr().add(self.words) }
    }

    #[inline]
    pub fn policy(&self) -> PagePolicy {
        self.policy
    }
}

unsafe impl Send for Page {}

/// Backing storage for one pool page, 8-aligned for AAPCS stacks
#[repr(C, align(8))]
struct PageMem([u32; PAGE_WORDS]);

struct PagePool {
    pages: [PageMem; POOL_SIZE],
}

impl PagePool {
    const fn new() -> Self {
        PagePool {
            pages: [const { PageMem([0; PAGE_WORDS]) }; POOL_SIZE],
        }
    }
}

static POOL: CsCell<PagePool> = CsCell::new(PagePool::new());

/// Drop every pool page back to the never-used state.
pub(crate) fn pool_reset(guard: &IrqGuard) {
    let pool = POOL.get(guard);
    for mem in pool.pages.iter_mut() {
        mem.0[0] = 0;
    }
}

/// Whether a pool page is free: head word null (never used) or equal to
/// its own base (used once and recycled).
#[inline]
fn unused(base: *mut u32) -> bool {
    let head = unsafe { *base };
    head == 0 || head == base as usize as u32
}

/// Allocate a page under the given policy, `None` when exhausted.
pub fn palloc(policy: PagePolicy) -> Option<Page> {
    let guard = IrqGuard::new();
    match policy {
        PagePolicy::Pool => {
            let pool = POOL.get(&guard);
            for mem in pool.pages.iter_mut() {
                let base = mem.0.as_mut_ptr();
                if unused(base) {
                    // Claim immediately so a nested palloc cannot race us.
                    unsafe { *base = usize::MAX as u32 };
                    return Some(Page {
                        base: unsafe { NonNull::new_unchecked(base) },
                        words: PAGE_WORDS,
                        policy,
                    });
                }
            }
            None
        }

        #[cfg(feature = "alloc")]
        PagePolicy::Dynamic(words) => {
            let layout =
                core::alloc::Layout::from_size_align(words * core::mem::size_of::<u32>(), 8)
                    .ok()?;
            let raw = unsafe { alloc::alloc::alloc(layout) } as *mut u32;
            NonNull::new(raw).map(|base| Page {
                base,
                words,
                policy,
            })
        }
    }
}

/// Return a page to its source.
///
/// For pool pages the head word is rewritten to the page base, which is
/// what `palloc` looks for. Dynamic pages go back to the allocator.
///
/// # Safety
/// No task may still be running on the page.
pub unsafe fn pfree(page: Page) {
    let _guard = IrqGuard::new();
    match page.policy {
        PagePolicy::Pool => unsafe {
            *page.base.as_ptr() = page.base.as_ptr() as usize as u32;
        },

        #[cfg(feature = "alloc")]
        PagePolicy::Dynamic(words) => unsafe {
            let layout = core::alloc::Layout::from_size_align_unchecked(
                words * core::mem::size_of::<u32>(),
                8,
            );
            alloc::alloc::dealloc(page.base.as_ptr() as *mut u8, layout);
        },
    }
}
