//! Coroutine frame storage
//!
//! Coroutine state machines are the only kernel objects whose size is
//! unknown at task-creation time. Frames come either from the global
//! allocator or, with the `async-pool` feature, from a fixed-block pool
//! of `ASYNC_POOL_MAX` blocks of `ASYNC_FRAME_SIZE` bytes each.

#![allow(unused_imports)]

use core::alloc::Layout;
use core::ptr::NonNull;

use crate::config::{ASYNC_FRAME_SIZE, ASYNC_POOL_MAX};
use crate::core::cs_cell::CsCell;
use crate::critical::IrqGuard;
use crate::kassert;

/// Block alignment, the `max_align_t` of the platform ABI.
pub const FRAME_ALIGN: usize = 16;

#[cfg(feature = "async-pool")]
mod fixed {
    use super::*;
    use crate::kassert;

    #[repr(C, align(16))]
    struct Block([u8; ASYNC_FRAME_SIZE]);

    struct FramePool {
        blocks: [Block; ASYNC_POOL_MAX],
        used: [bool; ASYNC_POOL_MAX],
    }

    impl FramePool {
        const fn new() -> Self {
            FramePool {
                blocks: [const { Block([0; ASYNC_FRAME_SIZE]) }; ASYNC_POOL_MAX],
                used: [false; ASYNC_POOL_MAX],
            }
        }
    }

    static POOL: CsCell<FramePool> = CsCell::new(FramePool::new());

    pub(super) fn alloc(layout: Layout) -> NonNull<u8> {
        kassert!(
            layout.size() <= ASYNC_FRAME_SIZE && layout.align() <= FRAME_ALIGN,
            "coroutine frame exceeds the pool block size"
        );
        let guard = IrqGuard::new();
        let pool = POOL.get(&guard);
        for (idx, used) in pool.used.iter_mut().enumerate() {
            if !*used {
                *used = true;
                let ptr = pool.blocks[idx].0.as_mut_ptr();
                return unsafe { NonNull::new_unchecked(ptr) };
            }
        }
        panic!("coroutine frame pool exhausted");
    }

    pub(super) fn dealloc(ptr: NonNull<u8>, _layout: Layout) {
        let guard = IrqGuard::new();
        let pool = POOL.get(&guard);
        let base = pool.blocks.as_ptr() as usize;
        let offset = ptr.as_ptr() as usize - base;
        let idx = offset / core::mem::size_of::<Block>();
        kassert!(
            idx < ASYNC_POOL_MAX && offset % core::mem::size_of::<Block>() == 0,
            "frame pointer not from the pool"
        );
        pool.used[idx] = false;
    }
}

/// Allocate storage for one coroutine frame.
#[cfg(any(feature = "alloc", feature = "async-pool"))]
pub(crate) fn frame_alloc(layout: Layout) -> NonNull<u8> {
    #[cfg(feature = "async-pool")]
    {
        fixed::alloc(layout)
    }

    #[cfg(all(not(feature = "async-pool"), feature = "alloc"))]
    {
        let raw = unsafe { alloc::alloc::alloc(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            panic!("coroutine frame allocation failed");
        };
        ptr
    }
}

/// Release a coroutine frame.
///
/// # Safety
/// `ptr` came from [`frame_alloc`] with the same `layout` and is not used
/// afterwards.
#[cfg(any(feature = "alloc", feature = "async-pool"))]
pub(crate) unsafe fn frame_dealloc(ptr: NonNull<u8>, layout: Layout) {
    #[cfg(feature = "async-pool")]
    {
        fixed::dealloc(ptr, layout);
    }

    #[cfg(all(not(feature = "async-pool"), feature = "alloc"))]
    {
        unsafe { alloc::alloc::dealloc(ptr.as_ptr(), layout) };
    }
}
