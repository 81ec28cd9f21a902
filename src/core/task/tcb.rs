//! Task Control Block (TCB) definition
//!
//! The TCB lives at the base of its stack page; the stack grows down from
//! the page top toward it. Field order at the start is part of the port
//! contract: the intrusive list node comes first (its `prev` word doubles
//! as the page-recycling marker) and `sp` sits at byte offset 8, where the
//! context-switch handler reads and writes it by name.

use core::ptr;

use heapless::String;

use crate::config::{TASK_NAME_LEN, TIME_SLICE};
use crate::core::list::{ListNode, TcbList};
use crate::core::page::Page;
use crate::types::{Prio, Status, TaskFn, TaskId, Tick};

/// Pattern written over the free stack area at creation, consumed by the
/// watermark scan.
pub const STACK_FILL: u32 = 0xDEAD_BEEF;

/// Task Control Block
#[repr(C)]
pub struct Tcb {
    /// List linkage, must stay first
    pub node: ListNode,

    /// Saved stack pointer, read by the context-switch handler at offset 8
    pub sp: *mut u32,

    /// List this TCB is currently threaded through, null when detached
    pub(crate) owner_list: *mut TcbList,

    /// The page carrying this TCB and its stack
    pub(crate) page: Page,

    /// Entry function
    pub entry: Option<TaskFn>,
    /// Opaque argument handed to the entry function
    pub arg: *mut (),

    /// Task id, index into the kernel registry
    pub tid: TaskId,
    /// Creator's task id
    pub parent: TaskId,

    /// Current priority, possibly boosted by priority inheritance
    pub pri: Prio,
    /// Priority given at creation, restored when inheritance ends
    pub base_pri: Prio,

    /// Task state
    pub status: Status,

    /// Remaining round-robin quantum in ticks
    pub slice: Tick,

    /// Absolute tick at which a sleeping task becomes due
    pub delay_until: Tick,

    /// Task name, truncated to `TASK_NAME_LEN` bytes
    pub name: String<TASK_NAME_LEN>,
}

impl Tcb {
    /// Create a detached, unnamed TCB
    pub const fn new() -> Self {
        Tcb {
            node: ListNode::new(),
            sp: ptr::null_mut(),
            owner_list: ptr::null_mut(),
            page: Page::invalid(),
            entry: None,
            arg: ptr::null_mut(),
            tid: 0,
            parent: 0,
            pri: 0,
            base_pri: 0,
            status: Status::Ready,
            slice: TIME_SLICE,
            delay_until: 0,
            name: String::new(),
        }
    }

    /// Copy `name` in, truncating to the configured length.
    pub fn set_name(&mut self, name: &str) {
        self.name.clear();
        // Cannot fail: the slice is at most the backing capacity.
        let _ = self.name.push_str(truncate_name(name));
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        matches!(self.status, Status::Ready | Status::Running)
    }

    /// Raise the current priority to `pri` if that is an actual raise.
    ///
    /// `base_pri` is untouched, so only the first boost in a chain records
    /// the original and nested no-op boosts are idempotent.
    #[inline]
    pub(crate) fn store_pri(&mut self, pri: Prio) {
        if pri < self.pri {
            self.pri = pri;
        }
    }

    /// Drop any inherited boost, returning to the creation priority.
    #[inline]
    pub(crate) fn restore_pri(&mut self) {
        self.pri = self.base_pri;
    }

    /// First word of the stack region, just above the TCB itself.
    pub(crate) fn stack_floor(&self) -> *mut u32 {
        let tcb_words = (core::mem::size_of::<Tcb>() + 3) / 4;
        unsafe { self.page.base().as_ptr().add(tcb_words) }
    }

    /// Aligned top of the stack region.
    pub(crate) fn stack_top(&self) -> *mut u32 {
        ((self.page.top() as usize) & !7) as *mut u32
    }

    /// High-water mark of stack usage in bytes.
    ///
    /// Scans upward from the stack floor for the first word the task has
    /// written over the fill pattern.
    pub fn stack_usage(&self) -> usize {
        let floor = self.stack_floor();
        let top = self.stack_top();
        let words = (top as usize - floor as usize) / 4;
        for i in 0..words {
            if unsafe { *floor.add(i) } != STACK_FILL {
                return (words - i) * 4;
            }
        }
        0
    }

    /// Total stack capacity in bytes.
    pub fn stack_size(&self) -> usize {
        self.stack_top() as usize - self.stack_floor() as usize
    }
}

impl Default for Tcb {
    fn default() -> Self {
        Self::new()
    }
}

/// Clamp a name to `TASK_NAME_LEN` bytes on a character boundary.
pub(crate) fn truncate_name(name: &str) -> &str {
    let mut end = name.len().min(TASK_NAME_LEN);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

unsafe impl Send for Tcb {}
unsafe impl Sync for Tcb {}
