//! Intrusive doubly-linked TCB list
//!
//! Every TCB embeds one [`ListNode`] and is threaded through at most one
//! list at a time: the ready list, the blocked list, the sleeping list, or
//! a primitive's waiting list. Linking and unlinking never allocate, which
//! keeps the block/wake paths ISR-safe.
//!
//! Lists are circular through a sentinel node embedded in the list head,
//! so a *linked* TCB never carries a null `prev`. That is load-bearing:
//! the page allocator reads the TCB's first word (`node.prev`) to decide
//! whether a page is free, and only a never-used page (null) or a
//! terminated one (self-linked, i.e. equal to the page base) may qualify.

use core::ptr::{self, NonNull};

use crate::task::Tcb;
use crate::types::{tick_before, Prio};

/// List linkage embedded in every TCB
///
/// `prev` must stay the first word of the TCB; see the module notes.
#[repr(C)]
pub struct ListNode {
    pub(crate) prev: *mut Tcb,
    pub(crate) next: *mut Tcb,
}

impl ListNode {
    pub const fn new() -> Self {
        ListNode {
            prev: ptr::null_mut(),
            next: ptr::null_mut(),
        }
    }

    /// Clear both links
    #[inline]
    pub fn reset(&mut self) {
        self.prev = ptr::null_mut();
        self.next = ptr::null_mut();
    }
}

impl Default for ListNode {
    fn default() -> Self {
        Self::new()
    }
}

/// Circular doubly-linked list of TCBs
///
/// The sentinel [`ListNode`] sits first so the list head can stand in for
/// a TCB in link manipulation. Insertion position encodes the ordering
/// policy: FIFO (`push_back`), priority order with FIFO ties
/// (`insert_by_pri`), or wake-tick order (`insert_by_wake`).
///
/// A list must not be moved while it has members; kernel lists live in
/// statics and primitives pin themselves by handing `&self` to blocked
/// tasks.
#[repr(C)]
pub struct TcbList {
    node: ListNode,
    len: usize,
}

impl TcbList {
    pub const fn new() -> Self {
        TcbList {
            node: ListNode::new(),
            len: 0,
        }
    }

    /// Reset to empty without touching member nodes
    pub fn init(&mut self) {
        self.node.reset();
        self.len = 0;
    }

    /// The sentinel, typed as a TCB pointer for link manipulation. Only
    /// its `node` field (offset 0 in both layouts) is ever accessed.
    #[inline]
    fn sentinel(&self) -> *mut Tcb {
        self as *const TcbList as *mut Tcb
    }

    /// Turn a dormant (all-null) sentinel into an empty circle.
    #[inline]
    fn prime(&mut self) {
        if self.node.prev.is_null() {
            let s = self.sentinel();
            self.node.prev = s;
            self.node.next = s;
        }
    }

    /// First TCB in the list
    #[inline]
    pub fn front(&self) -> Option<NonNull<Tcb>> {
        let next = self.node.next;
        if next.is_null() || next == self.sentinel() {
            None
        } else {
            NonNull::new(next)
        }
    }

    /// Last TCB in the list
    #[inline]
    pub fn back(&self) -> Option<NonNull<Tcb>> {
        let prev = self.node.prev;
        if prev.is_null() || prev == self.sentinel() {
            None
        } else {
            NonNull::new(prev)
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Splice `tcb` between two linked nodes (either may be the sentinel).
    unsafe fn insert_between(&mut self, tcb: NonNull<Tcb>, prev: *mut Tcb, next: *mut Tcb) {
        let t = tcb.as_ptr();
        unsafe {
            (*t).node.prev = prev;
            (*t).node.next = next;
            (*prev).node.next = t;
            (*next).node.prev = t;
            (*t).owner_list = self as *mut TcbList;
        }
        self.len += 1;
    }

    /// Append a TCB at the tail (FIFO order).
    ///
    /// # Safety
    /// `tcb` must be valid and not a member of any list.
    pub unsafe fn push_back(&mut self, tcb: NonNull<Tcb>) {
        self.prime();
        unsafe { self.insert_between(tcb, self.node.prev, self.sentinel()) };
    }

    /// Insert ordered by priority: higher priority (smaller value) first,
    /// FIFO within the same priority.
    ///
    /// # Safety
    /// `tcb` must be valid and not a member of any list.
    pub unsafe fn insert_by_pri(&mut self, tcb: NonNull<Tcb>) {
        let pri = unsafe { tcb.as_ref().pri };
        unsafe { self.insert_before_first(tcb, |t| pri < t.pri) }
    }

    /// Insert ordered by absolute wake tick, earliest first, wrap-safe.
    ///
    /// # Safety
    /// `tcb` must be valid and not a member of any list.
    pub unsafe fn insert_by_wake(&mut self, tcb: NonNull<Tcb>) {
        let wake = unsafe { tcb.as_ref().delay_until };
        unsafe { self.insert_before_first(tcb, |t| tick_before(wake, t.delay_until)) }
    }

    /// Insert before the first member for which `goes_before` holds.
    unsafe fn insert_before_first<F>(&mut self, tcb: NonNull<Tcb>, goes_before: F)
    where
        F: Fn(&Tcb) -> bool,
    {
        self.prime();
        let sentinel = self.sentinel();
        let mut at = self.node.next;
        while at != sentinel {
            if goes_before(unsafe { &*at }) {
                break;
            }
            at = unsafe { (*at).node.next };
        }
        unsafe { self.insert_between(tcb, (*at).node.prev, at) };
    }

    /// Remove a TCB from this list, leaving its node detached (null).
    ///
    /// # Safety
    /// `tcb` must be a member of this list.
    pub unsafe fn remove(&mut self, tcb: NonNull<Tcb>) {
        let t = tcb.as_ptr();
        unsafe {
            let prev = (*t).node.prev;
            let next = (*t).node.next;
            (*prev).node.next = next;
            (*next).node.prev = prev;
            (*t).node.reset();
            (*t).owner_list = ptr::null_mut();
        }
        self.len -= 1;
    }

    /// Detach and return the head.
    pub fn pop_front(&mut self) -> Option<NonNull<Tcb>> {
        let head = self.front()?;
        unsafe { self.remove(head) };
        Some(head)
    }

    /// Move the head to the tail, giving the next member its turn.
    pub fn rotate(&mut self) {
        if self.len < 2 {
            return;
        }
        if let Some(head) = self.pop_front() {
            unsafe { self.push_back(head) };
        }
    }

    /// The member after `tcb`, `None` when `tcb` is the tail.
    ///
    /// Only meaningful while `tcb` is a member of this list.
    pub fn next_of(&self, tcb: NonNull<Tcb>) -> Option<NonNull<Tcb>> {
        let next = unsafe { tcb.as_ref().node.next };
        if next.is_null() || next == self.sentinel() {
            None
        } else {
            NonNull::new(next)
        }
    }

    /// Iterate members front to back.
    ///
    /// The list must not be mutated while the iterator is live.
    pub fn iter(&self) -> TcbIter {
        TcbIter {
            at: self.node.next,
            sentinel: self.sentinel(),
        }
    }

    /// Highest priority present, `None` when empty.
    pub fn highest_pri(&self) -> Option<Prio> {
        self.front().map(|head| {
            self.iter()
                .map(|t| unsafe { t.as_ref().pri })
                .fold(unsafe { head.as_ref().pri }, Prio::min)
        })
    }
}

impl Default for TcbList {
    fn default() -> Self {
        Self::new()
    }
}

// Lists are only touched under IRQ guards.
unsafe impl Send for TcbList {}
unsafe impl Sync for TcbList {}

/// Iterator over list members
pub struct TcbIter {
    at: *mut Tcb,
    sentinel: *mut Tcb,
}

impl Iterator for TcbIter {
    type Item = NonNull<Tcb>;

    fn next(&mut self) -> Option<NonNull<Tcb>> {
        if self.at.is_null() || self.at == self.sentinel {
            return None;
        }
        let cur = NonNull::new(self.at)?;
        self.at = unsafe { cur.as_ref().node.next };
        Some(cur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcb_with_pri(pri: Prio) -> Tcb {
        let mut tcb = Tcb::new();
        tcb.pri = pri;
        tcb.base_pri = pri;
        tcb
    }

    fn pris(list: &TcbList) -> std::vec::Vec<Prio> {
        list.iter().map(|t| unsafe { t.as_ref().pri }).collect()
    }

    #[test]
    fn fifo_push_and_remove() {
        let mut list = TcbList::new();
        let mut a = tcb_with_pri(1);
        let mut b = tcb_with_pri(2);
        let mut c = tcb_with_pri(3);

        unsafe {
            list.push_back(NonNull::from(&mut a));
            list.push_back(NonNull::from(&mut b));
            list.push_back(NonNull::from(&mut c));
        }
        assert_eq!(list.len(), 3);
        assert_eq!(pris(&list), [1, 2, 3]);

        // Linked nodes never carry a null prev; the head's prev is the
        // sentinel. The page allocator depends on this.
        assert!(!a.node.prev.is_null());

        unsafe { list.remove(NonNull::from(&mut b)) };
        assert_eq!(pris(&list), [1, 3]);
        assert!(b.node.prev.is_null() && b.node.next.is_null());

        unsafe { list.remove(NonNull::from(&mut a)) };
        unsafe { list.remove(NonNull::from(&mut c)) };
        assert!(list.is_empty());
        assert_eq!(list.front(), None);
    }

    #[test]
    fn priority_order_fifo_within_band() {
        let mut list = TcbList::new();
        let mut a = tcb_with_pri(10);
        let mut b = tcb_with_pri(5);
        let mut c = tcb_with_pri(10);
        let mut d = tcb_with_pri(20);

        unsafe {
            list.insert_by_pri(NonNull::from(&mut a));
            list.insert_by_pri(NonNull::from(&mut b));
            list.insert_by_pri(NonNull::from(&mut c));
            list.insert_by_pri(NonNull::from(&mut d));
        }

        // 5 first, then the two 10s in insertion order, then 20
        assert_eq!(pris(&list), [5, 10, 10, 20]);
        assert_eq!(
            list.front().unwrap().as_ptr(),
            &mut b as *mut Tcb,
            "highest priority at the head"
        );
        assert_eq!(list.iter().nth(1).unwrap().as_ptr(), &mut a as *mut Tcb);
        assert_eq!(list.highest_pri(), Some(5));
    }

    #[test]
    fn wake_order_handles_tick_wrap() {
        let mut list = TcbList::new();
        let mut a = tcb_with_pri(1);
        let mut b = tcb_with_pri(2);

        // `a` wakes just before the 32-bit wrap, `b` just after it.
        a.delay_until = 0xFFFF_FFF0;
        b.delay_until = 0x0000_0010;

        unsafe {
            list.insert_by_wake(NonNull::from(&mut b));
            list.insert_by_wake(NonNull::from(&mut a));
        }
        assert_eq!(list.front().unwrap().as_ptr(), &mut a as *mut Tcb);
    }

    #[test]
    fn rotate_moves_head_to_tail() {
        let mut list = TcbList::new();
        let mut a = tcb_with_pri(1);
        let mut b = tcb_with_pri(2);
        let mut c = tcb_with_pri(3);

        unsafe {
            list.push_back(NonNull::from(&mut a));
            list.push_back(NonNull::from(&mut b));
            list.push_back(NonNull::from(&mut c));
        }

        list.rotate();
        assert_eq!(pris(&list), [2, 3, 1]);
        list.rotate();
        assert_eq!(pris(&list), [3, 1, 2]);
        list.rotate();
        assert_eq!(pris(&list), [1, 2, 3]);
    }
}
