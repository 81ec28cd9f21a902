//! Core type definitions for MOS
//!
//! These types provide strong typing for kernel primitives.

/// Task priority (0 = highest priority)
pub type Prio = u8;

/// Tick counter type
pub type Tick = u32;

/// Task identifier, index into the kernel task registry
pub type TaskId = u16;

/// Task entry point type
///
/// Returning from the entry function terminates the task through the
/// exit trampoline planted in the initial context frame.
pub type TaskFn = fn(*mut ());

/// Task state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    /// Task is linked into the ready list
    Ready = 0,
    /// Task is the one `cur_tcb` points at
    Running = 1,
    /// Task is waiting on a kernel object or sleeping
    Blocked = 2,
    /// Task is dead and unreachable from any list
    Terminated = 3,
}

/// Scheduling policy selected by `config::SCHED_POLICY`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedPolicy {
    /// Rotate the ready list by one on every switch
    RoundRobin,
    /// Highest priority first, round-robin within a priority band
    PreemptPri,
}

/// `true` if `a` orders strictly before `b` in wrapping tick time
///
/// Valid for distances below 2^31 ticks.
#[inline(always)]
pub const fn tick_before(a: Tick, b: Tick) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// `true` if `now` has reached the absolute tick `at`, wrap-safe
#[inline(always)]
pub const fn tick_reached(now: Tick, at: Tick) -> bool {
    (now.wrapping_sub(at) as i32) >= 0
}
