//! Compile-time configuration for MOS
//!
//! These constants control the behavior and resource limits of the kernel.

use crate::types::{Prio, SchedPolicy, Tick};

/// Hard upper bound on live tasks
pub const MAX_TASK_NUM: usize = 16;

/// Number of preallocated stack pages
pub const POOL_SIZE: usize = 16;

/// Stack page size in bytes
pub const PAGE_SIZE: usize = 1024;

/// System tick rate in Hz
pub const SYSTICK: u32 = 1000;

/// Highest priority (numerically smallest)
pub const PRI_MAX: Prio = 0;

/// Lowest priority, reserved for the idle task
pub const PRI_MIN: Prio = 127;

/// Round-robin quantum within a priority band, in ticks
pub const TIME_SLICE: Tick = 50;

/// Scheduling policy, fixed at compile time
pub const SCHED_POLICY: SchedPolicy = if cfg!(feature = "sched-round-robin") {
    SchedPolicy::RoundRobin
} else {
    SchedPolicy::PreemptPri
};

/// Capacity of each executor ready buffer and of the sleeper heap
pub const ASYNC_TASK_MAX: usize = 256;

/// Inline capacity of `FixedFn` in bytes
pub const ASYNC_TASK_SIZE: usize = 32;

/// Number of blocks in the coroutine frame pool
pub const ASYNC_POOL_MAX: usize = 200;

/// Size of one coroutine frame block in bytes
pub const ASYNC_FRAME_SIZE: usize = 64;

/// Whether coroutine frames come from the fixed-block pool
pub const ASYNC_USE_POOL: bool = cfg!(feature = "async-pool");

/// Maximum task name length in bytes, longer names are truncated
pub const TASK_NAME_LEN: usize = 16;

/// Size of the user name shown by the shell
pub const USER_NAME_SIZE: usize = 8;

/// Core clock feeding SysTick
pub const CPU_CLOCK_HZ: u32 = 16_000_000;
