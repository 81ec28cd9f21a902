//! Time management module
//!
//! The tick handler drives the kernel clock: it wakes due sleepers,
//! charges the running task's quantum, and requests preemption when the
//! policy calls for it.

use crate::config::{SCHED_POLICY, SYSTICK, TIME_SLICE};
use crate::critical::IrqGuard;
use crate::kernel::{self, KERNEL};
use crate::port;
use crate::task;
use crate::types::{tick_reached, SchedPolicy, Status, Tick};

/// Current tick count
#[inline]
pub fn now() -> Tick {
    KERNEL.tick_get()
}

/// Convert milliseconds to ticks at the configured tick rate.
#[inline]
pub const fn ms_to_ticks(ms: u32) -> Tick {
    ((ms as u64 * SYSTICK as u64) / 1000) as Tick
}

/// Timer tick entry point, called at `SYSTICK` Hz from the tick ISR.
pub fn os_tick_handler() {
    if !KERNEL.is_running() {
        return;
    }

    let now = KERNEL.tick_increment();
    let mut preempt = false;

    {
        let guard = IrqGuard::new();
        let st = kernel::STATE.get(&guard);

        // Wake every sleeper whose tick has come. The list is wake-ordered,
        // so stop at the first one still pending.
        while let Some(head) = st.sleeping.front() {
            if tick_reached(now, unsafe { head.as_ref().delay_until }) {
                unsafe { task::wake_from(head, &mut st.sleeping) };
            } else {
                break;
            }
        }

        // Quantum accounting applies only to a task actually on the CPU;
        // `cur_tcb` may already be parked when a blocking call is waiting
        // for its requested switch.
        if let Some(cur) = kernel::current() {
            let cur_ref = unsafe { &mut *cur.as_ptr() };
            if cur_ref.status == Status::Running {
                if cur_ref.slice > 0 {
                    cur_ref.slice -= 1;
                }

                match SCHED_POLICY {
                    SchedPolicy::RoundRobin => {
                        if cur_ref.slice == 0 && st.ready.len() > 1 {
                            preempt = true;
                        }
                    }
                    SchedPolicy::PreemptPri => {
                        if let Some(head) = st.ready.front() {
                            if unsafe { head.as_ref().pri } < cur_ref.pri {
                                preempt = true;
                            }
                        }
                        if cur_ref.slice == 0 {
                            // Rotating only pays off with a same-priority
                            // peer queued right behind us.
                            let peer_behind = st
                                .ready
                                .next_of(cur)
                                .is_some_and(|n| unsafe { n.as_ref().pri } == cur_ref.pri);
                            if peer_behind {
                                preempt = true;
                            } else {
                                cur_ref.slice = TIME_SLICE;
                            }
                        }
                    }
                }
            }
        }
    }

    if preempt {
        port::request_context_switch();
    }
}

/// SysTick interrupt handler
#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn SysTick() {
    os_tick_handler();
}
