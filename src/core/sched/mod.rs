//! Scheduler module
//!
//! Selects the next runnable task under the compile-time policy. The
//! context-switch handler calls [`next_tcb`] with interrupts disabled;
//! everything else in the kernel only ever *requests* a switch.

use crate::config::{SCHED_POLICY, TIME_SLICE};
use crate::critical::IrqGuard;
use crate::kernel;
use crate::types::{SchedPolicy, Status};

/// Is any READY task of strictly higher priority than the current one?
///
/// Fast check used by the wake paths to decide whether to yield.
pub fn any_higher() -> bool {
    let guard = IrqGuard::new();
    let st = kernel::STATE.get(&guard);
    match (kernel::current(), st.ready.front()) {
        (Some(cur), Some(head)) => unsafe { head.as_ref().pri < cur.as_ref().pri },
        _ => false,
    }
}

/// Choose the task to run next and publish it through `cur_tcb`.
///
/// Called from the context-switch handler with interrupts disabled. The
/// outgoing task, if still runnable, stays in the ready list and drops
/// from `Running` to `Ready`; policy decides whether it also rotates:
///
/// * `RoundRobin` rotates the ready list by one on every call.
/// * `PreemptPri` keeps priority order and only rotates the outgoing task
///   behind its same-priority peers once its quantum is spent.
#[no_mangle]
pub extern "C" fn next_tcb() {
    unsafe {
        let st = kernel::state();

        if let Some(cur) = kernel::current() {
            let cur_ref = &mut *cur.as_ptr();
            if cur_ref.status == Status::Running {
                cur_ref.status = Status::Ready;
                match SCHED_POLICY {
                    SchedPolicy::RoundRobin => {
                        cur_ref.slice = TIME_SLICE;
                        st.ready.remove(cur);
                        st.ready.push_back(cur);
                    }
                    SchedPolicy::PreemptPri => {
                        if cur_ref.slice == 0 {
                            cur_ref.slice = TIME_SLICE;
                            st.ready.remove(cur);
                            st.ready.insert_by_pri(cur);
                        }
                    }
                }
            }
        }

        if let Some(next) = st.ready.front() {
            (*next.as_ptr()).status = Status::Running;
            kernel::set_current(Some(next));
        }
    }
}
