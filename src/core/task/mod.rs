//! Task management module
//!
//! Task lifecycle: creation onto a stack page, blocking and resumption,
//! synchronous delays, and termination with page recycling.

mod tcb;

pub use tcb::{Tcb, STACK_FILL};

use core::ptr::{self, NonNull};

use crate::config::{MAX_TASK_NUM, PRI_MIN, TIME_SLICE};
use crate::core::list::TcbList;
use crate::core::page::{self, Page, PagePolicy};
use crate::critical::{is_isr_context, IrqGuard};
use crate::error::{KernelError, KernelResult};
use crate::kassert;
use crate::kernel;
use crate::port;
use crate::sched;
use crate::time;
use crate::types::{Prio, Status, TaskFn, Tick};
use crate::info;

/// Create a new task on a pool page.
///
/// Writes a synthetic interrupt-return frame at the top of the page,
/// constructs the TCB at its base, and links it into the ready list at the
/// position its priority dictates. If the kernel is already running and
/// the new task outranks the current one, a context switch is requested.
///
/// # Errors
/// * `CapacityExceeded` - `MAX_TASK_NUM` live tasks already exist
/// * `Oom` - the page pool is exhausted
pub fn create(entry: TaskFn, arg: *mut (), pri: Prio, name: &str) -> KernelResult<NonNull<Tcb>> {
    kassert!(!is_isr_context(), "task creation from ISR context");
    kassert!(pri <= PRI_MIN, "priority out of range");

    let created = {
        let guard = IrqGuard::new();
        let st = kernel::STATE.get(&guard);

        if st.num_tasks() >= MAX_TASK_NUM {
            return Err(KernelError::CapacityExceeded);
        }
        let page = page::palloc(PagePolicy::Pool).ok_or(KernelError::Oom)?;
        unsafe { spawn_on(st, page, entry, arg, pri, name) }?
    };

    if kernel::KERNEL.is_running() && sched::any_higher() {
        port::request_context_switch();
    }
    Ok(created)
}

/// Create a task on a freshly allocated stack of `stack_words` words
/// instead of a pool page.
#[cfg(feature = "alloc")]
pub fn create_with_stack(
    entry: TaskFn,
    arg: *mut (),
    pri: Prio,
    name: &str,
    stack_words: usize,
) -> KernelResult<NonNull<Tcb>> {
    kassert!(!is_isr_context(), "task creation from ISR context");
    kassert!(pri <= PRI_MIN, "priority out of range");

    let created = {
        let guard = IrqGuard::new();
        let st = kernel::STATE.get(&guard);

        if st.num_tasks() >= MAX_TASK_NUM {
            return Err(KernelError::CapacityExceeded);
        }
        let page = page::palloc(PagePolicy::Dynamic(stack_words)).ok_or(KernelError::Oom)?;
        unsafe { spawn_on(st, page, entry, arg, pri, name) }?
    };

    if kernel::KERNEL.is_running() && sched::any_higher() {
        port::request_context_switch();
    }
    Ok(created)
}

/// Construct the TCB and initial frame on `page` and make the task ready.
///
/// # Safety
/// Caller holds the IRQ guard and has verified the task count.
unsafe fn spawn_on(
    st: &mut kernel::KernelState,
    page: Page,
    entry: TaskFn,
    arg: *mut (),
    pri: Prio,
    name: &str,
) -> KernelResult<NonNull<Tcb>> {
    let tcb_ptr = page.base().as_ptr() as *mut Tcb;

    let mut tcb = Tcb::new();
    tcb.page = page;
    tcb.entry = Some(entry);
    tcb.arg = arg;
    tcb.pri = pri;
    tcb.base_pri = pri;
    tcb.slice = TIME_SLICE;
    tcb.parent = kernel::current().map_or(0, |c| unsafe { c.as_ref().tid });
    tcb.set_name(name);
    unsafe { ptr::write(tcb_ptr, tcb) };

    let tcb_ref = unsafe { &mut *tcb_ptr };

    // Fill the stack region for the watermark scan, then plant the frame.
    let mut word = tcb_ref.stack_floor();
    let top = tcb_ref.stack_top();
    while word < top {
        unsafe {
            *word = STACK_FILL;
            word = word.add(1);
        }
    }
    tcb_ref.sp = unsafe { port::init_stack_frame(top, entry, arg) };

    let tcb_nn = unsafe { NonNull::new_unchecked(tcb_ptr) };
    match st.register(tcb_nn) {
        Some(tid) => tcb_ref.tid = tid,
        None => {
            unsafe { page::pfree(page) };
            return Err(KernelError::CapacityExceeded);
        }
    }
    unsafe { st.ready.insert_by_pri(tcb_nn) };

    Ok(tcb_nn)
}

/// Look a task up by name, O(n) over the registry.
pub fn find(name: &str) -> Option<NonNull<Tcb>> {
    let guard = IrqGuard::new();
    let st = kernel::STATE.get(&guard);
    st.task_iter()
        .find(|t| unsafe { t.as_ref().name.as_str() } == tcb::truncate_name(name))
}

/// Give up the processor; returns when the task is next scheduled.
pub fn yield_now() {
    kassert!(port::irq_enabled(), "yield with IRQs disabled");
    port::request_context_switch();
}

/// Move a task (`None` = the caller) onto the global blocked list.
///
/// Blocking the current task yields immediately.
pub fn block(tcb: Option<NonNull<Tcb>>) {
    kassert!(port::irq_enabled(), "blocking call with IRQs disabled");
    kassert!(!is_isr_context(), "block from ISR context");

    let target = {
        let guard = IrqGuard::new();
        let st = kernel::STATE.get(&guard);
        let Some(target) = tcb.or_else(kernel::current) else {
            return;
        };
        unsafe { block_to(target, &mut st.blocked) };
        target
    };

    if Some(target) == kernel::current() {
        yield_now();
    }
}

/// Move a blocked or sleeping task back to the ready list.
pub fn resume(tcb: NonNull<Tcb>) {
    kassert!(port::irq_enabled(), "blocking call with IRQs disabled");

    {
        let _guard = IrqGuard::new();
        let t = unsafe { &mut *tcb.as_ptr() };
        if t.status != Status::Blocked || t.owner_list.is_null() {
            return;
        }
        unsafe { wake_from(tcb, &mut *t.owner_list) };
    }

    if sched::any_higher() {
        yield_now();
    }
}

/// Tear a task down: unlink it, mark it `Terminated`, and hand its page
/// back to the allocator with the head word pointing at the page base.
///
/// Terminating the caller (`None`) yields and never returns.
pub fn terminate(tcb: Option<NonNull<Tcb>>) {
    kassert!(!is_isr_context(), "terminate from ISR context");

    let is_self = {
        let guard = IrqGuard::new();
        let st = kernel::STATE.get(&guard);
        let Some(target) = tcb.or_else(kernel::current) else {
            return;
        };
        let t = unsafe { &mut *target.as_ptr() };
        kassert!(t.base_pri != PRI_MIN, "terminating the idle task");

        if !t.owner_list.is_null() {
            unsafe { (*t.owner_list).remove(target) };
        }
        t.status = Status::Terminated;
        st.unregister(t.tid);

        // Self-link the node: the page head word now equals the page base,
        // which is the allocator's recycled marker.
        let page = t.page;
        t.node.prev = target.as_ptr();
        unsafe { page::pfree(page) };

        Some(target) == kernel::current()
    };

    if is_self {
        yield_now();
        #[cfg(target_arch = "arm")]
        loop {
            port::wfi();
        }
    }
}

/// Sleep for `ticks` system ticks.
///
/// The caller moves to the sleeping list; the tick handler resumes it once
/// `os_ticks` reaches the recorded wake tick.
pub fn delay(ticks: Tick) {
    kassert!(port::irq_enabled(), "blocking call with IRQs disabled");
    kassert!(!is_isr_context(), "delay from ISR context");

    if ticks == 0 {
        return;
    }

    {
        let guard = IrqGuard::new();
        let st = kernel::STATE.get(&guard);
        let Some(cur) = kernel::current() else {
            return;
        };
        let t = unsafe { &mut *cur.as_ptr() };
        t.delay_until = time::now().wrapping_add(ticks);

        if !t.owner_list.is_null() {
            unsafe { (*t.owner_list).remove(cur) };
        }
        t.status = Status::Blocked;
        unsafe { st.sleeping.insert_by_wake(cur) };
    }

    yield_now();
}

/// Sleep for (at least) `ms` milliseconds.
pub fn delay_ms(ms: u32) {
    delay(time::ms_to_ticks(ms));
}

/// Log a snapshot of every live task: id, name, priority, state, and
/// stack high-water mark.
#[allow(unused_variables)]
pub fn print_all() {
    let guard = IrqGuard::new();
    let st = kernel::STATE.get(&guard);
    info!("tid name             pri state stack");
    for t in st.task_iter() {
        let t = unsafe { t.as_ref() };
        info!(
            "{=u16} {=str} {=u8} {=str} {=usize}/{=usize}",
            t.tid,
            t.name.as_str(),
            t.pri,
            status_name(t.status),
            t.stack_usage(),
            t.stack_size()
        );
    }
}

#[allow(dead_code)]
fn status_name(status: Status) -> &'static str {
    match status {
        Status::Ready => "READY",
        Status::Running => "RUNNING",
        Status::Blocked => "BLOCKED",
        Status::Terminated => "TERMINATED",
    }
}

/// The currently running task.
#[inline]
pub fn current() -> Option<NonNull<Tcb>> {
    kernel::current()
}

// ============ Internal transitions used by the sync primitives ============

/// Detach `tcb` from whatever list holds it and park it on `wait_list`.
///
/// # Safety
/// Caller holds an IRQ guard; `tcb` is live.
pub(crate) unsafe fn block_to(tcb: NonNull<Tcb>, wait_list: &mut TcbList) {
    let t = unsafe { &mut *tcb.as_ptr() };
    if !t.owner_list.is_null() {
        unsafe { (*t.owner_list).remove(tcb) };
    }
    t.status = Status::Blocked;
    unsafe { wait_list.insert_by_pri(tcb) };
}

/// Detach `tcb` from `wait_list` and make it ready.
///
/// # Safety
/// Caller holds an IRQ guard; `tcb` is a member of `wait_list`.
pub(crate) unsafe fn wake_from(tcb: NonNull<Tcb>, wait_list: &mut TcbList) {
    let t = unsafe { &mut *tcb.as_ptr() };
    unsafe { wait_list.remove(tcb) };
    t.status = Status::Ready;
    unsafe { kernel::state().ready.insert_by_pri(tcb) };
}

/// Priority-inheritance boost: raise `tcb` to `pri` if that is a raise,
/// repositioning it in the ready list when it is runnable.
///
/// # Safety
/// Caller holds an IRQ guard; `tcb` is live.
pub(crate) unsafe fn raise_pri(tcb: NonNull<Tcb>, pri: Prio) {
    let t = unsafe { &mut *tcb.as_ptr() };
    if pri >= t.pri {
        return;
    }
    if t.is_ready() {
        let ready = unsafe { &mut kernel::state().ready };
        unsafe { ready.remove(tcb) };
        t.store_pri(pri);
        unsafe { ready.insert_by_pri(tcb) };
    } else {
        // Waiting lists keep their snapshot order; the wake path reads the
        // boosted priority when it matters.
        t.store_pri(pri);
    }
}

/// Undo any priority-inheritance boost on `tcb`.
///
/// # Safety
/// Caller holds an IRQ guard; `tcb` is live.
pub(crate) unsafe fn drop_boost(tcb: NonNull<Tcb>) {
    let t = unsafe { &mut *tcb.as_ptr() };
    if t.pri == t.base_pri {
        return;
    }
    if t.is_ready() {
        let ready = unsafe { &mut kernel::state().ready };
        unsafe { ready.remove(tcb) };
        t.restore_pri();
        unsafe { ready.insert_by_pri(tcb) };
    } else {
        t.restore_pri();
    }
}

/// Landing pad planted as LR in every initial frame: returning from an
/// entry function terminates the task.
#[cfg_attr(not(target_arch = "arm"), allow(dead_code))]
pub(crate) extern "C" fn task_exit() -> ! {
    terminate(None);
    loop {
        port::wfi();
    }
}
