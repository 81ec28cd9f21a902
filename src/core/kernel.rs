//! Global kernel state and initialization
//!
//! The process-wide singletons live here: the current-TCB pointer the
//! context-switch handler reads by name, the ready/blocked/sleeping lists,
//! the task registry, and the tick counter.

use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::config::{CPU_CLOCK_HZ, MAX_TASK_NUM, PRI_MIN, SYSTICK};
use crate::core::cs_cell::CsCell;
use crate::core::list::TcbList;
use crate::core::page;
use crate::critical::IrqGuard;
use crate::error::{KernelError, KernelResult};
use crate::port;
use crate::task::Tcb;
use crate::types::{Status, TaskId, Tick};

// ============ Kernel flags ============

/// Atomic kernel flags
pub struct KernelFlags {
    initialized: AtomicBool,
    running: AtomicBool,
    ticks: AtomicU32,
}

impl KernelFlags {
    const fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            running: AtomicBool::new(false),
            ticks: AtomicU32::new(0),
        }
    }

    pub(crate) fn reset(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        self.tick_set(0);
    }

    /// Check if the kernel has started multitasking
    #[inline(always)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Check if the kernel is initialized
    #[inline(always)]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Get the current tick count
    #[inline(always)]
    pub fn tick_get(&self) -> Tick {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Increment and return the tick count
    #[inline(always)]
    pub(crate) fn tick_increment(&self) -> Tick {
        self.ticks.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    #[inline(always)]
    pub(crate) fn tick_set(&self, tick: Tick) {
        self.ticks.store(tick, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn set_initialized(&self, val: bool) {
        self.initialized.store(val, Ordering::SeqCst);
    }

    #[inline(always)]
    pub(crate) fn set_running(&self, val: bool) {
        self.running.store(val, Ordering::SeqCst);
    }
}

/// Global kernel flags instance
pub(crate) static KERNEL: KernelFlags = KernelFlags::new();

// ============ Scheduler state ============

/// Kernel list state and task registry
pub struct KernelState {
    /// Runnable tasks, priority-ordered, FIFO within a band
    pub(crate) ready: TcbList,
    /// Tasks parked through `task::block`
    pub(crate) blocked: TcbList,
    /// Delayed tasks ordered by wake tick
    pub(crate) sleeping: TcbList,
    /// Every live task, indexed by id
    tasks: [Option<NonNull<Tcb>>; MAX_TASK_NUM],
    num_tasks: usize,
}

impl KernelState {
    const fn new() -> Self {
        Self {
            ready: TcbList::new(),
            blocked: TcbList::new(),
            sleeping: TcbList::new(),
            tasks: [None; MAX_TASK_NUM],
            num_tasks: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.ready.init();
        self.blocked.init();
        self.sleeping.init();
        self.tasks = [None; MAX_TASK_NUM];
        self.num_tasks = 0;
    }

    /// Number of live tasks
    #[inline]
    pub fn num_tasks(&self) -> usize {
        self.num_tasks
    }

    /// Claim a registry slot, returning the new task id.
    pub(crate) fn register(&mut self, tcb: NonNull<Tcb>) -> Option<TaskId> {
        let slot = self.tasks.iter().position(|t| t.is_none())?;
        self.tasks[slot] = Some(tcb);
        self.num_tasks += 1;
        Some(slot as TaskId)
    }

    /// Release a registry slot.
    pub(crate) fn unregister(&mut self, tid: TaskId) {
        let slot = tid as usize;
        if slot < MAX_TASK_NUM && self.tasks[slot].take().is_some() {
            self.num_tasks -= 1;
        }
    }

    /// Iterate every live task.
    pub fn task_iter(&self) -> impl Iterator<Item = NonNull<Tcb>> + '_ {
        self.tasks.iter().flatten().copied()
    }
}

/// Global kernel state instance
pub(crate) static STATE: CsCell<KernelState> = CsCell::new(KernelState::new());

// ============ Current task ============

/// The running task's TCB. The context-switch handler addresses this
/// symbol by name and dereferences `sp` at offset 8.
#[no_mangle]
#[allow(non_upper_case_globals)]
pub static mut cur_tcb: *mut Tcb = ptr::null_mut();

/// The currently running task
#[inline]
pub fn current() -> Option<NonNull<Tcb>> {
    NonNull::new(unsafe { cur_tcb })
}

/// Replace the current-task pointer.
///
/// # Safety
/// Only the scheduler, the start-up path, and host-side tests may call
/// this; `tcb` must point at a live TCB or be `None`.
#[inline]
pub unsafe fn set_current(tcb: Option<NonNull<Tcb>>) {
    unsafe { cur_tcb = tcb.map_or(ptr::null_mut(), NonNull::as_ptr) };
}

/// Get the kernel state without presenting a guard.
///
/// # Safety
/// Caller must be inside an IRQ-disabled region.
#[inline(always)]
pub(crate) unsafe fn state() -> &'static mut KernelState {
    unsafe { STATE.get_unchecked() }
}

// ============ Initialization ============

/// The idle task: created by `os_init` at `PRI_MIN` so the ready list is
/// never empty.
fn idle_task(_: *mut ()) {
    loop {
        port::wfi();
    }
}

/// Initialize the kernel.
///
/// Resets all global state, recycles the page pool, and creates the idle
/// task. Must be called before any other kernel function; calling it
/// again reinitializes from scratch.
pub fn os_init() -> KernelResult<()> {
    {
        let guard = IrqGuard::new();
        KERNEL.reset();
        STATE.get(&guard).reset();
        page::pool_reset(&guard);
        crate::exec::reset(&guard);
        unsafe { set_current(None) };
    }

    crate::task::create(idle_task, ptr::null_mut(), PRI_MIN, "idle")?;

    KERNEL.set_initialized(true);
    Ok(())
}

/// Start multitasking.
///
/// Picks the highest-priority ready task, programs SysTick, and jumps into
/// the first context. Does not return on hardware.
///
/// # Errors
/// * `InvariantViolation` - not initialized, already running, or no task
pub fn os_start() -> KernelResult<()> {
    if !KERNEL.is_initialized() || KERNEL.is_running() {
        return Err(KernelError::InvariantViolation);
    }

    {
        let guard = IrqGuard::new();
        let st = STATE.get(&guard);
        let head = st.ready.front().ok_or(KernelError::InvariantViolation)?;
        unsafe {
            (*head.as_ptr()).status = Status::Running;
            set_current(Some(head));
        }
        KERNEL.set_running(true);
    }

    port::systick_init(CPU_CLOCK_HZ / SYSTICK);
    port::start_first_task();
    Ok(())
}

/// Current tick count, the kernel's monotonic (wrapping) clock.
#[inline]
pub fn os_ticks() -> Tick {
    KERNEL.tick_get()
}
