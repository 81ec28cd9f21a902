//! Port layer - CPU-specific implementations
//!
//! The core consumes a narrow contract: interrupt masking, a way to
//! request a context switch, the first-task bootstrap, and the initial
//! stack frame layout. On ARM that is the Cortex-M4 port; everywhere
//! else a stub keeps the core testable on the host.

#[cfg(target_arch = "arm")]
pub mod cortex_m4;

#[cfg(target_arch = "arm")]
pub use cortex_m4::*;

// Stub implementations for non-ARM targets (host-side tests)
#[cfg(not(target_arch = "arm"))]
pub mod stub {
    use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use crate::types::TaskFn;

    /// Simulated PRIMASK: `true` = interrupts enabled.
    static IRQ_ON: AtomicBool = AtomicBool::new(true);

    /// Context switches requested so far; the stub never performs them.
    static SWITCH_REQUESTS: AtomicUsize = AtomicUsize::new(0);

    #[inline]
    pub fn irq_disable() {
        IRQ_ON.store(false, Ordering::SeqCst);
    }

    #[inline]
    pub fn irq_enable() {
        IRQ_ON.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn irq_enabled() -> bool {
        IRQ_ON.load(Ordering::SeqCst)
    }

    /// Record the request; tests observe it through `switch_requests`.
    pub fn request_context_switch() {
        SWITCH_REQUESTS.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of context switches requested so far.
    pub fn switch_requests() -> usize {
        SWITCH_REQUESTS.load(Ordering::SeqCst)
    }

    /// The host cannot jump into a synthetic frame; starting is a no-op
    /// so `os_start` returns and tests can drive the kernel by hand.
    pub fn start_first_task() {}

    /// Leave a frame-sized gap below the aligned top, as the real port
    /// does; fn pointers do not fit in u32 slots off-target, so nothing
    /// is written.
    pub unsafe fn init_stack_frame(top: *mut u32, _entry: TaskFn, _arg: *mut ()) -> *mut u32 {
        let aligned = ((top as usize) & !7) as *mut u32;
        unsafe { aligned.sub(16) }
    }

    pub fn systick_init(_reload: u32) {}

    #[inline]
    pub fn nop() {}

    #[inline]
    pub fn wfi() {}

    pub fn reboot() -> ! {
        panic!("reboot requested");
    }
}

#[cfg(not(target_arch = "arm"))]
pub use stub::*;
