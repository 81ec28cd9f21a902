//! Cortex-M4 port implementation
//!
//! Context switching runs in the PendSV exception; the first task is
//! launched from the SVC handler. Both handlers address the `cur_tcb`
//! symbol directly and read the saved stack pointer at byte offset 8, so
//! the TCB layout is part of this contract.

#![allow(named_asm_labels)]
#![allow(non_snake_case)]

use core::arch::{asm, naked_asm};

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;

use crate::kernel::cur_tcb;
use crate::sched::next_tcb;
use crate::types::TaskFn;

// ============ Interrupt control ============

#[inline(always)]
pub fn irq_disable() {
    cortex_m::interrupt::disable();
}

#[inline(always)]
pub fn irq_enable() {
    unsafe { cortex_m::interrupt::enable() };
}

#[inline(always)]
pub fn irq_enabled() -> bool {
    cortex_m::register::primask::read().is_active()
}

#[inline(always)]
pub fn nop() {
    cortex_m::asm::nop();
}

#[inline(always)]
pub fn wfi() {
    cortex_m::asm::wfi();
}

pub fn reboot() -> ! {
    cortex_m::peripheral::SCB::sys_reset();
}

// ============ Context switching ============

/// Pend a context switch; it runs once no guard masks it.
#[inline(always)]
pub fn request_context_switch() {
    cortex_m::peripheral::SCB::set_pendsv();
}

/// Program SysTick to fire every `reload` core cycles.
pub fn systick_init(reload: u32) {
    let mut p = unsafe { cortex_m::Peripherals::steal() };

    p.SYST.set_reload(reload - 1);
    p.SYST.clear_current();
    p.SYST.set_clock_source(SystClkSource::Core);
    p.SYST.enable_interrupt();
    p.SYST.enable_counter();
}

/// Launch the task `cur_tcb` points at. Never returns on hardware.
pub fn start_first_task() {
    unsafe {
        let mut scb = cortex_m::Peripherals::steal().SCB;

        // Context switches must be the lowest-priority exceptions.
        scb.set_priority(SystemHandler::PendSV, 0xF0);
        scb.set_priority(SystemHandler::SysTick, 0xF0);

        asm!("svc 0", options(nomem, nostack));
    }
}

// ============ Initial stack frame ============

/// Synthetic exception-return frame planted at the top of a fresh page.
///
/// Top-first the hardware-popped half reads xPSR, PC, LR, R12, R3-R0;
/// below it sit the callee-saved R11-R4 (and EXC_RETURN in the FPU
/// build). `sp` points at the lowest written word.
#[repr(C, align(4))]
struct ContextFrame {
    r4: u32,
    r5: u32,
    r6: u32,
    r7: u32,
    r8: u32,
    r9: u32,
    r10: u32,
    r11: u32,
    #[cfg(feature = "hard-fpu")]
    exc_return: u32,
    r0: u32,
    r1: u32,
    r2: u32,
    r3: u32,
    r12: u32,
    lr: u32,
    pc: u32,
    xpsr: u32,
}

/// Format the initial frame for a task and return its stack pointer.
///
/// # Safety
/// `top` is one past a writable, 8-aligned region large enough for the
/// frame.
pub unsafe fn init_stack_frame(top: *mut u32, entry: TaskFn, arg: *mut ()) -> *mut u32 {
    let aligned = ((top as usize) & !7) as *mut u32;
    let words = core::mem::size_of::<ContextFrame>() / 4;
    let frame = unsafe { aligned.sub(words) } as *mut ContextFrame;

    unsafe {
        *frame = ContextFrame {
            r4: 0,
            r5: 0,
            r6: 0,
            r7: 0,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
            // Bit 4 set: the fresh task has no FPU context to restore.
            #[cfg(feature = "hard-fpu")]
            exc_return: 0xFFFF_FFFD,
            r0: arg as u32,
            r1: 0,
            r2: 0,
            r3: 0,
            r12: 0,
            lr: crate::task::task_exit as usize as u32,
            pc: entry as usize as u32,
            xpsr: 0x0100_0000, // Thumb bit
        };
    }

    frame as *mut u32
}

// ============ Exception handlers ============

/// SVC handler: bootstrap the first task from `cur_tcb.sp`.
#[cfg(not(feature = "hard-fpu"))]
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn SVCall() {
    naked_asm!(
        "cpsid   i",
        "ldr     r3, ={cur}",
        "ldr     r1, [r3]",
        "ldr     r0, [r1, #8]",   // r0 = cur_tcb.sp
        "ldmia   r0!, {{r4-r11}}",
        "msr     psp, r0",
        "mov     r0, #0",
        "orr     lr, #0xD",       // thread mode, PSP
        "cpsie   i",
        "bx      lr",
        cur = sym cur_tcb,
    );
}

/// SVC handler, FPU build: EXC_RETURN rides on the stack and decides
/// whether S16-S31 need restoring.
#[cfg(feature = "hard-fpu")]
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn SVCall() {
    naked_asm!(
        "cpsid   i",
        "ldr     r3, ={cur}",
        "ldr     r1, [r3]",
        "ldr     r0, [r1, #8]",       // r0 = cur_tcb.sp
        "ldmia   r0!, {{r4-r11, lr}}",
        "tst     lr, #0x10",          // bit 4 clear = FPU context present
        "it      eq",
        "vldmiaeq r0!, {{s16-s31}}",
        "msr     psp, r0",
        "mov     r0, #0",
        "cpsie   i",
        "bx      lr",
        cur = sym cur_tcb,
    );
}

/// PendSV handler: save the outgoing context, let `next_tcb` choose, and
/// restore the incoming one.
#[cfg(not(feature = "hard-fpu"))]
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "cpsid   i",
        "mrs     r0, psp",
        "ldr     r3, ={cur}",
        "ldr     r2, [r3]",
        "stmdb   r0!, {{r4-r11}}",
        "str     r0, [r2, #8]",   // cur_tcb.sp = r0
        "stmdb   sp!, {{r3, lr}}",
        "bl      {next}",
        "ldmia   sp!, {{r3, lr}}",
        "ldr     r1, [r3]",
        "ldr     r0, [r1, #8]",   // new cur_tcb.sp
        "ldmia   r0!, {{r4-r11}}",
        "msr     psp, r0",
        "cpsie   i",
        "bx      lr",
        cur = sym cur_tcb,
        next = sym next_tcb,
    );
}

/// PendSV handler, FPU build: lazily save/restore S16-S31 guided by
/// EXC_RETURN bit 4.
#[cfg(feature = "hard-fpu")]
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "cpsid   i",
        "mrs     r0, psp",
        "tst     lr, #0x10",
        "it      eq",
        "vstmdbeq r0!, {{s16-s31}}",  // outgoing task used the FPU
        "ldr     r3, ={cur}",
        "ldr     r2, [r3]",
        "stmdb   r0!, {{r4-r11, lr}}",
        "str     r0, [r2, #8]",       // cur_tcb.sp = r0
        "stmdb   sp!, {{r3, lr}}",
        "bl      {next}",
        "ldmia   sp!, {{r3, lr}}",
        "ldr     r1, [r3]",
        "ldr     r0, [r1, #8]",       // new cur_tcb.sp
        "ldmia   r0!, {{r4-r11, lr}}",
        "tst     lr, #0x10",
        "it      eq",
        "vldmiaeq r0!, {{s16-s31}}",
        "msr     psp, r0",
        "cpsie   i",
        "bx      lr",
        cur = sym cur_tcb,
        next = sym next_tcb,
    );
}
