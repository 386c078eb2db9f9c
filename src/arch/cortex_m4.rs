//! # Cortex-M4 Port
//!
//! SysTick drives the tick pipeline; PendSV performs deferred context
//! switches. Both run at the lowest exception priority so a switch never
//! preempts an application interrupt handler and the two never preempt
//! each other.
//!
//! ## Context Switch
//!
//! Tasks run in Thread mode on the process stack (PSP); the kernel and all
//! handlers use the main stack (MSP). Exception entry hardware-stacks
//! R0–R3, R12, LR, PC and xPSR onto the PSP; PendSV saves and restores
//! R4–R11 around that frame and swaps the PSP between tasks.

use core::arch::{asm, naked_asm};

use cortex_m::peripheral::syst::SystClkSource;

use crate::config::{SYSTEM_CLOCK_HZ, TICK_HZ};
use crate::fault;
use crate::kernel;
use crate::sync;

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Program SysTick to fire at `TICK_HZ` from the core clock.
pub fn configure_systick(syst: &mut cortex_m::peripheral::SYST) {
    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

// ---------------------------------------------------------------------------
// Exception priorities
// ---------------------------------------------------------------------------

/// Drop PendSV and SysTick to the lowest priority (0xFF in SHPR3) so the
/// context-switch machinery runs only when no other handler is active.
pub fn set_exception_priorities() {
    // SHPR3: bits [23:16] PendSV, [31:24] SysTick.
    const SHPR3: *mut u32 = 0xE000_ED20 as *mut u32;
    unsafe {
        let value = core::ptr::read_volatile(SHPR3) | (0xFF << 16) | (0xFF << 24);
        core::ptr::write_volatile(SHPR3, value);
    }
}

// ---------------------------------------------------------------------------
// PendSV trigger
// ---------------------------------------------------------------------------

/// Pend a context switch by setting PENDSVSET in the ICSR.
#[inline]
pub fn trigger_pendsv() {
    const ICSR: *mut u32 = 0xE000_ED04 as *mut u32;
    unsafe {
        core::ptr::write_volatile(ICSR, 1 << 28);
    }
}

// ---------------------------------------------------------------------------
// First task launch
// ---------------------------------------------------------------------------

/// Switch Thread mode onto the PSP and drop into the first task by popping
/// its pre-built frame by hand. Called once from `kernel::start()`.
///
/// # Safety
/// `psp` must point at the software-frame base of a task stack prepared by
/// the scheduler; must only be called once.
pub unsafe fn start_first_task(psp: *const u32) -> ! {
    asm!(
        // Skip the software frame (R4-R11, 8 words) — the first launch has
        // no prior context to restore.
        "adds r0, #32",
        "msr psp, r0",

        // Thread mode uses PSP from here on (CONTROL.SPSEL = 1).
        "movs r0, #2",
        "msr control, r0",
        "isb",

        // Pop the hardware frame manually; this is not an exception return.
        "pop {{r0-r3, r12}}",
        "pop {{r4}}", // LR slot (return trap; the entry never returns)
        "pop {{r5}}", // PC — task entry
        "pop {{r6}}", // xPSR slot

        "cpsie i",
        "bx r5",

        in("r0") psp,
        options(noreturn)
    );
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

/// Deferred context switch.
///
/// Saves R4–R11 of the outgoing task below its hardware frame, lets the
/// scheduler pick the next owner of the core, and restores the incoming
/// task's registers. Exception return (0xFFFFFFFD: Thread mode, PSP)
/// unstacks the rest.
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11}}",
        "bl {switch}",
        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",
        "ldr lr, =0xFFFFFFFD",
        "bx lr",
        switch = sym switch_context,
    );
}

/// Park the outgoing task's stack pointer, run selection, hand back the
/// incoming task's. Called from the PendSV assembly with the outgoing PSP
/// (software frame included) in `r0`.
///
/// # Safety
/// PendSV-only; relies on the exception priority scheme for serialization.
#[no_mangle]
unsafe extern "C" fn switch_context(psp: *mut u32) -> *mut u32 {
    let sched = &mut *kernel::SCHEDULER_PTR;
    let outgoing = sched.current_task;
    sched.tasks[outgoing].stack_pointer = psp;
    let incoming = sched.schedule();
    sched.tasks[incoming].stack_pointer
}

// ---------------------------------------------------------------------------
// SysTick handler (tick pipeline)
// ---------------------------------------------------------------------------

/// The tick pipeline, in the order the scheduler contract requires:
/// timer countdowns (callbacks invoked outside the scheduler borrow so
/// they may re-enter the kernel), then the deadline/slice/canary sweep,
/// then — on a detected fault — the terminal halt, otherwise a pended
/// context switch if anything above asked for one.
#[no_mangle]
pub unsafe extern "C" fn SysTick() {
    let expired =
        sync::critical_section(|_| unsafe { (*kernel::SCHEDULER_PTR).advance_timers() });
    for (id, callback) in expired.iter() {
        callback(id);
    }

    let faulted = sync::critical_section(|_| unsafe { (*kernel::SCHEDULER_PTR).tick() });
    if let Some(task) = faulted {
        let hook = unsafe { (*kernel::SCHEDULER_PTR).fault_hook };
        fault::halt(hook, task);
    }

    if sync::critical_section(|_| unsafe { (*kernel::SCHEDULER_PTR).needs_reschedule }) {
        trigger_pendsv();
    }
}
