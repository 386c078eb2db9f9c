//! # Fault Path
//!
//! Stack corruption is a fatal, non-recoverable condition: the affected
//! task is already in the terminal `Faulted` state when this module runs,
//! and nothing here attempts recovery. The single observable signal is one
//! invocation of the registered fault hook; after that the core parks
//! forever with interrupts disabled.

use crate::task::TaskId;

/// Fault notification hook, registered via
/// [`kernel::stack_fault_notify`](crate::kernel::stack_fault_notify).
///
/// Invoked at most once per fault, with interrupts disabled; it must not
/// block. The system halts when it returns, so a hook that does return
/// never resumes anything.
pub type FaultHook = fn(TaskId);

/// Terminal halt after stack corruption in `task`. Never returns.
pub fn halt(hook: Option<FaultHook>, task: TaskId) -> ! {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    cortex_m::interrupt::disable();

    log::error!("stack corruption in task {}; halting", task);
    if let Some(notify) = hook {
        notify(task);
    }

    loop {
        #[cfg(all(target_arch = "arm", target_os = "none"))]
        cortex_m::asm::wfi();
        #[cfg(not(all(target_arch = "arm", target_os = "none")))]
        core::hint::spin_loop();
    }
}
