//! # Kernel
//!
//! The global kernel instance and the public API surface. All functions
//! here wrap the scheduler in critical sections; the exception handlers in
//! the port layer reach the same instance through `SCHEDULER_PTR`.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► kernel::init()                ← idle task into slot 0
//!         ├─► kernel::create_task() ×N      ← background first, suspended
//!         ├─► kernel::event_flags_create()
//!         ├─► kernel::timer_create()        ← armed immediately
//!         ├─► kernel::stack_fault_notify()
//!         └─► kernel::start()               ← SysTick on, first task, no return
//! ```
//!
//! A blocking `event_flags_get` evaluates its condition and arms the wait
//! inside one critical section, then pends the context switch. A signal
//! landing between the two simply finds the task Ready again with its
//! outcome already posted — there is no window in which a wake-up can be
//! missed.

use crate::config::LOWEST_PRIORITY;
use crate::error::KernelError;
use crate::fault::FaultHook;
use crate::flags::{FlagGroupId, FlagWait, MatchMode, WaitOutcome};
use crate::scheduler::Scheduler;
use crate::sync;
use crate::task::{TaskConfig, TaskEntry, TaskId};
use crate::time::Timeout;
use crate::timer::{TimerCallback, TimerId, TimerMode};

// ---------------------------------------------------------------------------
// Global kernel instance
// ---------------------------------------------------------------------------

/// The kernel's scheduler. Const-initialized; populated by `init()`.
///
/// # Safety
/// Accessed via `SCHEDULER_PTR`, which is set during `init()`. All access
/// goes through critical sections or the (serialized) exception handlers.
static mut SCHEDULER: Scheduler = Scheduler::new();

/// Raw pointer to the scheduler for the port layer's exception handlers,
/// which cannot hold references across the asm boundary.
///
/// # Safety
/// Set once during `init()`; read from ISR context afterwards.
pub static mut SCHEDULER_PTR: *mut Scheduler = core::ptr::null_mut();

/// Idle body for slot 0: absorb spare cycles until something is ready.
extern "C" fn idle_entry() -> ! {
    loop {
        #[cfg(all(target_arch = "arm", target_os = "none"))]
        cortex_m::asm::wfi();
        #[cfg(not(all(target_arch = "arm", target_os = "none")))]
        core::hint::spin_loop();
    }
}

/// Pend a context switch if one is due and the scheduler is live. Before
/// `start()` the selection happens once, at launch, so nothing is pended.
fn maybe_preempt() {
    let pend = sync::critical_section(|_| unsafe {
        let sched = &mut *SCHEDULER_PTR;
        sched.started && sched.needs_reschedule
    });
    if pend {
        #[cfg(all(target_arch = "arm", target_os = "none"))]
        crate::arch::cortex_m4::trigger_pendsv();
    }
}

// ---------------------------------------------------------------------------
// Kernel API
// ---------------------------------------------------------------------------

/// Initialize the kernel and create the idle task.
///
/// Must be called exactly once, from the main thread, before any other
/// kernel function. Failure is unrecoverable — a system that cannot even
/// hold its idle task cannot run.
pub fn init() -> Result<(), KernelError> {
    unsafe {
        SCHEDULER = Scheduler::new();
        SCHEDULER_PTR = core::ptr::addr_of_mut!(SCHEDULER);
    }
    let idle = sync::critical_section(|_| unsafe { (*SCHEDULER_PTR).create_idle(idle_entry) })?;
    log::debug!("kernel initialized, idle task in slot {}", idle);
    Ok(())
}

/// Create a task. Tasks are created during initialization and live for the
/// life of the system.
///
/// Fails with `ResourceExhausted` when the task table or the stack pool is
/// full, `InvalidState` for a priority outside `0..=LOWEST_PRIORITY` or a
/// preemption threshold numerically above the priority.
pub fn create_task(entry: TaskEntry, config: TaskConfig) -> Result<TaskId, KernelError> {
    if config.priority > LOWEST_PRIORITY {
        return Err(KernelError::InvalidState);
    }
    let id = sync::critical_section(|_| unsafe {
        (*SCHEDULER_PTR).create_task(entry, &config)
    })?;
    log::debug!(
        "task {} created (priority {}, threshold {})",
        id,
        config.priority,
        config.preemption_threshold
    );
    maybe_preempt();
    Ok(id)
}

/// Resume a suspended task. No-op on a Ready/Running task; `InvalidState`
/// on a Faulted, Blocked or unpopulated one.
pub fn resume(id: TaskId) -> Result<(), KernelError> {
    sync::critical_section(|_| unsafe { (*SCHEDULER_PTR).resume(id) })?;
    maybe_preempt();
    Ok(())
}

/// Suspend a Ready or Running task. Suspending the calling task yields the
/// core before this returns.
pub fn suspend(id: TaskId) -> Result<(), KernelError> {
    sync::critical_section(|_| unsafe { (*SCHEDULER_PTR).suspend(id) })?;
    maybe_preempt();
    Ok(())
}

/// Create an event flag group, bits all-clear.
pub fn event_flags_create() -> Result<FlagGroupId, KernelError> {
    let id = sync::critical_section(|_| unsafe { (*SCHEDULER_PTR).flags_create() })?;
    log::debug!("event flag group {} created", id);
    Ok(id)
}

/// OR `mask` into a group and wake satisfied waiters. Callable from
/// interrupt or task context; never blocks.
pub fn event_flags_set(group: FlagGroupId, mask: u32) -> Result<(), KernelError> {
    sync::critical_section(|_| unsafe { (*SCHEDULER_PTR).flags_set(group, mask) })?;
    maybe_preempt();
    Ok(())
}

/// Wait until `mask` is satisfied under `mode`, at most `timeout` long.
///
/// Returns the group's bits as they were at match time, before any
/// consuming clear. With `consume`, exactly the matched bits inside `mask`
/// are cleared as part of the wait being satisfied. `Timeout::NoWait`
/// returns `WouldBlock` instead of suspending; a bounded wait that elapses
/// returns `TimedOut`. Task context only.
pub fn event_flags_get(
    group: FlagGroupId,
    mask: u32,
    mode: MatchMode,
    consume: bool,
    timeout: Timeout,
) -> Result<u32, KernelError> {
    let immediate = sync::critical_section(|_| unsafe {
        let sched = &mut *SCHEDULER_PTR;
        if let Some(bits) = sched.flags_try_get(group, mask, mode, consume)? {
            return Ok(Some(bits));
        }
        if timeout == Timeout::NoWait {
            return Err(KernelError::WouldBlock);
        }
        let deadline = timeout.deadline(sched.tick_count);
        sched.block_current_on_flags(FlagWait {
            group,
            mask,
            mode,
            consume,
            deadline,
        });
        Ok(None)
    })?;
    if let Some(bits) = immediate {
        return Ok(bits);
    }

    // The wait is armed; hand the core over. Control returns here once a
    // matching set (or the deadline sweep) has made this task Ready again.
    maybe_preempt();

    sync::critical_section(|_| unsafe {
        let sched = &mut *SCHEDULER_PTR;
        match sched.take_pending(sched.current_task) {
            Some(WaitOutcome::Matched(bits)) => Ok(bits),
            Some(WaitOutcome::TimedOut) => Err(KernelError::TimedOut),
            None => Err(KernelError::WouldBlock),
        }
    })
}

/// Arm a software timer. `Periodic` timers rearm themselves after every
/// expiry; `OneShot` timers disarm. The callback runs in interrupt context
/// and must restrict itself to non-blocking operations.
pub fn timer_create(
    period: u32,
    mode: TimerMode,
    callback: TimerCallback,
) -> Result<TimerId, KernelError> {
    let id = sync::critical_section(|_| unsafe {
        (*SCHEDULER_PTR).timer_create(period, mode, callback)
    })?;
    log::debug!("timer {} armed (period {} ticks)", id, period);
    Ok(id)
}

/// Halt a timer's countdown without releasing its slot.
pub fn timer_stop(id: TimerId) -> Result<(), KernelError> {
    sync::critical_section(|_| unsafe { (*SCHEDULER_PTR).timer_stop(id) })
}

/// Rearm a timer from a full period.
pub fn timer_restart(id: TimerId) -> Result<(), KernelError> {
    sync::critical_section(|_| unsafe { (*SCHEDULER_PTR).timer_restart(id) })
}

/// Register the hook invoked (once, with interrupts disabled) when a
/// task's stack is found corrupted. The system halts afterwards either
/// way.
pub fn stack_fault_notify(hook: FaultHook) {
    sync::critical_section(|_| unsafe {
        (*SCHEDULER_PTR).fault_hook = Some(hook);
    });
}

/// Monotonic tick count since `start()`.
pub fn ticks() -> u64 {
    sync::critical_section(|_| unsafe { (*SCHEDULER_PTR).tick_count })
}

/// Start the scheduler. **Does not return.**
///
/// Configures the SysTick tick, lowers PendSV/SysTick to the bottom of the
/// priority space, selects the first task and launches it. From that point
/// the system is fully preemptive.
///
/// # Safety (contract)
/// `init()` must have been called and at least one application task
/// created; must be called from the main thread, not an ISR.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn start(mut core_peripherals: cortex_m::Peripherals) -> ! {
    use crate::arch::cortex_m4;

    cortex_m4::configure_systick(&mut core_peripherals.SYST);
    cortex_m4::set_exception_priorities();

    let first_sp = sync::critical_section(|_| unsafe {
        let sched = &mut *SCHEDULER_PTR;
        sched.started = true;
        let first = sched.schedule();
        sched.tasks[first].stack_pointer as *const u32
    });

    unsafe { cortex_m4::start_first_task(first_sp) }
}
