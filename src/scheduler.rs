//! # Scheduler
//!
//! Core scheduling state and logic: the fixed task table, priority-based
//! selection with preemption thresholds, the tick pipeline, and the
//! wake/block plumbing for event flag waits.
//!
//! ## Selection Rule
//!
//! The task with the numerically lowest priority among all Ready/Running
//! tasks runs; ties go to the earliest-created task. A Running task is
//! replaced only when the best candidate's priority is numerically
//! *strictly less* than the running task's preemption threshold — with
//! threshold equal to priority this is plain priority preemption, and a
//! lower threshold raises the task's immunity while still letting
//! sufficiently urgent work through. Equal priorities never preempt.
//!
//! ## Tick Pipeline
//!
//! On every SysTick interrupt the port layer runs, in order:
//! 1. `advance_timers()` — countdowns decrement; expired callbacks are
//!    collected and invoked after the scheduler borrow ends
//! 2. `tick()` — bounded waits past their deadline wake with `TimedOut`,
//!    the running task's time slice is accounted, and its stack canary is
//!    checked (a corrupt canary transitions the task to `Faulted` and the
//!    system halts)
//! 3. if `needs_reschedule` was flagged anywhere above, PendSV is pended
//!    and performs the deferred context switch
//!
//! All methods here expect to run inside the kernel's critical section;
//! evaluating a wait condition and suspending on it under that one section
//! is what closes the missed-wakeup window.

use crate::config::{
    IDLE_PRIORITY, IDLE_STACK_SIZE, MAX_FLAG_GROUPS, MAX_TASKS, NO_TIME_SLICE,
};
use crate::error::KernelError;
use crate::fault::FaultHook;
use crate::flags::{EventFlagGroup, FlagGroupId, FlagWait, MatchMode, WaitOutcome};
use crate::stack::StackPool;
use crate::task::{TaskConfig, TaskControlBlock, TaskEntry, TaskId, TaskState};
use crate::timer::{Expired, TimerCallback, TimerId, TimerMode, TimerTable};

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// The central scheduler state. Holds the task table, the stack pool, all
/// event flag groups and software timers. Stored as a global `static mut`
/// in `kernel.rs`; everything is const-initialized, nothing is heap
/// allocated.
///
/// Slot 0 of the task table is the kernel's internal idle task, created by
/// `kernel::init()`, so selection always finds a candidate.
pub struct Scheduler {
    /// Fixed task table. Slot 0 is the idle task.
    pub tasks: [TaskControlBlock; MAX_TASKS],

    /// Number of populated slots (including idle).
    pub task_count: usize,

    /// Index of the task owning the core.
    pub current_task: TaskId,

    /// Fixed table of event flag groups.
    pub flag_groups: [EventFlagGroup; MAX_FLAG_GROUPS],

    /// Software timers, driven by `advance_timers`.
    pub timers: TimerTable,

    /// Byte pool all task stacks are claimed from.
    pub stacks: StackPool,

    /// Monotonic tick counter; the time base for wait deadlines.
    pub tick_count: u64,

    /// Set whenever a state change may require a context switch; consumed
    /// by `schedule()`.
    pub needs_reschedule: bool,

    /// Invoked at most once, on stack corruption, before the halt.
    pub fault_hook: Option<FaultHook>,

    /// True once `kernel::start()` has handed control to the scheduler;
    /// gates PendSV triggering.
    pub started: bool,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            tasks: [TaskControlBlock::EMPTY; MAX_TASKS],
            task_count: 0,
            current_task: 0,
            flag_groups: [EventFlagGroup::EMPTY; MAX_FLAG_GROUPS],
            timers: TimerTable::new(),
            stacks: StackPool::new(),
            tick_count: 0,
            needs_reschedule: false,
            fault_hook: None,
            started: false,
        }
    }

    // -----------------------------------------------------------------------
    // Task lifecycle
    // -----------------------------------------------------------------------

    /// Populate the next free slot with a new task.
    ///
    /// Claims and paints a stack region, builds the initial exception frame
    /// so the first context switch "returns" into the entry function, and
    /// leaves the task Ready or Suspended per `auto_start`.
    pub fn create_task(
        &mut self,
        entry: TaskEntry,
        config: &TaskConfig,
    ) -> Result<TaskId, KernelError> {
        if self.task_count >= MAX_TASKS {
            return Err(KernelError::ResourceExhausted);
        }
        if config.preemption_threshold > config.priority {
            return Err(KernelError::InvalidState);
        }
        let stack = self.stacks.allocate(config.stack_size)?;

        let id = self.task_count;
        self.tasks[id].init(id, config, stack);
        let frame_offset = init_task_stack(self.stacks.region_mut(stack), entry);
        self.tasks[id].stack_pointer =
            unsafe { self.stacks.base_ptr(stack).add(frame_offset) } as *mut u32;
        self.task_count += 1;

        if self.tasks[id].state == TaskState::Ready {
            self.note_ready(id);
        }
        Ok(id)
    }

    /// Create the internal idle task in slot 0. Called once by
    /// `kernel::init()` before any application task exists.
    pub fn create_idle(&mut self, entry: TaskEntry) -> Result<TaskId, KernelError> {
        debug_assert_eq!(self.task_count, 0);
        self.create_task(
            entry,
            &TaskConfig {
                priority: IDLE_PRIORITY,
                preemption_threshold: IDLE_PRIORITY,
                stack_size: IDLE_STACK_SIZE,
                time_slice: NO_TIME_SLICE,
                auto_start: true,
            },
        )
    }

    /// Suspended→Ready. May preempt the running task.
    pub fn resume(&mut self, id: TaskId) -> Result<(), KernelError> {
        let task = self.task_mut(id)?;
        let was_suspended = task.state == TaskState::Suspended;
        task.resume()?;
        if was_suspended {
            self.note_ready(id);
        }
        Ok(())
    }

    /// Ready/Running→Suspended. Suspending the running task gives up the
    /// core immediately.
    pub fn suspend(&mut self, id: TaskId) -> Result<(), KernelError> {
        let task = self.task_mut(id)?;
        let was_running = task.state == TaskState::Running;
        task.suspend()?;
        if was_running {
            self.needs_reschedule = true;
        }
        Ok(())
    }

    fn task_mut(&mut self, id: TaskId) -> Result<&mut TaskControlBlock, KernelError> {
        if id >= self.task_count {
            return Err(KernelError::InvalidState);
        }
        Ok(&mut self.tasks[id])
    }

    /// Flag a newly Ready task for a context switch when it is urgent
    /// enough to take the core: always when nothing is Running, otherwise
    /// only past the running task's preemption threshold.
    fn note_ready(&mut self, id: TaskId) {
        let cur = self.current_task;
        if self.tasks[cur].state != TaskState::Running
            || self.tasks[id].priority < self.tasks[cur].preemption_threshold
        {
            self.needs_reschedule = true;
        }
    }

    // -----------------------------------------------------------------------
    // Selection
    // -----------------------------------------------------------------------

    /// Select the task that should own the core and mark it Running.
    ///
    /// Returns the selected slot; the port layer loads its saved stack
    /// pointer. Selection is total once the idle task exists.
    pub fn schedule(&mut self) -> TaskId {
        self.needs_reschedule = false;
        let mut best: Option<TaskId> = None;
        for id in 0..self.task_count {
            if !self.tasks[id].is_schedulable() {
                continue;
            }
            // Strict less-than keeps the earliest-created task on ties.
            match best {
                None => best = Some(id),
                Some(b) if self.tasks[id].priority < self.tasks[b].priority => {
                    best = Some(id)
                }
                Some(_) => {}
            }
        }
        let Some(mut next) = best else {
            return self.current_task;
        };

        let cur = self.current_task;
        if self.tasks[cur].state == TaskState::Running
            && next != cur
            && self.tasks[next].priority >= self.tasks[cur].preemption_threshold
        {
            // Best candidate is not urgent enough to breach the running
            // task's preemption floor.
            next = cur;
        }

        if next != cur && self.tasks[cur].state == TaskState::Running {
            self.tasks[cur].state = TaskState::Ready;
        }
        if self.tasks[next].state != TaskState::Running {
            self.tasks[next].state = TaskState::Running;
            self.tasks[next].reload_slice();
        }
        self.current_task = next;
        next
    }

    // -----------------------------------------------------------------------
    // Event flag groups
    // -----------------------------------------------------------------------

    /// Open a new flag group, bits all-clear.
    pub fn flags_create(&mut self) -> Result<FlagGroupId, KernelError> {
        let id = self
            .flag_groups
            .iter()
            .position(|group| !group.is_open())
            .ok_or(KernelError::ResourceExhausted)?;
        self.flag_groups[id].open();
        Ok(id)
    }

    /// OR `mask` into a group and wake every blocked waiter whose condition
    /// now holds, in task-creation order. A consuming waiter's clear is
    /// visible to the waiters scanned after it.
    pub fn flags_set(&mut self, group: FlagGroupId, mask: u32) -> Result<(), KernelError> {
        self.check_group(group)?;
        self.flag_groups[group].set(mask);

        for id in 0..self.task_count {
            if self.tasks[id].state != TaskState::Blocked {
                continue;
            }
            let Some(wait) = self.tasks[id].wait else {
                continue;
            };
            if wait.group != group {
                continue;
            }
            let Some(snapshot) =
                self.flag_groups[group].try_match(wait.mask, wait.mode, wait.consume)
            else {
                continue;
            };
            self.tasks[id].wait = None;
            self.tasks[id].pending = Some(WaitOutcome::Matched(snapshot));
            self.tasks[id].state = TaskState::Ready;
            self.note_ready(id);
        }
        Ok(())
    }

    /// Immediate-match attempt for `get`. `Ok(None)` means the condition
    /// does not hold yet and the caller decides whether to block.
    pub fn flags_try_get(
        &mut self,
        group: FlagGroupId,
        mask: u32,
        mode: MatchMode,
        consume: bool,
    ) -> Result<Option<u32>, KernelError> {
        self.check_group(group)?;
        Ok(self.flag_groups[group].try_match(mask, mode, consume))
    }

    /// Transition the current task Running→Blocked with the given wait
    /// specification. Must run in the same critical section as the failed
    /// match attempt — that is the no-missed-wakeup guarantee.
    pub fn block_current_on_flags(&mut self, wait: FlagWait) {
        let cur = self.current_task;
        self.tasks[cur].state = TaskState::Blocked;
        self.tasks[cur].wait = Some(wait);
        self.tasks[cur].pending = None;
        self.needs_reschedule = true;
    }

    /// Collect the outcome a waker posted for `id`.
    pub fn take_pending(&mut self, id: TaskId) -> Option<WaitOutcome> {
        self.tasks[id].pending.take()
    }

    fn check_group(&self, group: FlagGroupId) -> Result<(), KernelError> {
        if group >= MAX_FLAG_GROUPS || !self.flag_groups[group].is_open() {
            return Err(KernelError::InvalidState);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    pub fn timer_create(
        &mut self,
        period: u32,
        mode: TimerMode,
        callback: TimerCallback,
    ) -> Result<TimerId, KernelError> {
        self.timers.create(period, mode, callback)
    }

    pub fn timer_stop(&mut self, id: TimerId) -> Result<(), KernelError> {
        self.timers.stop(id)
    }

    pub fn timer_restart(&mut self, id: TimerId) -> Result<(), KernelError> {
        self.timers.restart(id)
    }

    /// One countdown pass over the timer table. The port layer invokes the
    /// returned callbacks after this borrow ends, so they may re-enter the
    /// kernel (typically via `event_flags_set`).
    pub fn advance_timers(&mut self) -> Expired {
        self.timers.advance()
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Per-tick bookkeeping: deadline sweep, slice accounting, canary
    /// check. Returns the faulted task's id when stack corruption was
    /// detected — the caller must take the halt path and never schedule
    /// again.
    pub fn tick(&mut self) -> Option<TaskId> {
        self.tick_count += 1;

        // Wake bounded waits whose deadline has passed.
        for id in 0..self.task_count {
            if self.tasks[id].state != TaskState::Blocked {
                continue;
            }
            let Some(wait) = self.tasks[id].wait else {
                continue;
            };
            let Some(deadline) = wait.deadline else {
                continue;
            };
            if self.tick_count >= deadline {
                self.tasks[id].wait = None;
                self.tasks[id].pending = Some(WaitOutcome::TimedOut);
                self.tasks[id].state = TaskState::Ready;
                self.note_ready(id);
            }
        }

        let cur = self.current_task;

        // Slice expiry re-offers the core; selection order decides who
        // takes it.
        if self.tasks[cur].state == TaskState::Running && self.tasks[cur].slice_tick() {
            self.tasks[cur].state = TaskState::Ready;
            self.needs_reschedule = true;
        }

        // Stack corruption is terminal.
        if !self.stacks.canary_intact(self.tasks[cur].stack) {
            self.tasks[cur].state = TaskState::Faulted;
            return Some(cur);
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Initial stack frame
// ---------------------------------------------------------------------------

/// Build the initial frame a task "returns" into on its first context
/// switch, and return the initial stack-pointer offset from the region
/// base.
///
/// The Cortex-M4 hardware pushes an exception frame on interrupt entry;
/// PendSV additionally saves R4–R11 below it. Pre-populating both lets the
/// first exception return drop straight into the entry function.
///
/// ```text
/// region top (8-aligned) ─┐
///   xPSR  (Thumb bit set) │ hardware frame, popped by exception return
///   PC    (task entry)    │
///   LR    (return trap)   │
///   R12, R3, R2, R1, R0   │
///   R11 … R4              │ software frame, popped by PendSV
/// returned offset ────────┘
/// ```
fn init_task_stack(stack: &mut [u8], entry: TaskEntry) -> usize {
    let top = stack.len() & !7;
    let frame = top - 16 * 4;

    let mut word = |index: usize, value: u32| {
        let at = frame + index * 4;
        stack[at..at + 4].copy_from_slice(&value.to_ne_bytes());
    };

    // R4-R11, then R0-R3 and R12, all zero.
    for index in 0..13 {
        word(index, 0);
    }
    word(13, task_return_trap as usize as u32); // LR
    word(14, entry as usize as u32); // PC
    word(15, 0x0100_0000); // xPSR, Thumb bit

    frame
}

/// Landing pad for a task body that returns. That is a fatal programming
/// error; park the core.
extern "C" fn task_return_trap() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LOWEST_PRIORITY, MIN_STACK_SIZE, STACK_POOL_SIZE};
    use crate::time::Timeout;
    use std::vec;
    use std::vec::Vec;

    extern "C" fn spin() -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    fn task(priority: u8, threshold: u8, auto_start: bool) -> TaskConfig {
        TaskConfig {
            priority,
            preemption_threshold: threshold,
            stack_size: MIN_STACK_SIZE,
            time_slice: NO_TIME_SLICE,
            auto_start,
        }
    }

    /// Scheduler with the idle task in slot 0, as `kernel::init` leaves it.
    fn booted() -> Scheduler {
        let mut sched = Scheduler::new();
        sched.create_idle(spin).unwrap();
        sched
    }

    fn wait_on(group: FlagGroupId, mask: u32, mode: MatchMode, deadline: Option<u64>) -> FlagWait {
        FlagWait {
            group,
            mask,
            mode,
            consume: true,
            deadline,
        }
    }

    // --- creation -------------------------------------------------------

    #[test]
    fn test_create_populates_slots_in_order() {
        let mut sched = booted();
        let a = sched.create_task(spin, &task(1, 1, true)).unwrap();
        let b = sched.create_task(spin, &task(2, 2, false)).unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(sched.tasks[a].state, TaskState::Ready);
        assert_eq!(sched.tasks[b].state, TaskState::Suspended);
        assert!(!sched.tasks[a].stack_pointer.is_null());
    }

    #[test]
    fn test_create_table_exhaustion() {
        let mut sched = booted();
        for _ in 1..MAX_TASKS {
            sched.create_task(spin, &task(5, 5, true)).unwrap();
        }
        assert_eq!(
            sched.create_task(spin, &task(5, 5, true)),
            Err(KernelError::ResourceExhausted)
        );
    }

    #[test]
    fn test_create_rejects_threshold_above_priority() {
        let mut sched = booted();
        // Numerically greater threshold would *lower* the floor.
        assert_eq!(
            sched.create_task(spin, &task(5, 6, true)),
            Err(KernelError::InvalidState)
        );
    }

    #[test]
    fn test_create_stack_exhaustion_fails_fast() {
        let mut sched = booted();
        let mut config = task(5, 5, true);
        config.stack_size = STACK_POOL_SIZE;
        assert_eq!(
            sched.create_task(spin, &config),
            Err(KernelError::ResourceExhausted)
        );
    }

    // --- selection ------------------------------------------------------

    #[test]
    fn test_schedule_picks_most_urgent() {
        let mut sched = booted();
        let low = sched.create_task(spin, &task(20, 20, true)).unwrap();
        let high = sched.create_task(spin, &task(3, 3, true)).unwrap();
        assert_eq!(sched.schedule(), high);
        assert_eq!(sched.tasks[high].state, TaskState::Running);

        // Idle never runs while anything else is ready.
        sched.tasks[high].state = TaskState::Suspended;
        assert_eq!(sched.schedule(), low);
    }

    #[test]
    fn test_equal_priority_tie_goes_to_creation_order() {
        let mut sched = booted();
        let first = sched.create_task(spin, &task(5, 5, true)).unwrap();
        let _second = sched.create_task(spin, &task(5, 5, true)).unwrap();
        assert_eq!(sched.schedule(), first);
    }

    #[test]
    fn test_idle_runs_when_nothing_ready() {
        let mut sched = booted();
        let a = sched.create_task(spin, &task(1, 1, true)).unwrap();
        sched.schedule();
        sched.tasks[a].state = TaskState::Suspended;
        assert_eq!(sched.schedule(), 0);
    }

    // --- preemption threshold -------------------------------------------

    #[test]
    fn test_preemption_threshold_window() {
        let mut sched = booted();
        let running = sched.create_task(spin, &task(20, 15, true)).unwrap();
        assert_eq!(sched.schedule(), running);

        // Priority between threshold and own priority: no preemption.
        let between = sched.create_task(spin, &task(17, 17, true)).unwrap();
        assert!(!sched.needs_reschedule);
        assert_eq!(sched.schedule(), running);
        assert_eq!(sched.tasks[between].state, TaskState::Ready);

        // Exactly at the threshold: still below the bar (strictly-less rule).
        let at = sched.create_task(spin, &task(15, 15, true)).unwrap();
        assert!(!sched.needs_reschedule);
        assert_eq!(sched.schedule(), running);
        assert_eq!(sched.tasks[at].state, TaskState::Ready);

        // More urgent than the threshold: preempts.
        let above = sched.create_task(spin, &task(14, 14, true)).unwrap();
        assert!(sched.needs_reschedule);
        assert_eq!(sched.schedule(), above);
        assert_eq!(sched.tasks[running].state, TaskState::Ready);
    }

    #[test]
    fn test_equal_priority_never_preempts() {
        let mut sched = booted();
        let running = sched.create_task(spin, &task(5, 5, true)).unwrap();
        sched.schedule();
        let _peer = sched.create_task(spin, &task(5, 5, true)).unwrap();
        assert!(!sched.needs_reschedule);
        assert_eq!(sched.schedule(), running);
    }

    // --- suspend / resume -----------------------------------------------

    #[test]
    fn test_suspended_task_waits_for_resume() {
        let mut sched = booted();
        let primary = sched
            .create_task(spin, &task(1, 1, true))
            .unwrap();
        let background = sched
            .create_task(spin, &task(LOWEST_PRIORITY, LOWEST_PRIORITY, false))
            .unwrap();

        // Background never runs before it is resumed, even across ticks.
        assert_eq!(sched.schedule(), primary);
        for _ in 0..10 {
            sched.tick();
            assert_eq!(sched.schedule(), primary);
            assert_eq!(sched.tasks[background].state, TaskState::Suspended);
        }

        // Once resumed it is ready, but still outranked by the primary.
        sched.resume(background).unwrap();
        assert_eq!(sched.schedule(), primary);

        // It gets the core only when the primary leaves it.
        sched.tasks[primary].state = TaskState::Blocked;
        assert_eq!(sched.schedule(), background);
    }

    #[test]
    fn test_suspend_running_yields_core() {
        let mut sched = booted();
        let a = sched.create_task(spin, &task(1, 1, true)).unwrap();
        let b = sched.create_task(spin, &task(2, 2, true)).unwrap();
        assert_eq!(sched.schedule(), a);

        sched.suspend(a).unwrap();
        assert!(sched.needs_reschedule);
        assert_eq!(sched.schedule(), b);
    }

    #[test]
    fn test_lifecycle_errors() {
        let mut sched = booted();
        let a = sched.create_task(spin, &task(1, 1, true)).unwrap();
        assert_eq!(sched.resume(99), Err(KernelError::InvalidState));
        assert_eq!(sched.suspend(99), Err(KernelError::InvalidState));

        sched.tasks[a].state = TaskState::Faulted;
        assert_eq!(sched.resume(a), Err(KernelError::InvalidState));
    }

    // --- flag waits -----------------------------------------------------

    const EVT: u32 = 0b0001;

    /// Drive `waiter` (already Ready) into a blocked wait, then fall back
    /// to whatever runs next.
    fn block_task(sched: &mut Scheduler, waiter: TaskId, wait: FlagWait) {
        assert_eq!(sched.schedule(), waiter);
        sched.block_current_on_flags(wait);
        sched.schedule();
    }

    #[test]
    fn test_set_wakes_blocked_waiter_with_snapshot() {
        let mut sched = booted();
        let waiter = sched.create_task(spin, &task(1, 1, true)).unwrap();
        let group = sched.flags_create().unwrap();
        block_task(&mut sched, waiter, wait_on(group, EVT, MatchMode::AnyBit, None));
        assert_eq!(sched.current_task, 0);

        sched.flags_set(group, EVT | 0b1000).unwrap();
        assert_eq!(sched.tasks[waiter].state, TaskState::Ready);
        assert!(sched.needs_reschedule);
        assert_eq!(sched.schedule(), waiter);
        assert_eq!(
            sched.take_pending(waiter),
            Some(WaitOutcome::Matched(EVT | 0b1000))
        );
        // Consumed exactly the matched bit; the unrelated bit survives.
        assert_eq!(sched.flag_groups[group].bits(), 0b1000);
    }

    #[test]
    fn test_all_bits_wait_spans_separate_sets() {
        let mut sched = booted();
        let waiter = sched.create_task(spin, &task(1, 1, true)).unwrap();
        let group = sched.flags_create().unwrap();
        block_task(
            &mut sched,
            waiter,
            wait_on(group, 0b0011, MatchMode::AllBits, None),
        );

        sched.flags_set(group, 0b0001).unwrap();
        assert_eq!(sched.tasks[waiter].state, TaskState::Blocked);

        sched.flags_set(group, 0b0010).unwrap();
        assert_eq!(sched.tasks[waiter].state, TaskState::Ready);
        assert_eq!(sched.take_pending(waiter), Some(WaitOutcome::Matched(0b0011)));
        assert_eq!(sched.flag_groups[group].bits(), 0);
    }

    #[test]
    fn test_wait_timeout_expires() {
        let mut sched = booted();
        let waiter = sched.create_task(spin, &task(1, 1, true)).unwrap();
        let group = sched.flags_create().unwrap();
        let deadline = Timeout::Ticks(3).deadline(sched.tick_count);
        block_task(&mut sched, waiter, wait_on(group, EVT, MatchMode::AnyBit, deadline));

        sched.tick();
        sched.tick();
        assert_eq!(sched.tasks[waiter].state, TaskState::Blocked);

        sched.tick();
        assert_eq!(sched.tasks[waiter].state, TaskState::Ready);
        assert_eq!(sched.take_pending(waiter), Some(WaitOutcome::TimedOut));
        assert!(sched.tasks[waiter].wait.is_none());
    }

    #[test]
    fn test_forever_wait_never_expires() {
        let mut sched = booted();
        let waiter = sched.create_task(spin, &task(1, 1, true)).unwrap();
        let group = sched.flags_create().unwrap();
        block_task(&mut sched, waiter, wait_on(group, EVT, MatchMode::AnyBit, None));

        for _ in 0..1000 {
            sched.tick();
        }
        assert_eq!(sched.tasks[waiter].state, TaskState::Blocked);
    }

    #[test]
    fn test_no_missed_wakeup_when_set_lands_before_switch() {
        let mut sched = booted();
        let waiter = sched.create_task(spin, &task(1, 1, true)).unwrap();
        let group = sched.flags_create().unwrap();

        // The waiter blocks; before any context switch happens the signal
        // arrives (an interrupt between the critical section and PendSV).
        assert_eq!(sched.schedule(), waiter);
        assert_eq!(sched.flags_try_get(group, EVT, MatchMode::AnyBit, true), Ok(None));
        sched.block_current_on_flags(wait_on(group, EVT, MatchMode::AnyBit, None));
        sched.flags_set(group, EVT).unwrap();

        // The waiter is simply Ready again with its outcome posted.
        assert_eq!(sched.schedule(), waiter);
        assert_eq!(sched.take_pending(waiter), Some(WaitOutcome::Matched(EVT)));
    }

    #[test]
    fn test_overlapping_waiters_wake_in_creation_order() {
        let mut sched = booted();
        let first = sched.create_task(spin, &task(1, 1, true)).unwrap();
        let second = sched.create_task(spin, &task(2, 2, true)).unwrap();
        let group = sched.flags_create().unwrap();

        block_task(&mut sched, first, wait_on(group, EVT, MatchMode::AnyBit, None));
        block_task(&mut sched, second, wait_on(group, EVT, MatchMode::AnyBit, None));

        // One set, one bit, two consuming waiters: the earlier-created one
        // consumes it and the later one keeps waiting.
        sched.flags_set(group, EVT).unwrap();
        assert_eq!(sched.tasks[first].state, TaskState::Ready);
        assert_eq!(sched.tasks[second].state, TaskState::Blocked);

        // A second signal serves the remaining waiter.
        sched.flags_set(group, EVT).unwrap();
        assert_eq!(sched.tasks[second].state, TaskState::Ready);
    }

    #[test]
    fn test_group_table_exhaustion_and_bad_ids() {
        let mut sched = booted();
        for _ in 0..MAX_FLAG_GROUPS {
            sched.flags_create().unwrap();
        }
        assert_eq!(sched.flags_create(), Err(KernelError::ResourceExhausted));
        assert_eq!(
            sched.flags_set(MAX_FLAG_GROUPS, EVT),
            Err(KernelError::InvalidState)
        );
    }

    #[test]
    fn test_bits_accumulate_across_interleaved_nonconsuming_gets() {
        let mut sched = booted();
        let group = sched.flags_create().unwrap();
        let mut expected = 0u32;
        for mask in [0b0001u32, 0b0100, 0b0001, 0b1000] {
            sched.flags_set(group, mask).unwrap();
            expected |= mask;
            // Non-consuming observation between sets never loses bits.
            assert_eq!(
                sched.flags_try_get(group, expected, MatchMode::AllBits, false),
                Ok(Some(expected))
            );
        }
        assert_eq!(sched.flag_groups[group].bits(), expected);
    }

    // --- time slicing ---------------------------------------------------

    #[test]
    fn test_slice_expiry_reoffers_core_in_creation_order() {
        let mut sched = booted();
        let peer = sched.create_task(spin, &task(5, 5, true)).unwrap();
        let mut config = task(5, 5, true);
        config.time_slice = 2;
        let sliced = sched.create_task(spin, &config).unwrap();

        // Park the peer so the sliced task takes the core first.
        sched.suspend(peer).unwrap();
        assert_eq!(sched.schedule(), sliced);
        sched.resume(peer).unwrap();

        sched.tick();
        assert_eq!(sched.tasks[sliced].state, TaskState::Running);
        sched.tick();
        // Slice expired: the earlier-created equal-priority peer gets in.
        assert!(sched.needs_reschedule);
        assert_eq!(sched.schedule(), peer);
    }

    // --- fault path -----------------------------------------------------

    #[test]
    fn test_canary_corruption_faults_running_task() {
        let mut sched = booted();
        let victim = sched.create_task(spin, &task(1, 1, true)).unwrap();
        assert_eq!(sched.schedule(), victim);

        // Overrun: the bottom word of the region is overwritten.
        let region = sched.tasks[victim].stack;
        sched.stacks.region_mut(region)[0] = 0;

        assert_eq!(sched.tick(), Some(victim));
        assert_eq!(sched.tasks[victim].state, TaskState::Faulted);
        // Terminal: the task can never be brought back.
        assert_eq!(sched.resume(victim), Err(KernelError::InvalidState));
    }

    #[test]
    fn test_intact_canary_reports_no_fault() {
        let mut sched = booted();
        let a = sched.create_task(spin, &task(1, 1, true)).unwrap();
        sched.schedule();
        for _ in 0..100 {
            assert_eq!(sched.tick(), None);
        }
        assert_eq!(sched.tasks[a].state, TaskState::Running);
    }

    // --- timer pipeline -------------------------------------------------

    #[test]
    fn test_periodic_timer_wakes_waiter_once_per_period() {
        let mut sched = booted();
        let waiter = sched.create_task(spin, &task(1, 1, true)).unwrap();
        let group = sched.flags_create().unwrap();
        const PERIOD: u32 = 5;
        sched
            .timer_create(PERIOD, TimerMode::Periodic, |_| {})
            .unwrap();
        block_task(&mut sched, waiter, wait_on(group, EVT, MatchMode::AnyBit, None));

        // Drive the SysTick pipeline for three periods; the expired-timer
        // callback would call event_flags_set, modeled inline here.
        let mut resumed_at: Vec<u64> = Vec::new();
        for _ in 0..(3 * PERIOD) {
            let expired = sched.advance_timers();
            for _ in expired.iter() {
                sched.flags_set(group, EVT).unwrap();
            }
            sched.tick();

            if sched.tasks[waiter].state == TaskState::Ready {
                resumed_at.push(sched.tick_count);
                // The woken task runs its body once and re-blocks.
                assert_eq!(sched.schedule(), waiter);
                assert_eq!(sched.take_pending(waiter), Some(WaitOutcome::Matched(EVT)));
                sched.block_current_on_flags(wait_on(group, EVT, MatchMode::AnyBit, None));
                sched.schedule();
            }
        }
        assert_eq!(resumed_at, vec![5, 10, 15]);
    }

    #[test]
    fn test_one_shot_timer_wakes_waiter_once() {
        let mut sched = booted();
        let waiter = sched.create_task(spin, &task(1, 1, true)).unwrap();
        let group = sched.flags_create().unwrap();
        sched.timer_create(4, TimerMode::OneShot, |_| {}).unwrap();
        block_task(&mut sched, waiter, wait_on(group, EVT, MatchMode::AnyBit, None));

        let mut wakes = 0;
        for _ in 0..20 {
            let expired = sched.advance_timers();
            for _ in expired.iter() {
                sched.flags_set(group, EVT).unwrap();
            }
            sched.tick();
            if sched.tasks[waiter].state == TaskState::Ready {
                wakes += 1;
                assert_eq!(sched.schedule(), waiter);
                sched.take_pending(waiter);
                sched.block_current_on_flags(wait_on(group, EVT, MatchMode::AnyBit, None));
                sched.schedule();
            }
        }
        assert_eq!(wakes, 1);
    }
}
