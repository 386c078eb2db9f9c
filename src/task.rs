//! # Task Control Block
//!
//! The task model: a unit of schedulable execution with its own stack
//! region, a fixed priority, and a preemption threshold that raises its
//! effective immunity to preemption while it runs.
//!
//! TCBs live inline in the scheduler's fixed table — no heap. A task's body
//! is a diverging function that runs an infinite loop with explicit blocking
//! points; returning from it is a fatal programming error and traps into a
//! halt.

use crate::config::NO_TIME_SLICE;
use crate::error::KernelError;
use crate::flags::{FlagWait, WaitOutcome};
use crate::stack::StackRegion;

/// Index of a task in the scheduler's fixed table. Stable for the life of
/// the system — tasks are created during initialization and never destroyed.
pub type TaskId = usize;

/// A task body: runs an infinite loop with explicit blocking points and
/// never returns.
pub type TaskEntry = extern "C" fn() -> !;

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Execution state of a task.
///
/// ```text
///             create(auto_start)            schedule()
///   ┌─────────┐ ───────────────► ┌───────┐ ──────────► ┌─────────┐
///   │ Created │                  │ Ready │ ◄────────── │ Running │
///   └─────────┘ ───────────────► └───────┘   preempt   └─────────┘
///        create(!auto_start)        ▲ ▲                  │     │
///                                   │ └─ match/timeout ──│──┐  │ flag wait
///                         resume()  │                    ▼  │  ▼
///                       ┌───────────┴─┐   suspend()   ┌───────────┐
///                       │  Suspended  │ ◄──────────── │  Blocked  │*
///                       └─────────────┘               └───────────┘
///
///   * suspend() applies to Ready/Running only; Blocked leaves via its
///     wait condition. Any state ──stack corruption──► Faulted (terminal).
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Slot not yet populated by `create_task`.
    Created,
    /// Runnable, waiting for the core.
    Ready,
    /// Currently executing. Exactly one task is Running at any instant.
    Running,
    /// Waiting on an event flag group (with or without a deadline).
    Blocked,
    /// Taken out of scheduling by `suspend` or created without auto-start.
    Suspended,
    /// Stack corruption detected. Terminal; the system halts.
    Faulted,
}

// ---------------------------------------------------------------------------
// Task configuration (immutable after creation)
// ---------------------------------------------------------------------------

/// Static configuration for a task, fixed at creation time.
#[derive(Debug, Clone, Copy)]
pub struct TaskConfig {
    /// Priority, lower value = higher urgency. Application range is
    /// `0..=LOWEST_PRIORITY`; ties are broken by creation order.
    pub priority: u8,

    /// Preemption floor while the task runs: only a ready task whose
    /// priority is numerically *strictly less* than this value may preempt.
    /// Must be numerically ≤ `priority`; equal to `priority` it degenerates
    /// to plain priority preemption.
    pub preemption_threshold: u8,

    /// Bytes of stack to claim from the pool.
    pub stack_size: usize,

    /// Ticks of core time before the task is re-offered to equal-priority
    /// work. `NO_TIME_SLICE` (the default behavior) lets the task keep the
    /// core until it blocks or suspends.
    pub time_slice: u32,

    /// Start Ready (`true`) or Suspended, to be `resume`d later.
    pub auto_start: bool,
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Per-task kernel state. Stored inline in the scheduler's table.
pub struct TaskControlBlock {
    /// Slot index; assigned once at creation.
    pub id: TaskId,

    /// Current execution state.
    pub state: TaskState,

    pub priority: u8,
    pub preemption_threshold: u8,

    /// Stack region claimed from the pool at creation, never resized.
    pub stack: StackRegion,

    /// Saved process stack pointer. Written by the context switch; points
    /// into the task's stack region.
    pub stack_pointer: *mut u32,

    /// Time-slice length in ticks; `NO_TIME_SLICE` disables slicing.
    pub time_slice: u32,

    /// Ticks left in the current slice (meaningful while Running with
    /// slicing enabled).
    pub slice_remaining: u32,

    /// Wait specification while Blocked on an event flag group.
    pub wait: Option<FlagWait>,

    /// Outcome posted by the waker (or the timeout sweep); collected by the
    /// task when it resumes from a flag wait.
    pub pending: Option<WaitOutcome>,
}

// Safety: the raw stack_pointer always points into the task's own stack
// region inside the kernel's static pool, and TCBs are only touched inside
// critical sections or from the (serialized) exception handlers.
unsafe impl Send for TaskControlBlock {}
unsafe impl Sync for TaskControlBlock {}

impl TaskControlBlock {
    /// An unpopulated slot, for const-initializing the scheduler's table.
    pub const EMPTY: TaskControlBlock = TaskControlBlock {
        id: 0,
        state: TaskState::Created,
        priority: 0,
        preemption_threshold: 0,
        stack: StackRegion::EMPTY,
        stack_pointer: core::ptr::null_mut(),
        time_slice: NO_TIME_SLICE,
        slice_remaining: 0,
        wait: None,
        pending: None,
    };

    /// Populate a slot for a newly created task. The stack region must
    /// already be claimed and painted; the initial frame is built
    /// separately by the scheduler.
    pub fn init(&mut self, id: TaskId, config: &TaskConfig, stack: StackRegion) {
        self.id = id;
        self.state = if config.auto_start {
            TaskState::Ready
        } else {
            TaskState::Suspended
        };
        self.priority = config.priority;
        self.preemption_threshold = config.preemption_threshold;
        self.stack = stack;
        self.stack_pointer = core::ptr::null_mut();
        self.time_slice = config.time_slice;
        self.slice_remaining = config.time_slice;
        self.wait = None;
        self.pending = None;
    }

    /// Candidate for selection: holds or may claim the core.
    #[inline]
    pub fn is_schedulable(&self) -> bool {
        matches!(self.state, TaskState::Ready | TaskState::Running)
    }

    /// Move Suspended→Ready. Ok-no-op when already Ready or Running;
    /// `InvalidState` for every other state — a Blocked task is waiting on
    /// its condition and cannot be resumed past it, and Faulted is terminal.
    pub fn resume(&mut self) -> Result<(), KernelError> {
        match self.state {
            TaskState::Suspended => {
                self.state = TaskState::Ready;
                Ok(())
            }
            TaskState::Ready | TaskState::Running => Ok(()),
            _ => Err(KernelError::InvalidState),
        }
    }

    /// Move Ready/Running→Suspended. `InvalidState` for every other state.
    pub fn suspend(&mut self) -> Result<(), KernelError> {
        match self.state {
            TaskState::Ready | TaskState::Running => {
                self.state = TaskState::Suspended;
                Ok(())
            }
            _ => Err(KernelError::InvalidState),
        }
    }

    /// Arm the slice counter when the task takes the core.
    pub fn reload_slice(&mut self) {
        self.slice_remaining = self.time_slice;
    }

    /// Account one Running tick against the slice. Returns true when an
    /// enabled slice just expired.
    pub fn slice_tick(&mut self) -> bool {
        if self.time_slice == NO_TIME_SLICE {
            return false;
        }
        if self.slice_remaining > 0 {
            self.slice_remaining -= 1;
        }
        self.slice_remaining == 0
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
