//! # TaktOS Configuration
//!
//! Compile-time constants governing the kernel. All limits are fixed at
//! compile time — no dynamic allocation, no reclamation paths.

/// Maximum number of tasks, including the kernel's internal idle task
/// (slot 0). Bounds the static TCB table.
pub const MAX_TASKS: usize = 8;

/// Maximum number of software timers.
pub const MAX_TIMERS: usize = 4;

/// Maximum number of event flag groups.
pub const MAX_FLAG_GROUPS: usize = 4;

/// Scheduler tick frequency in Hz. Determines the granularity of timer
/// periods, wait timeouts and time slices.
pub const TICK_HZ: u32 = 1000;

/// System clock frequency in Hz (STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// Total bytes available to the stack pool. Every task stack is claimed
/// from this pool exactly once, at creation.
pub const STACK_POOL_SIZE: usize = 24 * 1024;

/// Smallest stack a task may be created with. Must hold the hardware
/// exception frame (32 bytes), the software-saved R4–R11 (32 bytes) and
/// the canary word.
pub const MIN_STACK_SIZE: usize = 256;

/// Stack size of the internal idle task.
pub const IDLE_STACK_SIZE: usize = 256;

/// Numerically largest (least urgent) priority an application task may
/// use. Lower value = higher urgency.
pub const LOWEST_PRIORITY: u8 = 31;

/// Priority of the internal idle task, one notch below the application
/// floor so it is selected only when nothing else is ready.
pub const IDLE_PRIORITY: u8 = LOWEST_PRIORITY + 1;

/// Time-slice value that disables time slicing for a task. This is the
/// default; a task then keeps the core until it blocks or suspends.
pub const NO_TIME_SLICE: u32 = 0;

/// Word pattern every stack region is painted with at creation. The word
/// at the very bottom of the region acts as the overflow canary.
pub const STACK_FILL: u32 = 0xA5A5_A5A5;
