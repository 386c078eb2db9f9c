//! # Kernel Error Taxonomy
//!
//! Every fallible kernel operation returns one of these. `TimedOut` and
//! `WouldBlock` are ordinary control-flow outcomes of a bounded or
//! non-blocking wait; the caller must handle them explicitly. The other two
//! are unrecoverable during initialization — a statically sized system
//! cannot continue with missing tasks or timers.

use core::fmt;

/// Result of a fallible kernel operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// A fixed table or the stack pool is exhausted.
    ResourceExhausted,
    /// The operation is illegal for the object's current state, or a
    /// parameter is outside its valid range.
    InvalidState,
    /// A bounded wait elapsed before its condition was satisfied.
    TimedOut,
    /// A no-wait request could not be satisfied immediately.
    WouldBlock,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KernelError::ResourceExhausted => "resource exhausted",
            KernelError::InvalidState => "invalid state",
            KernelError::TimedOut => "timed out",
            KernelError::WouldBlock => "would block",
        };
        f.write_str(s)
    }
}
