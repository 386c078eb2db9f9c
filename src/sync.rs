//! # Synchronization
//!
//! The kernel's single synchronization domain: every piece of shared state
//! — the task table, flag-group bits, timer slots — is mutated only inside
//! `critical_section`. On the target the implementation disables interrupts
//! (the single-core implementation from the `cortex-m` crate); host tests
//! run against the `std` implementation.

use critical_section::CriticalSection;

/// Execute `f` with the kernel's shared state locked against concurrent
/// access from interrupt handlers.
///
/// Keep the enclosed work short — the tick interrupt is stalled for its
/// duration.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    ::critical_section::with(f)
}
