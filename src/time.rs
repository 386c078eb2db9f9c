//! # Time Base
//!
//! Conversion between wall-clock durations and scheduler ticks, and the
//! timeout type used by blocking waits.
//!
//! The conversion rounds up: a requested duration is never under-satisfied.
//! There is exactly one implementation, in the widest width the kernel deals
//! in; call sites that need a narrower tick count narrow explicitly.

use crate::config::TICK_HZ;

const MILLIS_PER_SEC: u64 = 1000;

/// Convert a duration in milliseconds to scheduler ticks, rounding up.
///
/// `millis_to_ticks(0)` is 0. The intermediate product is carried in `u128`
/// so the result is exact for every representable `u64` input. Pure and
/// callable from any context.
pub const fn millis_to_ticks(millis: u64) -> u64 {
    if millis == 0 {
        return 0;
    }
    let numerator = millis as u128 * TICK_HZ as u128;
    ((numerator + (MILLIS_PER_SEC - 1) as u128) / MILLIS_PER_SEC as u128) as u64
}

/// Tick duration in milliseconds, rounded up to at least 1.
///
/// Used by the ceiling-property tests; exact when `TICK_HZ` divides 1000.
pub const fn tick_duration_millis() -> u64 {
    let d = MILLIS_PER_SEC / TICK_HZ as u64;
    if d == 0 {
        1
    } else {
        d
    }
}

/// How long a blocking wait is allowed to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Return immediately with `WouldBlock` if the condition is not
    /// already satisfied.
    NoWait,
    /// Wait at most this many ticks, then fail with `TimedOut`.
    Ticks(u64),
    /// Wait until the condition is satisfied, however long that takes.
    Forever,
}

impl Timeout {
    /// Absolute expiry tick for a wait armed at `now`, or `None` for an
    /// unbounded wait. `NoWait` never arms a wait and has no deadline.
    pub fn deadline(self, now: u64) -> Option<u64> {
        match self {
            Timeout::NoWait => None,
            Timeout::Ticks(n) => Some(now.saturating_add(n)),
            Timeout::Forever => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
