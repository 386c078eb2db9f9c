//! # Software Timers
//!
//! Countdown timers driven by the scheduler tick. On expiry a timer's
//! callback runs in interrupt context — inside the SysTick handler — so a
//! callback must complete quickly and must not block; the only operations it
//! should perform are non-blocking signals such as
//! [`kernel::event_flags_set`](crate::kernel::event_flags_set).
//!
//! `advance()` only collects the expired `(id, callback)` pairs; the SysTick
//! handler invokes them after the table borrow ends, so a callback is free
//! to re-enter the kernel.

use crate::config::MAX_TIMERS;
use crate::error::KernelError;

/// Index of a timer in the kernel's fixed timer table.
pub type TimerId = usize;

/// Expiry callback. Receives the identity of the timer that fired.
pub type TimerCallback = fn(TimerId);

/// Rearm behavior after expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    /// Fire once, then disarm.
    OneShot,
    /// Reload `remaining` from `period` after each expiry.
    Periodic,
}

#[derive(Debug, Clone, Copy)]
struct SoftTimer {
    period: u32,
    remaining: u32,
    mode: TimerMode,
    callback: TimerCallback,
    active: bool,
}

/// Expired timers collected by one `advance()` pass.
pub struct Expired {
    entries: [Option<(TimerId, TimerCallback)>; MAX_TIMERS],
    len: usize,
}

impl Expired {
    pub fn iter(&self) -> impl Iterator<Item = (TimerId, TimerCallback)> + '_ {
        self.entries[..self.len].iter().flatten().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Fixed table of timer slots.
pub struct TimerTable {
    slots: [Option<SoftTimer>; MAX_TIMERS],
}

impl TimerTable {
    pub const fn new() -> Self {
        TimerTable {
            slots: [None; MAX_TIMERS],
        }
    }

    /// Arm a new timer with `remaining = period`. Fails with
    /// `ResourceExhausted` when every slot is taken and `InvalidState` for
    /// a zero period.
    pub fn create(
        &mut self,
        period: u32,
        mode: TimerMode,
        callback: TimerCallback,
    ) -> Result<TimerId, KernelError> {
        if period == 0 {
            return Err(KernelError::InvalidState);
        }
        let id = self
            .slots
            .iter()
            .position(|slot| slot.is_none())
            .ok_or(KernelError::ResourceExhausted)?;
        self.slots[id] = Some(SoftTimer {
            period,
            remaining: period,
            mode,
            callback,
            active: true,
        });
        Ok(id)
    }

    /// One tick: decrement every active countdown and collect the timers
    /// that reached zero. Periodic timers reload, one-shots disarm.
    pub fn advance(&mut self) -> Expired {
        let mut expired = Expired {
            entries: [None; MAX_TIMERS],
            len: 0,
        };
        for (id, slot) in self.slots.iter_mut().enumerate() {
            let Some(timer) = slot else { continue };
            if !timer.active {
                continue;
            }
            timer.remaining -= 1;
            if timer.remaining > 0 {
                continue;
            }
            expired.entries[expired.len] = Some((id, timer.callback));
            expired.len += 1;
            match timer.mode {
                TimerMode::Periodic => timer.remaining = timer.period,
                TimerMode::OneShot => timer.active = false,
            }
        }
        expired
    }

    /// Halt a timer's countdown without releasing its slot.
    pub fn stop(&mut self, id: TimerId) -> Result<(), KernelError> {
        self.get_mut(id)?.active = false;
        Ok(())
    }

    /// Rearm a stopped (or running) timer from a full period.
    pub fn restart(&mut self, id: TimerId) -> Result<(), KernelError> {
        let timer = self.get_mut(id)?;
        timer.remaining = timer.period;
        timer.active = true;
        Ok(())
    }

    fn get_mut(&mut self, id: TimerId) -> Result<&mut SoftTimer, KernelError> {
        self.slots
            .get_mut(id)
            .and_then(|slot| slot.as_mut())
            .ok_or(KernelError::InvalidState)
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
