//! Phase tracking for a single convergence wait.
//!
//! Each wait moves through a small state machine. Transitions are made with
//! compare-and-swap on one `AtomicU8`, so an illegal transition (for example
//! polling a wait that was never triggered) is refused instead of silently
//! overwriting the phase.
//!
//! # State Transitions
//!
//! ```text
//!                 trigger()           begin_polling()
//! ┌────────────┐ ──────────> ┌───────────┐ ──────────> ┌─────────┐ converge() ┌───────────┐
//! │ NotStarted │             │ Triggered │             │ Polling │ ─────────> │ Converged │
//! └────────────┘             └───────────┘             └─────────┘            └───────────┘
//!       │                                                   │  time_out()     ┌──────────┐
//!       │ already_satisfied()                               └───────────────> │ TimedOut │
//!       ▼                                                                     └──────────┘
//! ┌───────────────────┐
//! │ AlreadySatisfied  │          fail() from any non-terminal phase → Failed
//! └───────────────────┘
//! ```
//!
//! Mid-transition and observe-only entries skip the trigger call but still
//! pass through `Triggered`, which marks the start of the measured interval.

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

/// Phase of one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WaitPhase {
    /// Pre-check has not run yet.
    NotStarted = 0,
    /// Subscription exists and the trigger (if any) was accepted.
    Triggered = 1,
    /// Poll loop is running.
    Polling = 2,
    /// Goal state reached with every expected flag fired.
    Converged = 3,
    /// Deadline passed first.
    TimedOut = 4,
    /// Goal state held at entry; nothing was subscribed or triggered.
    AlreadySatisfied = 5,
    /// Precondition, trigger or protocol failure.
    Failed = 6,
}

impl WaitPhase {
    const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::NotStarted,
            1 => Self::Triggered,
            2 => Self::Polling,
            3 => Self::Converged,
            4 => Self::TimedOut,
            5 => Self::AlreadySatisfied,
            _ => Self::Failed,
        }
    }

    /// Returns `true` once no further transition is possible.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Converged | Self::TimedOut | Self::AlreadySatisfied | Self::Failed
        )
    }

    /// Returns `true` for the two successful outcomes.
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Converged | Self::AlreadySatisfied)
    }
}

impl fmt::Display for WaitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Atomically tracked [`WaitPhase`].
pub struct WaitLifecycle {
    phase: AtomicU8,
}

impl WaitLifecycle {
    /// Creates a lifecycle in `NotStarted`.
    pub const fn new() -> Self {
        Self {
            phase: AtomicU8::new(WaitPhase::NotStarted as u8),
        }
    }

    /// Current phase.
    #[inline]
    pub fn phase(&self) -> WaitPhase {
        WaitPhase::from_raw(self.phase.load(Ordering::Acquire))
    }

    /// Moves `from` to `to` if the current phase is still `from`.
    fn transition(&self, from: WaitPhase, to: WaitPhase) -> bool {
        let ok = self
            .phase
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if ok {
            trace!("wait phase {from} -> {to}");
        }
        ok
    }

    /// `NotStarted → AlreadySatisfied`.
    pub fn already_satisfied(&self) -> bool {
        self.transition(WaitPhase::NotStarted, WaitPhase::AlreadySatisfied)
    }

    /// `NotStarted → Triggered`.
    pub fn trigger(&self) -> bool {
        self.transition(WaitPhase::NotStarted, WaitPhase::Triggered)
    }

    /// `Triggered → Polling`.
    pub fn begin_polling(&self) -> bool {
        self.transition(WaitPhase::Triggered, WaitPhase::Polling)
    }

    /// `Polling → Converged`.
    pub fn converge(&self) -> bool {
        self.transition(WaitPhase::Polling, WaitPhase::Converged)
    }

    /// `Polling → TimedOut`.
    pub fn time_out(&self) -> bool {
        self.transition(WaitPhase::Polling, WaitPhase::TimedOut)
    }

    /// Any non-terminal phase `→ Failed`.
    ///
    /// Returns `false` if the wait had already finished.
    pub fn fail(&self) -> bool {
        loop {
            let current = self.phase();
            if current.is_terminal() {
                return false;
            }
            if self.transition(current, WaitPhase::Failed) {
                return true;
            }
        }
    }
}

impl Default for WaitLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WaitLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitLifecycle")
            .field("phase", &self.phase())
            .finish()
    }
}
