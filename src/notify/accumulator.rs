//! Flag accumulation for a single in-flight operation.
//!
//! The accumulator is the only state shared between the notification-delivery
//! context (which records flags) and the polling context (which reads them).
//! Both sides go through the same lock, so a reader never sees a fired mask
//! without the completion timestamp that goes with it.

use std::time::Instant;

use spin::Mutex;

use super::Flags;

#[derive(Debug, Clone, Copy)]
struct AccumulatorState {
    fired: Flags,
    completed_at: Option<Instant>,
}

/// Consistent view of an accumulator taken under its lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagSnapshot {
    /// Flags recorded so far.
    pub fired: Flags,
    /// Moment the fired set first covered the expected set, if it has.
    pub completed_at: Option<Instant>,
}

/// Records which expected flags have fired and when the set was completed.
///
/// The fired mask only grows. The completion timestamp is set once, the first
/// time the fired mask becomes a superset of the expected mask, and never
/// moves afterwards.
pub struct FlagAccumulator {
    expected: Flags,
    state: Mutex<AccumulatorState>,
}

impl FlagAccumulator {
    /// Creates an accumulator waiting for `expected`.
    ///
    /// An empty expected mask is satisfied immediately: the completion
    /// timestamp is set at construction.
    pub fn new(expected: Flags) -> Self {
        let completed_at = expected.is_empty().then(Instant::now);
        Self {
            expected,
            state: Mutex::new(AccumulatorState {
                fired: Flags::EMPTY,
                completed_at,
            }),
        }
    }

    /// The expected mask fixed at construction.
    #[inline]
    pub fn expected(&self) -> Flags {
        self.expected
    }

    /// Adds `flag` to the fired mask.
    ///
    /// Returns the fired mask as it was before this call. Recording a flag
    /// that is already present leaves the mask and the timestamp untouched.
    pub fn record_flag(&self, flag: Flags) -> Flags {
        let mut state = self.state.lock();
        let previous = state.fired;
        state.fired |= flag;
        if state.completed_at.is_none() && state.fired.contains(self.expected) {
            state.completed_at = Some(Instant::now());
            trace!(
                "flags {} cover expected {}, completion recorded",
                state.fired,
                self.expected
            );
        }
        previous
    }

    /// Current fired mask.
    pub fn fired(&self) -> Flags {
        self.state.lock().fired
    }

    /// When the expected set was first satisfied, or `None` if it has not been.
    pub fn completed_at(&self) -> Option<Instant> {
        self.state.lock().completed_at
    }

    /// Returns `true` once the fired mask covers the expected mask.
    pub fn is_satisfied(&self) -> bool {
        self.state.lock().fired.contains(self.expected)
    }

    /// Reads the fired mask and completion timestamp together.
    pub fn snapshot(&self) -> FlagSnapshot {
        let state = *self.state.lock();
        FlagSnapshot {
            fired: state.fired,
            completed_at: state.completed_at,
        }
    }
}

impl core::fmt::Debug for FlagAccumulator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("FlagAccumulator")
            .field("expected", &self.expected)
            .field("fired", &snapshot.fired)
            .field("completed", &snapshot.completed_at.is_some())
            .finish()
    }
}
