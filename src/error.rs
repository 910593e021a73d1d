//! Error type shared by every convergence operation.
//!
//! Every variant is terminal for the single operation that produced it. The
//! waiter never retries; callers that want retries wrap the operation.

use std::fmt;
use std::time::Duration;

use crate::notify::{Flags, SubscriptionId};

/// Result alias used throughout the crate.
pub type ConvergeResult<T = ()> = Result<T, ConvergeError>;

/// Failure of a single convergence operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConvergeError {
    /// The subsystem was not in a state that allows the operation to start.
    #[error("{method} {reason}")]
    Precondition {
        /// Operation label, e.g. `pair(device=AA:BB:CC:DD:EE:FF)`.
        method: String,
        /// What was missing.
        reason: String,
    },

    /// A notification carried a missing or out-of-range discriminant.
    #[error("{method} malformed notification on {topic}: {detail}")]
    Protocol {
        /// Operation label.
        method: String,
        /// Topic the notification arrived on.
        topic: String,
        /// What was wrong with the payload.
        detail: String,
    },

    /// The trigger call refused the request synchronously.
    #[error("{method} trigger rejected")]
    TriggerRejected {
        /// Operation label.
        method: String,
    },

    /// The polled state at entry is outside the operation's vocabulary.
    #[error("{method} invalid state: state={state}")]
    UnexpectedState {
        /// Operation label.
        method: String,
        /// Raw state code as reported by the device API.
        state: i32,
    },

    /// Two views of the subsystem disagree, e.g. a peer reports `Bonded` but
    /// is missing from the bonded set.
    #[error("{method} {detail}")]
    Inconsistent {
        /// Operation label.
        method: String,
        /// Which views disagreed.
        detail: String,
    },

    /// A decoder listens on more topics than a router can hold.
    #[error("{method} decoder names {topics} topics, at most {max} supported")]
    TooManyTopics {
        /// Operation label.
        method: String,
        /// Topics the decoder named.
        topics: usize,
        /// Router capacity.
        max: usize,
    },

    /// The poll loop reached its deadline without converging.
    #[error("{0}")]
    Timeout(TimeoutDiagnostic),

    /// `unsubscribe` was called with a handle the bus does not know.
    #[error("subscription {0:?} not found")]
    NotSubscribed(SubscriptionId),

    /// A profile side channel could not be established in time.
    #[error("profile proxy {profile} unavailable")]
    ProxyUnavailable {
        /// Profile name.
        profile: &'static str,
    },

    /// The session has already been closed.
    #[error("session closed")]
    Closed,
}

impl ConvergeError {
    pub(crate) fn precondition(method: &str, reason: impl Into<String>) -> Self {
        Self::Precondition {
            method: method.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn inconsistent(method: &str, detail: impl Into<String>) -> Self {
        Self::Inconsistent {
            method: method.into(),
            detail: detail.into(),
        }
    }

    /// Returns the timeout diagnostic when this is a convergence timeout.
    pub fn as_timeout(&self) -> Option<&TimeoutDiagnostic> {
        match self {
            Self::Timeout(diag) => Some(diag),
            _ => None,
        }
    }
}

/// Structured payload of a convergence timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutDiagnostic {
    /// Operation label.
    pub method: String,
    /// Last state observed by the poll loop.
    pub observed: String,
    /// State the operation was waiting for.
    pub goal: String,
    /// Flags fired by the time the deadline passed.
    pub fired: Flags,
    /// Flags the operation required.
    pub expected: Flags,
    /// The deadline that was exceeded.
    pub timeout: Duration,
}

impl TimeoutDiagnostic {
    /// Expected flags that never fired.
    pub fn unfired(&self) -> Flags {
        self.expected.difference(self.fired)
    }
}

impl fmt::Display for TimeoutDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} timeout after {} ms: state={} (expected {}), flags={} (expected {}, missing {})",
            self.method,
            self.timeout.as_millis(),
            self.observed,
            self.goal,
            self.fired,
            self.expected,
            self.unfired(),
        )
    }
}
