//! The convergence wait.
//!
//! A wait reconciles two racing sources of truth: a polled state query and a
//! stream of notifications decoded into flags. It succeeds only when the
//! polled state equals the goal *and* every expected flag has fired.
//!
//! # Algorithm
//!
//! ```text
//! query ──► at goal? ──yes──► AlreadySatisfied (no subscription, no trigger)
//!             │ no
//!             ▼
//!       classify entry ──► Trigger | Observe | MidTransition (expected := ∅)
//!             │
//!             ▼
//!       subscribe router ──► trigger (Trigger only) ──► deadline fixed here
//!             │
//!             ▼
//!       ┌─► query + snapshot flags ─► violation? ─► Failed
//!       │         │
//!       │   goal && flags ⊇ expected ─► Converged
//!       │         │
//!       │   deadline passed ─► TimedOut
//!       └── sleep min(poll, remaining)
//! ```
//!
//! The subscription is a drop guard, so every exit path above unsubscribes.
//! Elapsed time runs from the trigger to the accumulator's completion
//! timestamp; with an empty expected mask it runs to the poll that detected
//! convergence. Mid-transition entries report no elapsed time, since the
//! transition began before this call.

use core::fmt;
use std::time::{Duration, Instant};

use crate::clock::Deadline;
use crate::error::{ConvergeError, ConvergeResult, TimeoutDiagnostic};
use crate::family::FamilyDecoder;
use crate::lifecycle::{WaitLifecycle, WaitPhase};
use crate::notify::{Flags, NotificationBus, NotificationRouter, RouterStats};

/// One sample of the polled state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observed<T> {
    /// A code inside the vocabulary.
    Known(T),
    /// A raw code the vocabulary does not cover.
    Unknown(i32),
}

impl<T> Observed<T> {
    /// Maps a raw code through `from_code`.
    pub fn from_code(code: i32, from_code: impl FnOnce(i32) -> Option<T>) -> Self {
        match from_code(code) {
            Some(state) => Self::Known(state),
            None => Self::Unknown(code),
        }
    }
}

impl<T: fmt::Display> fmt::Display for Observed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(state) => fmt::Display::fmt(state, f),
            Self::Unknown(code) => write!(f, "unknown({code})"),
        }
    }
}

/// How a wait proceeds when the state is not yet at its goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    /// Issue the trigger and expect the full flag set.
    Trigger,
    /// Do not trigger; something outside this call drives the transition,
    /// and its notifications are still expected.
    Observe,
    /// A transition is already in flight; its early notifications may have
    /// been missed, so polling alone decides.
    MidTransition,
}

/// Outcome of a successful wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitReport {
    /// Operation label.
    pub method: String,
    /// `Converged` or `AlreadySatisfied`.
    pub phase: WaitPhase,
    /// Trigger-to-completion time, when it can be measured.
    pub elapsed: Option<Duration>,
    /// Flags fired by the time convergence was detected.
    pub fired: Flags,
    /// Flags the wait required, empty after a mid-transition entry.
    pub expected: Flags,
    /// Router delivery counters.
    pub stats: RouterStats,
}

impl WaitReport {
    /// Record-sink line for this report.
    pub fn summary(&self) -> String {
        match self.elapsed {
            Some(elapsed) => format!("{} completed in {} ms", self.method, elapsed.as_millis()),
            None => format!("{} completed", self.method),
        }
    }
}

type Query<'a, T> = Box<dyn Fn() -> Observed<T> + 'a>;
type Classify<'a, T> = Box<dyn Fn(T) -> ConvergeResult<Entry> + 'a>;
type Trigger<'a> = Box<dyn Fn() -> bool + 'a>;
type Verify<'a> = Box<dyn Fn() -> ConvergeResult + 'a>;

/// Description of one wait, built up by the caller and consumed by
/// [`ConvergenceWaiter::run`].
pub struct Wait<'a, T> {
    method: String,
    goal: T,
    timeout: Duration,
    query: Query<'a, T>,
    classify: Classify<'a, T>,
    trigger: Trigger<'a>,
    verify: Option<Verify<'a>>,
    decoder: FamilyDecoder,
    expected: Flags,
    shortcut: bool,
}

impl<'a, T> Wait<'a, T> {
    /// Wait for `query` to report `goal` within `timeout`.
    ///
    /// Without further configuration the wait triggers nothing, listens to
    /// nothing and expects no flags.
    pub fn new(
        method: impl Into<String>,
        goal: T,
        timeout: Duration,
        query: impl Fn() -> Observed<T> + 'a,
    ) -> Self {
        Self {
            method: method.into(),
            goal,
            timeout,
            query: Box::new(query),
            classify: Box::new(|_| Ok(Entry::Trigger)),
            trigger: Box::new(|| true),
            verify: None,
            decoder: FamilyDecoder::Silent,
            expected: Flags::EMPTY,
            shortcut: true,
        }
    }

    /// Routes notifications through `decoder`, expecting `expected`.
    pub fn listen(mut self, decoder: impl Into<FamilyDecoder>, expected: Flags) -> Self {
        self.decoder = decoder.into();
        self.expected = expected;
        self
    }

    /// Classifies a non-goal entry state.
    pub fn on_entry(mut self, classify: impl Fn(T) -> ConvergeResult<Entry> + 'a) -> Self {
        self.classify = Box::new(classify);
        self
    }

    /// Call that requests the transition. Returns whether it was accepted.
    pub fn trigger(mut self, trigger: impl Fn() -> bool + 'a) -> Self {
        self.trigger = Box::new(trigger);
        self
    }

    /// Consistency check run once the goal is reached.
    pub fn verify(mut self, verify: impl Fn() -> ConvergeResult + 'a) -> Self {
        self.verify = Some(Box::new(verify));
        self
    }

    /// Runs the trigger even when the goal already holds at entry.
    ///
    /// For operations whose completion is an event rather than a state
    /// change, such as fetching a message over a link that stays connected.
    pub fn always_trigger(mut self) -> Self {
        self.shortcut = false;
        self
    }

    /// Operation label.
    pub fn method(&self) -> &str {
        &self.method
    }
}

/// Runs [`Wait`]s against a notification bus.
pub struct ConvergenceWaiter<'b> {
    bus: &'b dyn NotificationBus,
    poll: Duration,
}

impl<'b> ConvergenceWaiter<'b> {
    /// Waiter subscribing on `bus` and sampling every `poll`.
    pub fn new(bus: &'b dyn NotificationBus, poll: Duration) -> Self {
        Self { bus, poll }
    }

    /// Drives `wait` to convergence.
    ///
    /// # Errors
    ///
    /// - [`ConvergeError::UnexpectedState`] if the entry state is outside the
    ///   vocabulary.
    /// - Whatever the entry classifier or verify hook returns.
    /// - [`ConvergeError::TriggerRejected`] if the trigger refuses.
    /// - [`ConvergeError::Protocol`] on a malformed correlated notification.
    /// - [`ConvergeError::Timeout`] if the deadline passes first.
    pub fn run<T>(&self, wait: Wait<'_, T>) -> ConvergeResult<WaitReport>
    where
        T: Copy + PartialEq + fmt::Display,
    {
        let Wait {
            method,
            goal,
            timeout,
            query,
            classify,
            trigger,
            verify,
            decoder,
            expected,
            shortcut,
        } = wait;
        let lifecycle = WaitLifecycle::new();
        let fail = |err: ConvergeError| {
            lifecycle.fail();
            debug!("{err}");
            err
        };
        let verified = || match &verify {
            Some(check) => check(),
            None => Ok(()),
        };

        let entry = match query() {
            Observed::Known(state) if shortcut && state == goal => {
                verified().map_err(&fail)?;
                lifecycle.already_satisfied();
                debug!("{method}: already {goal}");
                return Ok(WaitReport {
                    method,
                    phase: lifecycle.phase(),
                    elapsed: Some(Duration::ZERO),
                    fired: Flags::EMPTY,
                    expected,
                    stats: RouterStats::default(),
                });
            }
            Observed::Known(state) => classify(state).map_err(&fail)?,
            Observed::Unknown(code) => {
                return Err(fail(ConvergeError::UnexpectedState {
                    method,
                    state: code,
                }));
            }
        };

        let expected = if entry == Entry::MidTransition {
            debug!("{method}: mid-transition, ignoring expected {expected}");
            Flags::EMPTY
        } else {
            expected
        };

        let router = NotificationRouter::new(&method, decoder, expected).map_err(&fail)?;
        let subscription = router.attach(self.bus);

        let started = Instant::now();
        if entry == Entry::Trigger && !trigger() {
            return Err(fail(ConvergeError::TriggerRejected { method }));
        }
        lifecycle.trigger();
        let measured_from = (entry != Entry::MidTransition).then_some(started);
        let deadline = Deadline::starting_at(started, timeout);
        lifecycle.begin_polling();

        loop {
            let observed = query();
            let snapshot = router.accumulator().snapshot();
            router.check().map_err(&fail)?;
            let now = Instant::now();
            trace!("{method}: state={observed} fired={}", snapshot.fired);

            if observed == Observed::Known(goal) && snapshot.fired.contains(expected) {
                verified().map_err(&fail)?;
                subscription.release().map_err(&fail)?;
                lifecycle.converge();
                let finished = if expected.is_empty() {
                    Some(now)
                } else {
                    snapshot.completed_at
                };
                let elapsed = measured_from
                    .zip(finished)
                    .map(|(from, to)| to.saturating_duration_since(from));
                return Ok(WaitReport {
                    method,
                    phase: lifecycle.phase(),
                    elapsed,
                    fired: snapshot.fired,
                    expected,
                    stats: router.stats(),
                });
            }

            if deadline.is_expired_at(now) {
                lifecycle.time_out();
                drop(subscription);
                let diag = TimeoutDiagnostic {
                    method,
                    observed: observed.to_string(),
                    goal: goal.to_string(),
                    fired: snapshot.fired,
                    expected,
                    timeout,
                };
                warn!("{diag}");
                return Err(ConvergeError::Timeout(diag));
            }

            deadline.sleep_poll(self.poll);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::adapter::{self, AdapterDecoder, AdapterState};
    use crate::notify::{LocalBus, Notification};
    use core::sync::atomic::{AtomicI32, AtomicU32, Ordering};
    use std::thread;

    const POLL: Duration = Duration::from_millis(2);

    fn state_changed(state: AdapterState) -> Notification {
        Notification::new(adapter::ACTION_STATE_CHANGED).with_int(adapter::EXTRA_STATE, state.code())
    }

    fn query(code: &AtomicI32) -> impl Fn() -> Observed<AdapterState> + '_ {
        move || Observed::from_code(code.load(Ordering::SeqCst), AdapterState::from_code)
    }

    fn expected_on() -> Flags {
        adapter::STATE_TURNING_ON | adapter::STATE_ON
    }

    #[test]
    fn test_waiter_already_satisfied() {
        let bus = LocalBus::new();
        let state = AtomicI32::new(AdapterState::On.code());
        let triggers = AtomicU32::new(0);

        let wait = Wait::new("enable()", AdapterState::On, Duration::from_millis(50), query(&state))
            .listen(AdapterDecoder, expected_on())
            .trigger(|| {
                triggers.fetch_add(1, Ordering::SeqCst);
                true
            });
        let report = ConvergenceWaiter::new(&bus, POLL).run(wait).unwrap();

        assert_eq!(report.phase, WaitPhase::AlreadySatisfied);
        assert_eq!(report.elapsed, Some(Duration::ZERO));
        assert_eq!(triggers.load(Ordering::SeqCst), 0);
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn test_waiter_converges_after_flags_and_state() {
        let bus = LocalBus::new();
        let state = AtomicI32::new(AdapterState::Off.code());

        let wait = Wait::new("enable()", AdapterState::On, Duration::from_secs(2), query(&state))
            .listen(AdapterDecoder, expected_on())
            .trigger(|| {
                bus.publish(&state_changed(AdapterState::TurningOn));
                bus.publish(&state_changed(AdapterState::On));
                state.store(AdapterState::On.code(), Ordering::SeqCst);
                true
            });
        let report = ConvergenceWaiter::new(&bus, POLL).run(wait).unwrap();

        assert_eq!(report.phase, WaitPhase::Converged);
        assert_eq!(report.fired, expected_on());
        assert_eq!(report.stats.accepted, 2);
        assert!(report.elapsed.is_some());
        assert!(report.summary().starts_with("enable() completed in "));
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn test_waiter_state_alone_is_not_enough() {
        let bus = LocalBus::new();
        let state = AtomicI32::new(AdapterState::Off.code());

        let wait = Wait::new("enable()", AdapterState::On, Duration::from_millis(30), query(&state))
            .listen(AdapterDecoder, expected_on())
            .trigger(|| {
                bus.publish(&state_changed(AdapterState::TurningOn));
                state.store(AdapterState::On.code(), Ordering::SeqCst);
                true
            });
        let err = ConvergenceWaiter::new(&bus, POLL).run(wait).unwrap_err();

        let diag = err.as_timeout().unwrap();
        assert_eq!(diag.observed, "On");
        assert_eq!(diag.fired, adapter::STATE_TURNING_ON);
        assert_eq!(diag.unfired(), adapter::STATE_ON);
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn test_waiter_stuck_in_transition_times_out() {
        let bus = LocalBus::new();
        let state = AtomicI32::new(AdapterState::Off.code());

        let wait = Wait::new("enable()", AdapterState::On, Duration::from_millis(30), query(&state))
            .listen(AdapterDecoder, expected_on())
            .trigger(|| {
                bus.publish(&state_changed(AdapterState::TurningOn));
                state.store(AdapterState::TurningOn.code(), Ordering::SeqCst);
                true
            });
        let err = ConvergenceWaiter::new(&bus, POLL).run(wait).unwrap_err();

        let diag = err.as_timeout().unwrap();
        assert_eq!(diag.method, "enable()");
        assert_eq!(diag.observed, "TurningOn");
        assert_eq!(diag.goal, "On");
        assert_eq!(diag.fired, adapter::STATE_TURNING_ON);
        assert_eq!(diag.unfired(), adapter::STATE_ON);
        assert_eq!(diag.timeout, Duration::from_millis(30));
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn test_waiter_elapsed_ends_at_last_flag() {
        let bus = LocalBus::new();
        let state = AtomicI32::new(AdapterState::Off.code());

        // STATE_ON arrives ~35 ms after the trigger, the polled state ~80 ms later.
        let report = thread::scope(|s| {
            let (bus, state) = (&bus, &state);
            let wait = Wait::new("enable()", AdapterState::On, Duration::from_secs(2), query(state))
                .listen(AdapterDecoder, expected_on())
                .trigger(move || {
                    s.spawn(move || {
                        thread::sleep(Duration::from_millis(5));
                        bus.publish(&state_changed(AdapterState::TurningOn));
                        thread::sleep(Duration::from_millis(30));
                        bus.publish(&state_changed(AdapterState::On));
                        thread::sleep(Duration::from_millis(80));
                        state.store(AdapterState::On.code(), Ordering::SeqCst);
                    });
                    true
                });
            ConvergenceWaiter::new(bus, POLL).run(wait)
        })
        .unwrap();

        assert_eq!(report.phase, WaitPhase::Converged);
        let elapsed = report.elapsed.unwrap();
        assert!(elapsed >= Duration::from_millis(30), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(110), "{elapsed:?}");
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn test_waiter_unbounded_timeout() {
        let bus = LocalBus::new();
        let state = AtomicI32::new(AdapterState::Off.code());

        let wait = Wait::new("enable()", AdapterState::On, Duration::MAX, query(&state))
            .listen(AdapterDecoder, expected_on())
            .trigger(|| {
                bus.publish(&state_changed(AdapterState::TurningOn));
                bus.publish(&state_changed(AdapterState::On));
                state.store(AdapterState::On.code(), Ordering::SeqCst);
                true
            });
        let report = ConvergenceWaiter::new(&bus, POLL).run(wait).unwrap();

        assert_eq!(report.phase, WaitPhase::Converged);
        assert_eq!(report.fired, expected_on());
    }

    #[test]
    fn test_waiter_trigger_rejected() {
        let bus = LocalBus::new();
        let state = AtomicI32::new(AdapterState::Off.code());

        let wait = Wait::new("enable()", AdapterState::On, Duration::from_millis(30), query(&state))
            .listen(AdapterDecoder, expected_on())
            .trigger(|| false);
        let err = ConvergenceWaiter::new(&bus, POLL).run(wait).unwrap_err();

        assert_eq!(
            err,
            ConvergeError::TriggerRejected {
                method: "enable()".into()
            }
        );
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn test_waiter_mid_transition_trusts_polling() {
        let bus = LocalBus::new();
        let state = AtomicI32::new(AdapterState::TurningOn.code());
        let polls = AtomicU32::new(0);
        let triggers = AtomicU32::new(0);

        let sample = || {
            // Reaches the goal on the third sample without any notification.
            if polls.fetch_add(1, Ordering::SeqCst) >= 2 {
                state.store(AdapterState::On.code(), Ordering::SeqCst);
            }
            Observed::from_code(state.load(Ordering::SeqCst), AdapterState::from_code)
        };
        let wait = Wait::new("enable()", AdapterState::On, Duration::from_secs(2), sample)
            .listen(AdapterDecoder, expected_on())
            .on_entry(|s| {
                Ok(match s {
                    AdapterState::TurningOn => Entry::MidTransition,
                    _ => Entry::Trigger,
                })
            })
            .trigger(|| {
                triggers.fetch_add(1, Ordering::SeqCst);
                true
            });
        let report = ConvergenceWaiter::new(&bus, POLL).run(wait).unwrap();

        assert_eq!(report.phase, WaitPhase::Converged);
        assert_eq!(report.expected, Flags::EMPTY);
        assert_eq!(report.elapsed, None);
        assert_eq!(report.summary(), "enable() completed");
        assert_eq!(triggers.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_waiter_protocol_violation_fails_fast() {
        let bus = LocalBus::new();
        let state = AtomicI32::new(AdapterState::Off.code());

        let wait = Wait::new("enable()", AdapterState::On, Duration::from_secs(5), query(&state))
            .listen(AdapterDecoder, expected_on())
            .trigger(|| {
                bus.publish(&Notification::new(adapter::ACTION_STATE_CHANGED).with_int(adapter::EXTRA_STATE, 99));
                true
            });
        let started = Instant::now();
        let err = ConvergenceWaiter::new(&bus, POLL).run(wait).unwrap_err();

        assert!(matches!(err, ConvergeError::Protocol { .. }));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn test_waiter_unknown_entry_state() {
        let bus = LocalBus::new();
        let state = AtomicI32::new(42);

        let wait = Wait::new("enable()", AdapterState::On, Duration::from_millis(30), query(&state))
            .listen(AdapterDecoder, expected_on());
        let err = ConvergenceWaiter::new(&bus, POLL).run(wait).unwrap_err();

        assert_eq!(
            err,
            ConvergeError::UnexpectedState {
                method: "enable()".into(),
                state: 42
            }
        );
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn test_waiter_always_trigger_skips_shortcut() {
        let bus = LocalBus::new();
        let state = AtomicI32::new(AdapterState::On.code());
        let triggers = AtomicU32::new(0);

        let wait = Wait::new("enable()", AdapterState::On, Duration::from_secs(2), query(&state))
            .listen(AdapterDecoder, adapter::DISCOVERY_STARTED)
            .always_trigger()
            .trigger(|| {
                triggers.fetch_add(1, Ordering::SeqCst);
                bus.publish(&Notification::new(adapter::ACTION_DISCOVERY_STARTED));
                true
            });
        let report = ConvergenceWaiter::new(&bus, POLL).run(wait).unwrap();

        assert_eq!(report.phase, WaitPhase::Converged);
        assert_eq!(triggers.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_waiter_verify_failure() {
        let bus = LocalBus::new();
        let state = AtomicI32::new(AdapterState::On.code());

        let wait = Wait::new("enable()", AdapterState::On, Duration::from_millis(30), query(&state))
            .verify(|| Err(ConvergeError::inconsistent("enable()", "views disagree")));
        let err = ConvergenceWaiter::new(&bus, POLL).run(wait).unwrap_err();

        assert!(matches!(err, ConvergeError::Inconsistent { .. }));
    }
}
