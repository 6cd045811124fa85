//! # State Machine Module
//!
//! Generic state holder shared by every layer of the modem engine.
//!
//! A [`StateMachine`] stores the current and previous state, the time of the
//! last real transition, a non-blocking [`Timer`] and an optional guard
//! predicate. Machines never block: every method returns immediately and is
//! safe to call on every tick, whether or not its conditions are met.
//!
//! ## Guards
//!
//! A guard is a closure consulted by [`StateMachine::request_transition`].
//! When it returns false the request is ignored. Guards usually observe
//! another machine through a [`StateWatch`]:
//!
//! ```
//! use modem_telemetry::fsm::{StateMachine, SystemClock};
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! enum Lock { Free, Busy }
//!
//! let clock = SystemClock::handle();
//! let lock = StateMachine::new("lock", Lock::Busy, clock.clone());
//! let watch = lock.state_watch();
//!
//! let mut phase = StateMachine::new("phase", 0u8, clock)
//!     .with_guard(move || watch.get() == Lock::Free);
//!
//! assert!(!phase.request_transition(1));
//! assert_eq!(phase.state(), 0);
//! ```

pub mod timer;

pub use timer::{Clock, ClockHandle, SystemClock, Timer};

use std::cell::Cell;
use std::fmt::Debug;
use std::rc::Rc;
use tracing::debug;

/// Guard predicate consulted before every transition
pub type Guard = Box<dyn Fn() -> bool>;

/// Read-only view of another machine's current state
#[derive(Debug, Clone)]
pub struct StateWatch<S: Copy> {
    current: Rc<Cell<S>>,
}

impl<S: Copy> StateWatch<S> {
    /// Current state of the watched machine.
    pub fn get(&self) -> S {
        self.current.get()
    }
}

/// Guarded state holder with an embedded non-blocking timer
pub struct StateMachine<S: Copy + Eq + Debug> {
    name: &'static str,
    current: Rc<Cell<S>>,
    previous: S,
    last_transition_ms: u64,
    timer: Timer,
    guard: Option<Guard>,
}

impl<S: Copy + Eq + Debug> Debug for StateMachine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("name", &self.name)
            .field("current", &self.current.get())
            .field("previous", &self.previous)
            .field("last_transition_ms", &self.last_transition_ms)
            .field("timer", &self.timer)
            .field("guarded", &self.guard.is_some())
            .finish()
    }
}

impl<S: Copy + Eq + Debug> StateMachine<S> {
    /// Creates an unguarded machine in `initial` state.
    pub fn new(name: &'static str, initial: S, clock: ClockHandle) -> Self {
        let timer = Timer::new(clock);
        let now = timer.now_ms();
        Self {
            name,
            current: Rc::new(Cell::new(initial)),
            previous: initial,
            last_transition_ms: now,
            timer,
            guard: None,
        }
    }

    /// Installs a guard predicate (builder style).
    #[must_use]
    pub fn with_guard<F>(mut self, guard: F) -> Self
    where
        F: Fn() -> bool + 'static,
    {
        self.guard = Some(Box::new(guard));
        self
    }

    /// Machine name used in log messages.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Current state.
    pub fn state(&self) -> S {
        self.current.get()
    }

    /// State before the last real transition.
    pub fn previous(&self) -> S {
        self.previous
    }

    /// Clock time of the last real transition.
    pub fn last_transition_ms(&self) -> u64 {
        self.last_transition_ms
    }

    /// Milliseconds spent in the current state.
    pub fn time_in_state_ms(&self) -> u64 {
        self.timer.now_ms().saturating_sub(self.last_transition_ms)
    }

    /// Shareable read-only view of the current state.
    pub fn state_watch(&self) -> StateWatch<S> {
        StateWatch {
            current: Rc::clone(&self.current),
        }
    }

    /// Requests a transition to `target`.
    ///
    /// Returns false (and changes nothing) when the guard rejects the
    /// request. Requesting the current state passes the guard but leaves
    /// `previous` and the transition timestamp untouched.
    pub fn request_transition(&mut self, target: S) -> bool {
        if let Some(guard) = &self.guard {
            if !guard() {
                return false;
            }
        }

        let current = self.current.get();
        if target != current {
            debug!("[{}] {:?} -> {:?}", self.name, current, target);
            self.previous = current;
            self.current.set(target);
            self.last_transition_ms = self.timer.now_ms();
        }

        true
    }

    /// See [`Timer::is_elapsed`].
    pub fn is_elapsed(&self, duration_ms: u64) -> bool {
        self.timer.is_elapsed(duration_ms)
    }

    /// See [`Timer::wait_elapsed`].
    pub fn wait_elapsed(&mut self, duration_ms: u64) -> bool {
        self.timer.wait_elapsed(duration_ms)
    }

    /// See [`Timer::reset`].
    pub fn reset_timer(&mut self) {
        self.timer.reset();
    }

    /// Current clock time.
    pub fn now_ms(&self) -> u64 {
        self.timer.now_ms()
    }
}
