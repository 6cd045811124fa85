//! # Clock and Timer
//!
//! Monotonic millisecond time source and the non-blocking delay primitive
//! that every state machine is built on.
//!
//! Nothing here ever sleeps. A [`Timer`] only remembers a starting point;
//! callers poll it on every tick and act once it reports the duration as
//! elapsed.

use std::rc::Rc;
use std::time::Instant;

/// Monotonic millisecond clock
pub trait Clock {
    /// Milliseconds since an arbitrary, fixed origin
    fn now_ms(&self) -> u64;
}

/// Shared handle to the clock used by all machines of one application
pub type ClockHandle = Rc<dyn Clock>;

/// Clock backed by [`std::time::Instant`]
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Creates a clock whose origin is the moment of construction.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Convenience constructor returning a shareable handle.
    #[must_use]
    pub fn handle() -> ClockHandle {
        Rc::new(Self::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Non-blocking delay timer
///
/// Holds a starting point and an arming flag:
///
/// - [`is_elapsed`](Timer::is_elapsed) compares against the starting point and
///   never changes it, so it can be polled repeatedly.
/// - [`wait_elapsed`](Timer::wait_elapsed) arms itself on the first call,
///   fires once, then re-arms on the call after that.
/// - [`reset`](Timer::reset) rebases the starting point to now and disarms.
pub struct Timer {
    clock: ClockHandle,
    started_at: u64,
    armed: bool,
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("started_at", &self.started_at)
            .field("armed", &self.armed)
            .finish_non_exhaustive()
    }
}

impl Timer {
    /// Creates a disarmed timer starting now.
    pub fn new(clock: ClockHandle) -> Self {
        let started_at = clock.now_ms();
        Self {
            clock,
            started_at,
            armed: false,
        }
    }

    /// Current time from the underlying clock.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Milliseconds since the starting point.
    pub fn elapsed_ms(&self) -> u64 {
        self.now_ms().saturating_sub(self.started_at)
    }

    /// Returns true iff at least `duration_ms` passed since the starting point.
    pub fn is_elapsed(&self, duration_ms: u64) -> bool {
        self.elapsed_ms() >= duration_ms
    }

    /// One-shot delay.
    ///
    /// The first call after a reset (or after firing) arms the timer at the
    /// current time and returns false. Later calls return false until
    /// `duration_ms` has passed, then return true exactly once.
    pub fn wait_elapsed(&mut self, duration_ms: u64) -> bool {
        if !self.armed {
            self.started_at = self.now_ms();
            self.armed = true;
            return false;
        }

        if self.is_elapsed(duration_ms) {
            self.armed = false;
            return true;
        }

        false
    }

    /// Rebases the starting point to now and disarms `wait_elapsed`.
    pub fn reset(&mut self) {
        self.started_at = self.now_ms();
        self.armed = false;
    }

    /// Whether a `wait_elapsed` delay is currently running.
    pub fn is_armed(&self) -> bool {
        self.armed
    }
}
