//! Timed polling loop with cooperative cancellation.
//!
//! Scanner workers and pump workers share the same shape: run one cycle,
//! wait out the remainder of the interval, repeat. The wait is interruptible
//! so shutdown never has to sit through an idle interval.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Cancellation token with "signal once, observe many" semantics.
///
/// Clones share state. Once requested, a stop can never be withdrawn.
#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

#[derive(Debug, Default)]
struct StopInner {
    requested: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop and wake every waiter.
    pub fn request(&self) {
        let mut requested = self
            .inner
            .requested
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *requested = true;
        self.inner.cond.notify_all();
    }

    pub fn is_requested(&self) -> bool {
        *self
            .inner
            .requested
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Block for up to `timeout`, returning early when a stop is requested.
    ///
    /// Returns `true` if a stop was requested before or during the wait.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut requested = self
            .inner
            .requested
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while !*requested {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .inner
                .cond
                .wait_timeout(requested, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            requested = guard;
        }
        true
    }
}

/// Time left in an interval that started `elapsed` ago. Never negative.
pub fn remaining(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

/// Run `cycle` every `interval` until `stop` is requested.
///
/// The stop flag is checked before each cycle and during the wait that
/// follows it. A cycle already in flight is always allowed to finish.
pub fn run_every<F>(interval: Duration, stop: &StopSignal, mut cycle: F)
where
    F: FnMut(),
{
    while !stop.is_requested() {
        let started = Instant::now();
        cycle();
        if stop.wait_timeout(remaining(interval, started.elapsed())) {
            break;
        }
    }
}
