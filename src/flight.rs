//! Single-flight execution guard.
//!
//! A live camera produces frames faster than a detection pass may complete. Instead of queueing
//! frames, callers try to claim a [`SingleFlight`] before starting a pass and drop the frame if
//! another pass is still running.

use std::sync::atomic::{AtomicBool, Ordering};

/// Allows at most one operation to be in progress at a time.
#[derive(Debug, Default)]
pub struct SingleFlight {
    busy: AtomicBool,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to start an operation.
    ///
    /// Returns [`None`] without blocking if an operation is already in flight. Otherwise, the
    /// returned guard keeps the flight claimed until it is dropped (also when unwinding).
    pub fn try_begin(&self) -> Option<FlightGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| FlightGuard { flight: self })
    }

    /// Returns whether an operation is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Guard returned by [`SingleFlight::try_begin`]. Ends the flight when dropped.
#[must_use = "the flight ends as soon as the guard is dropped"]
#[derive(Debug)]
pub struct FlightGuard<'a> {
    flight: &'a SingleFlight,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.flight.busy.store(false, Ordering::Release);
    }
}
