//! Single-flight guard.
//!
//! Lets at most one caller run a section at a time; concurrent callers are
//! turned away instead of queued.

use std::sync::atomic::{AtomicBool, Ordering};

/// A latch that admits one flight at a time.
#[derive(Debug, Default)]
pub struct SingleFlight {
    running: AtomicBool,
}

impl SingleFlight {
    pub const fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
        }
    }

    /// Try to start a flight. Returns `None` when one is already running.
    ///
    /// The flight ends when the returned guard is dropped, including on
    /// early return and unwind.
    pub fn try_begin(&self) -> Option<FlightGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard { flight: self })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Marks a running flight; clears the latch on drop.
#[derive(Debug)]
pub struct FlightGuard<'a> {
    flight: &'a SingleFlight,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.flight.running.store(false, Ordering::Release);
    }
}
