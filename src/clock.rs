//! Monotonic wall-clock reads and nanosecond-correct differencing.

use std::io;
use std::sync::{Arc, Mutex};

use libc::{clock_gettime, timespec, CLOCK_MONOTONIC};

pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// A raw monotonic clock reading. Only meaningful relative to other
/// timestamps taken from the same clock.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct Timestamp {
    pub sec: i64,
    pub nsec: i64,
}

impl Timestamp {
    pub fn zero() -> Timestamp {
        Timestamp { sec: 0, nsec: 0 }
    }

    pub fn from_nanos(nanos: i64) -> Timestamp {
        Timestamp {
            sec: nanos / NANOS_PER_SEC,
            nsec: nanos % NANOS_PER_SEC,
        }
    }
}

/// `end - start` in seconds. Borrows a whole second when the nanosecond
/// field underflows, so the arithmetic never loses more than the final
/// float rounding.
pub fn delta(end: Timestamp, start: Timestamp) -> f64 {
    let (sec, nsec) = if end.nsec - start.nsec < 0 {
        (end.sec - start.sec - 1, end.nsec - start.nsec + NANOS_PER_SEC)
    } else {
        (end.sec - start.sec, end.nsec - start.nsec)
    };
    sec as f64 + nsec as f64 * 1e-9
}

/// Wall-clock capability. `enabled` decides whether the synthetic `"time"`
/// event exists in the store; probes call `now` regardless and a disabled
/// clock hands back zeros.
pub trait Clock: Send + Sync {
    fn enabled(&self) -> bool {
        true
    }

    fn now(&self) -> Timestamp;
}

/// CLOCK_MONOTONIC via libc.
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        let mut ts = timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // clock_gettime only fails for a bad clock id or pointer; if the
        // monotonic clock is gone there is nothing sensible to measure.
        let rc = unsafe { clock_gettime(CLOCK_MONOTONIC, &mut ts) };
        if rc != 0 {
            panic!(
                "clock_gettime(CLOCK_MONOTONIC) failed: {}",
                io::Error::last_os_error()
            );
        }
        Timestamp {
            sec: ts.tv_sec as i64,
            nsec: ts.tv_nsec as i64,
        }
    }
}

/// Wall-clock measurement switched off. No `"time"` event, zero deltas.
pub struct DisabledClock;

impl Clock for DisabledClock {
    fn enabled(&self) -> bool {
        false
    }

    fn now(&self) -> Timestamp {
        Timestamp::zero()
    }
}

/// A clock the caller winds by hand. Cloned handles share the same state,
/// so a test can hold one half and advance it while a probe reads the
/// other.
#[derive(Clone)]
pub struct ManualClock {
    current: Arc<Mutex<Timestamp>>,
}

impl ManualClock {
    pub fn new() -> ManualClock {
        ManualClock {
            current: Arc::new(Mutex::new(Timestamp::zero())),
        }
    }

    pub fn set(&self, ts: Timestamp) {
        let mut current = lock_disregarding_poison(&self.current);
        *current = ts;
    }

    pub fn advance_nanos(&self, nanos: i64) {
        let mut current = lock_disregarding_poison(&self.current);
        let total = current.sec * NANOS_PER_SEC + current.nsec + nanos;
        *current = Timestamp::from_nanos(total);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *lock_disregarding_poison(&self.current)
    }
}

fn lock_disregarding_poison(m: &Mutex<Timestamp>) -> ::std::sync::MutexGuard<Timestamp> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
