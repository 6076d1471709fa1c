//! The hardware-counter capability and its interchangeable facilities.
//!
//! A `CounterFacility` is process-global and hands out thread-affine
//! `EventSet`s; every set operation must run on the thread that created the
//! set. The real perf_event facility lives in `perf`; this module holds the
//! traits plus the disabled and mock facilities.

use std::sync::Mutex;

use error::{Error, Result};

/// Opaque per-process binding of a named event to a facility-internal id.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EventCode {
    pub(crate) kind: u32,
    pub(crate) config: u64,
}

pub trait CounterFacility: Send + Sync {
    /// Whether this facility actually counts. Disabled facilities make the
    /// session drop the profile's event list entirely.
    fn enabled(&self) -> bool {
        true
    }

    /// Process-wide one-shot; idempotent. Fails when the machine cannot
    /// count at all.
    fn library_init(&self) -> Result<()>;

    /// Must run on the thread that will own an event set.
    fn thread_register(&self) -> Result<()>;

    fn thread_unregister(&self) -> Result<()>;

    fn name_to_event(&self, name: &str) -> Result<EventCode>;

    fn new_event_set(&self) -> Result<Box<dyn EventSet>>;
}

/// A running collection of counters. `accumulate` adds the deltas since
/// the last start-or-sample into the caller's buffer and leaves the set
/// counting; `stop` takes one final sample and halts it.
///
/// Sets are `Send` so a freshly-created probe can move to its worker
/// thread, but once `init` has run there the set must stay put: the
/// descriptors are bound to the thread that opened them.
pub trait EventSet: Send {
    fn add_event(&mut self, code: EventCode, name: &str) -> Result<()>;

    fn start(&mut self) -> Result<()>;

    fn reset(&mut self) -> Result<()>;

    fn accumulate(&mut self, out: &mut [i64]) -> Result<()>;

    fn stop(&mut self, out: &mut [i64]) -> Result<()>;

    fn cleanup(&mut self) -> Result<()>;
}

/// Hardware counting switched off.
pub struct NullCounters;

impl CounterFacility for NullCounters {
    fn enabled(&self) -> bool {
        false
    }

    fn library_init(&self) -> Result<()> {
        Ok(())
    }

    fn thread_register(&self) -> Result<()> {
        Ok(())
    }

    fn thread_unregister(&self) -> Result<()> {
        Ok(())
    }

    fn name_to_event(&self, _name: &str) -> Result<EventCode> {
        Ok(EventCode {
            kind: NULL_KIND,
            config: 0,
        })
    }

    fn new_event_set(&self) -> Result<Box<dyn EventSet>> {
        Ok(Box::new(NullEventSet))
    }
}

struct NullEventSet;

impl EventSet for NullEventSet {
    fn add_event(&mut self, _code: EventCode, _name: &str) -> Result<()> {
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        Ok(())
    }

    fn accumulate(&mut self, _out: &mut [i64]) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self, _out: &mut [i64]) -> Result<()> {
        Ok(())
    }

    fn cleanup(&mut self) -> Result<()> {
        Ok(())
    }
}

const NULL_KIND: u32 = !0;
const MOCK_KIND: u32 = !1;

/// Deterministic stand-in for the hardware. Resolves any name; each sample
/// adds a fixed per-event increment, so tests can predict every value.
pub struct MockCounters {
    increments: Vec<i64>,
    names: Mutex<Vec<String>>,
}

impl MockCounters {
    /// Event `i` gains `(i + 1) * 1000` per sample.
    pub fn new() -> MockCounters {
        MockCounters {
            increments: Vec::new(),
            names: Mutex::new(Vec::new()),
        }
    }

    /// Event `i` gains `increments[i]` per sample (falling back to the
    /// default when the list is short).
    pub fn with_increments(increments: Vec<i64>) -> MockCounters {
        MockCounters {
            increments,
            names: Mutex::new(Vec::new()),
        }
    }
}

impl CounterFacility for MockCounters {
    fn library_init(&self) -> Result<()> {
        Ok(())
    }

    fn thread_register(&self) -> Result<()> {
        Ok(())
    }

    fn thread_unregister(&self) -> Result<()> {
        Ok(())
    }

    fn name_to_event(&self, name: &str) -> Result<EventCode> {
        let mut names = match self.names.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let index = match names.iter().position(|n| n == name) {
            Some(index) => index,
            None => {
                names.push(name.to_string());
                names.len() - 1
            }
        };
        Ok(EventCode {
            kind: MOCK_KIND,
            config: index as u64,
        })
    }

    fn new_event_set(&self) -> Result<Box<dyn EventSet>> {
        Ok(Box::new(MockEventSet {
            increments: self.increments.clone(),
            steps: Vec::new(),
            running: false,
        }))
    }
}

struct MockEventSet {
    increments: Vec<i64>,
    steps: Vec<i64>,
    running: bool,
}

impl EventSet for MockEventSet {
    fn add_event(&mut self, code: EventCode, _name: &str) -> Result<()> {
        // the per-event step is frozen into the set so the facility can be
        // dropped while sets are live, as with real descriptors
        let index = code.config as usize;
        let step = match self.increments.get(index) {
            Some(step) => *step,
            None => (index as i64 + 1) * 1000,
        };
        self.steps.push(step);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.running = true;
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        Ok(())
    }

    fn accumulate(&mut self, out: &mut [i64]) -> Result<()> {
        if !self.running {
            return Err(Error::CounterRuntime {
                op: "accumulate",
                detail: "mock event set is not running".to_string(),
            });
        }
        for (slot, step) in out.iter_mut().zip(self.steps.iter()) {
            *slot += *step;
        }
        Ok(())
    }

    fn stop(&mut self, out: &mut [i64]) -> Result<()> {
        self.accumulate(out)?;
        self.running = false;
        Ok(())
    }

    fn cleanup(&mut self) -> Result<()> {
        self.running = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_resolves_any_name_to_stable_codes() {
        let mock = MockCounters::new();
        let a = mock.name_to_event("anything").unwrap();
        let b = mock.name_to_event("anything-else").unwrap();
        let a_again = mock.name_to_event("anything").unwrap();
        assert_eq!(a, a_again);
        assert_ne!(a, b);
    }

    #[test]
    fn mock_set_accumulates_fixed_steps() {
        let mock = MockCounters::new();
        let a = mock.name_to_event("a").unwrap();
        let b = mock.name_to_event("b").unwrap();
        let mut set = mock.new_event_set().unwrap();
        set.add_event(a, "a").unwrap();
        set.add_event(b, "b").unwrap();

        let mut values = vec![0i64; 2];
        set.start().unwrap();
        set.accumulate(&mut values).unwrap();
        set.accumulate(&mut values).unwrap();
        set.stop(&mut values).unwrap();
        assert_eq!(values, vec![3000, 6000]);
    }

    #[test]
    fn mock_set_refuses_samples_while_stopped() {
        let mock = MockCounters::new();
        let code = mock.name_to_event("a").unwrap();
        let mut set = mock.new_event_set().unwrap();
        set.add_event(code, "a").unwrap();

        let mut values = vec![0i64; 1];
        assert!(set.accumulate(&mut values).is_err());
    }

    #[test]
    fn null_facility_reports_disabled() {
        assert!(!NullCounters.enabled());
        assert!(NullCounters.library_init().is_ok());
    }
}
