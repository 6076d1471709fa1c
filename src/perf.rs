//! The perf_event-backed counter facility.
//!
//! Each event in a set gets its own counting descriptor; the set keeps a
//! last-read value per member so `accumulate` yields deltas, which is what
//! the probe layer expects. Descriptors are opened by the thread that owns
//! the set and never leave it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

use counters::{CounterFacility, EventCode, EventSet};
use error::{Error, Result};
use events::{Event, SwEvent};
use fd::{OpenError, PerfEventFile};

pub struct PerfCounters {
    probe_once: Once,
    available: AtomicBool,
}

impl PerfCounters {
    pub fn new() -> PerfCounters {
        PerfCounters {
            probe_once: Once::new(),
            available: AtomicBool::new(false),
        }
    }
}

impl CounterFacility for PerfCounters {
    fn library_init(&self) -> Result<()> {
        // a throwaway software counter is the cheapest way to learn whether
        // this kernel/paranoid-level combination lets us count at all
        self.probe_once.call_once(|| {
            match PerfEventFile::open(Event::Software(SwEvent::CpuClock)) {
                Ok(_) => self.available.store(true, Ordering::SeqCst),
                Err(e) => {
                    debug!("perf availability probe failed: {}", e);
                }
            }
        });
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::EnvironmentUnavailable {
                reason: "perf_event_open is not usable in this environment".to_string(),
            })
        }
    }

    fn thread_register(&self) -> Result<()> {
        // perf_event needs no explicit registration; descriptors are simply
        // opened by the thread that will read them
        Ok(())
    }

    fn thread_unregister(&self) -> Result<()> {
        Ok(())
    }

    fn name_to_event(&self, name: &str) -> Result<EventCode> {
        let event = Event::parse(name)?;
        let (kind, config) = event.type_and_config();
        Ok(EventCode { kind, config })
    }

    fn new_event_set(&self) -> Result<Box<dyn EventSet>> {
        Ok(Box::new(PerfEventSet {
            members: Vec::new(),
        }))
    }
}

struct Member {
    file: PerfEventFile,
    last: u64,
}

pub struct PerfEventSet {
    members: Vec<Member>,
}

impl PerfEventSet {
    fn sample(&mut self, out: &mut [i64]) -> Result<()> {
        for (member, slot) in self.members.iter_mut().zip(out.iter_mut()) {
            let value = member.file.value().map_err(|e| Error::CounterRuntime {
                op: "accumulate",
                detail: format!("reading {}: {}", member.file.event(), e),
            })?;
            *slot += value.wrapping_sub(member.last) as i64;
            member.last = value;
        }
        Ok(())
    }
}

impl EventSet for PerfEventSet {
    fn add_event(&mut self, code: EventCode, name: &str) -> Result<()> {
        let event = rebuild_event(code, name)?;
        match PerfEventFile::open(event) {
            Ok(file) => {
                self.members.push(Member { file, last: 0 });
                Ok(())
            }
            // the first member failing means the event is unusable on this
            // machine; an InvalidEvent on a later member means the kernel
            // refused to schedule it next to the ones already open
            Err(inner) => {
                if self.members.is_empty() {
                    Err(Error::EnvironmentUnavailable {
                        reason: format!("cannot count '{}': {}", name, inner),
                    })
                } else if let OpenError::InvalidEvent = inner {
                    Err(Error::IncompatibleEventCombination {
                        name: name.to_string(),
                        inner,
                    })
                } else {
                    Err(Error::CounterRuntime {
                        op: "add_event",
                        detail: format!("opening '{}': {}", name, inner),
                    })
                }
            }
        }
    }

    fn start(&mut self) -> Result<()> {
        for member in &mut self.members {
            member
                .file
                .reset()
                .and_then(|()| member.file.enable())
                .map_err(|e| Error::CounterRuntime {
                    op: "start",
                    detail: format!("{}", e),
                })?;
            member.last = 0;
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        for member in &mut self.members {
            member.file.reset().map_err(|e| Error::CounterRuntime {
                op: "reset",
                detail: format!("{}", e),
            })?;
            member.last = 0;
        }
        Ok(())
    }

    fn accumulate(&mut self, out: &mut [i64]) -> Result<()> {
        self.sample(out)
    }

    fn stop(&mut self, out: &mut [i64]) -> Result<()> {
        self.sample(out)?;
        for member in &self.members {
            member.file.disable().map_err(|e| Error::CounterRuntime {
                op: "stop",
                detail: format!("{}", e),
            })?;
        }
        Ok(())
    }

    fn cleanup(&mut self) -> Result<()> {
        // descriptors close on drop
        for member in &self.members {
            let _ = member.file.disable();
        }
        self.members.clear();
        Ok(())
    }
}

/// An `EventCode` from this facility is a packed `(type, config)` pair;
/// anything else wandered in from another facility.
fn rebuild_event(code: EventCode, name: &str) -> Result<Event> {
    let event = Event::parse(name)?;
    let (kind, config) = event.type_and_config();
    if kind != code.kind || config != code.config {
        return Err(Error::CounterRuntime {
            op: "add_event",
            detail: format!("event code for '{}' came from a different facility", name),
        });
    }
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use counters::CounterFacility;

    #[test]
    fn name_resolution_round_trips_through_codes() {
        let facility = PerfCounters::new();
        let code = facility.name_to_event("PAPI_TOT_CYC").unwrap();
        let direct = facility.name_to_event("cpu-cycles").unwrap();
        assert_eq!(code, direct);
    }

    #[test]
    fn unknown_event_names_fail_resolution() {
        let facility = PerfCounters::new();
        assert!(facility.name_to_event("not-a-counter").is_err());
    }

    // counting against live hardware is covered by ignored smoke tests so
    // that sandboxed CI (perf_event_paranoid, containers) stays green
    #[test]
    #[ignore]
    fn software_clock_ticks_when_counting_is_allowed() {
        let facility = PerfCounters::new();
        facility.library_init().unwrap();
        let code = facility.name_to_event("cpu-clock").unwrap();
        let mut set = facility.new_event_set().unwrap();
        set.add_event(code, "cpu-clock").unwrap();
        set.start().unwrap();
        let mut spin = 0u64;
        for i in 0..1_000_000u64 {
            spin = spin.wrapping_add(i);
        }
        let mut values = vec![0i64; 1];
        set.stop(&mut values).unwrap();
        assert!(spin > 0);
        assert!(values[0] > 0);
    }
}
