//! Per-category wall-clock and hardware-counter measurement for parallel
//! jobs, aggregated into a single relational store.
//!
//! Applications name a *profile* (a bundle of work *categories* and counter
//! *events*), hand every worker thread a [`Probe`], and bracket their work
//! with `start`/`accumulate`/`stop`. At a synchronisation point the
//! per-thread records go through [`add_run_data`], which files one value
//! row per (process, thread, category, event) under a freshly allocated
//! run id; `finalize` writes the store back to disk. Repeat runs append,
//! never overwrite.
//!
//! The moving parts (wall clock, counter facility, collective runtime,
//! persistence) are capability traits with real, disabled and mock
//! implementations, picked per [`Config`]. The crate never starts itself:
//! the collective runtime must be up before [`init`] and the lifecycle is
//! explicit.

#[macro_use]
extern crate bitflags;
extern crate crossbeam_channel;
extern crate failure;
#[macro_use]
extern crate failure_derive;
extern crate libc;
#[macro_use]
extern crate log;
#[macro_use]
extern crate nix;
#[macro_use]
extern crate rusqlite;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate strum;
#[macro_use]
extern crate strum_macros;

#[cfg(test)]
#[macro_use]
extern crate pretty_assertions;
#[cfg(test)]
extern crate rand;
#[cfg(test)]
extern crate tempfile;

/// The one diagnostic shape this crate emits for non-fatal trouble:
/// `Perfoscope error (<file>, <line>): <message>`.
macro_rules! diag {
    ($($arg:tt)*) => {
        error!("Perfoscope error ({}, {}): {}", file!(), line!(), format_args!($($arg)*))
    };
}

pub mod clock;
pub mod collective;
pub mod counters;
pub mod error;
pub mod events;
pub mod fd;
pub mod perf;
pub mod probe;
pub mod profile;
pub mod session;
pub mod store;
pub mod sys;

pub use clock::{Clock, DisabledClock, ManualClock, MonotonicClock, Timestamp};
pub use collective::{ChannelWorld, Collective, SingleProcess, OWNER_RANK};
pub use counters::{CounterFacility, EventCode, EventSet, MockCounters, NullCounters};
pub use error::{Error, Result};
pub use events::Event;
pub use perf::PerfCounters;
pub use probe::{Probe, ProbeData};
pub use profile::ProfileSpec;
pub use session::{Config, Session, UNSET_PROBLEM_SIZE};
pub use store::Sample;

use std::sync::{Mutex, MutexGuard};

enum Facade {
    Uninitialised,
    Active(Session),
    Finalised,
}

static FACADE: Mutex<Facade> = Mutex::new(Facade::Uninitialised);

fn facade() -> MutexGuard<'static, Facade> {
    match FACADE.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Process-wide, collective setup. A second call while initialised is a
/// no-op; after [`finalize`] a new lifecycle may begin.
pub fn init(config: Config) -> Result<()> {
    let mut state = facade();
    match *state {
        Facade::Active(_) => Ok(()),
        _ => {
            *state = Facade::Active(Session::create(config)?);
            Ok(())
        }
    }
}

/// A probe for one worker thread, cloned off the process-wide template.
pub fn probe(thread_id: usize) -> Result<Probe> {
    let state = facade();
    match *state {
        Facade::Active(ref session) => Ok(session.probe(thread_id)),
        Facade::Uninitialised => Err(Error::Uninitialised {
            op: "create a probe",
        }),
        Facade::Finalised => Err(Error::Finalised {
            op: "create a probe",
        }),
    }
}

/// Collective. Files one run's worth of per-thread records. A no-op
/// before [`init`]; an error after [`finalize`].
pub fn add_run_data(states: &[ProbeData], problem_size: i64) -> Result<()> {
    let mut state = facade();
    match *state {
        Facade::Active(ref mut session) => session.add_run_data(states, problem_size),
        Facade::Uninitialised => Ok(()),
        Facade::Finalised => Err(Error::Finalised {
            op: "add run data",
        }),
    }
}

/// Collective. Writes the store back and tears the session down. A no-op
/// before [`init`].
pub fn finalize() -> Result<()> {
    let mut state = facade();
    match ::std::mem::replace(&mut *state, Facade::Finalised) {
        Facade::Active(session) => session.finalize(),
        Facade::Uninitialised => {
            *state = Facade::Uninitialised;
            Ok(())
        }
        Facade::Finalised => Ok(()),
    }
}
