//! The per-rank measurement engine.
//!
//! A `Session` is one rank's view of a job: the agreed profile, the
//! capability implementations picked at construction, and (on the owner
//! rank only) the staging store. `Session::create`, `add_run_data` and
//! `finalize` are collective; every rank must call them in the same order.

use std::sync::Arc;

use clock::{Clock, MonotonicClock};
use collective::{negotiate_profile, Collective, SingleProcess, OWNER_RANK};
use counters::{CounterFacility, EventCode};
use error::{Error, Result};
use perf::PerfCounters;
use probe::{Probe, ProbeData};
use profile::ProfileSpec;
use store::{Sample, StagingDb, TIME_EVENT};

const COUNTER_TAG: u32 = 0;
const TIME_TAG: u32 = 1;

/// Conventional problem size for runs that have no meaningful size.
pub const UNSET_PROBLEM_SIZE: i64 = -1;

/// Everything `Session::create` needs. The capability fields select an
/// implementation per concern (real, disabled or mock) instead of
/// compile-time switches.
pub struct Config {
    pub profile: String,
    pub categories: Vec<String>,
    pub events: Vec<String>,
    pub db_path: String,
    pub db_vfs: String,
    pub persistence: bool,
    pub clock: Arc<dyn Clock>,
    pub counters: Arc<dyn CounterFacility>,
    pub collective: Arc<dyn Collective>,
}

impl Config {
    /// Defaults: monotonic wall-clock, perf-backed counters, single
    /// process, persisted to `perf.db` through the `unix-none` VFS (no
    /// file locking, which networked filesystems tend to get wrong).
    pub fn new(profile: &str) -> Config {
        Config {
            profile: profile.to_string(),
            categories: Vec::new(),
            events: Vec::new(),
            db_path: "perf.db".to_string(),
            db_vfs: "unix-none".to_string(),
            persistence: true,
            clock: Arc::new(MonotonicClock),
            counters: Arc::new(PerfCounters::new()),
            collective: Arc::new(SingleProcess),
        }
    }

    pub fn categories(mut self, categories: &[&str]) -> Config {
        self.categories = categories.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn events(mut self, events: &[&str]) -> Config {
        self.events = events.iter().map(|e| e.to_string()).collect();
        self
    }

    pub fn db_path(mut self, path: &str) -> Config {
        self.db_path = path.to_string();
        self
    }

    pub fn db_vfs(mut self, vfs: &str) -> Config {
        self.db_vfs = vfs.to_string();
        self
    }

    /// With persistence off there is no staging store and `add_run_data`
    /// quietly does nothing.
    pub fn persistence(mut self, on: bool) -> Config {
        self.persistence = on;
        self
    }

    pub fn wall_clock(mut self, clock: Arc<dyn Clock>) -> Config {
        self.clock = clock;
        self
    }

    pub fn counters(mut self, counters: Arc<dyn CounterFacility>) -> Config {
        self.counters = counters;
        self
    }

    pub fn collective(mut self, collective: Arc<dyn Collective>) -> Config {
        self.collective = collective;
        self
    }
}

pub struct Session {
    spec: ProfileSpec,
    codes: Vec<EventCode>,
    clock: Arc<dyn Clock>,
    counters: Arc<dyn CounterFacility>,
    collective: Arc<dyn Collective>,
    db: Option<StagingDb>,
    db_path: String,
    db_vfs: String,
    persistence: bool,
    modified: bool,
}

impl Session {
    /// Collective. Verifies the environment and the profile shape on every
    /// rank, then loads the staging store on the owner.
    pub fn create(config: Config) -> Result<Session> {
        let Config {
            profile,
            categories,
            events,
            db_path,
            db_vfs,
            persistence,
            clock,
            counters,
            collective,
        } = config;

        let category_refs: Vec<&str> = categories.iter().map(|c| c.as_str()).collect();
        let event_refs: Vec<&str> = events.iter().map(|e| e.as_str()).collect();
        let spec = all_good(
            &*collective,
            ProfileSpec::new(&profile, &category_refs, &event_refs),
            "constructing the profile",
        )?;

        all_good(
            &*collective,
            counters.library_init(),
            "initialising the counter facility",
        )?;

        // a disabled facility means the event names go unused everywhere,
        // including the store
        let spec = if counters.enabled() {
            spec
        } else {
            spec.without_events()
        };

        let codes = all_good(
            &*collective,
            spec.events()
                .iter()
                .map(|name| counters.name_to_event(name))
                .collect::<Result<Vec<EventCode>>>(),
            "resolving events",
        )?;

        negotiate_profile(&*collective, &spec)?;

        let mut db = None;
        if persistence {
            let local = if collective.rank() == OWNER_RANK {
                StagingDb::open_in_memory().map(|staging| {
                    db = Some(staging);
                })
            } else {
                Ok(())
            };
            all_good(&*collective, local, "opening the staging store")?;

            let local = match db {
                Some(ref mut staging) => staging.load(&db_path, &db_vfs),
                None => Ok(()),
            };
            all_good(&*collective, local, "loading the store")?;

            let local = match db {
                Some(ref staging) => staging
                    .create_schema()
                    .and_then(|()| staging.register_profile(&spec, clock.enabled()))
                    .and_then(|()| staging.prepare_hot_statements()),
                None => Ok(()),
            };
            all_good(&*collective, local, "registering the profile")?;
        }

        Ok(Session {
            spec,
            codes,
            clock,
            counters,
            collective,
            db,
            db_path,
            db_vfs,
            persistence,
            modified: false,
        })
    }

    pub fn spec(&self) -> &ProfileSpec {
        &self.spec
    }

    pub fn rank(&self) -> usize {
        self.collective.rank()
    }

    pub fn is_owner(&self) -> bool {
        self.collective.rank() == OWNER_RANK
    }

    /// A fresh zeroed record for one worker thread, cloned off the
    /// negotiated template.
    pub fn probe_data(&self, thread_id: usize) -> ProbeData {
        ProbeData::from_template(self.spec.clone(), self.codes.clone(), thread_id)
    }

    /// A probe for one worker thread. Hand it to the thread before `init`;
    /// after that it must stay put.
    pub fn probe(&self, thread_id: usize) -> Probe {
        Probe::new(
            self.probe_data(thread_id),
            self.counters.clone(),
            self.clock.clone(),
        )
    }

    /// Collective. Allocates one run for `(profile, problem_size)` and
    /// files every rank's records under it. All ranks must pass lists of
    /// the same length, aligned by thread index. Pass
    /// [`UNSET_PROBLEM_SIZE`] when the run has no meaningful size.
    pub fn add_run_data(&mut self, states: &[ProbeData], problem_size: i64) -> Result<()> {
        if !self.persistence {
            return Ok(());
        }
        if states.is_empty() {
            return Ok(());
        }

        let local = match self.db {
            Some(ref db) => db.create_new_run(states[0].profile().name(), problem_size),
            None => Ok(0),
        };
        let run_id = all_good(&*self.collective, local, "creating a run")?;
        self.modified = true;

        let mut deferred: Option<Error> = None;
        for state in states {
            if let Err(e) = self.add_probe_data(state, run_id) {
                // keep draining peer buffers so nobody is left mid-send;
                // the first failure is reported once the run is through
                diag!(
                    "could not file run data for thread {}: {}",
                    state.thread_id(),
                    e
                );
                if deferred.is_none() {
                    deferred = Some(e);
                }
            }
        }
        match deferred {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// One record's worth of traffic: the owner inserts its own buffers
    /// directly and receives everyone else's in ascending rank order;
    /// non-owners send counters then times.
    fn add_probe_data(&self, state: &ProbeData, run_id: i64) -> Result<()> {
        let (counter_buf, time_buf) = state.pack();

        if self.collective.rank() == OWNER_RANK {
            let mut deferred: Option<Error> = None;
            if let Err(e) = self.insert_rank(OWNER_RANK, state, run_id, &counter_buf, &time_buf) {
                deferred = Some(e);
            }
            for peer in 0..self.collective.size() {
                if peer == OWNER_RANK {
                    continue;
                }
                let ints = self
                    .collective
                    .recv_i64s(peer, COUNTER_TAG, counter_buf.len())?;
                let floats = self.collective.recv_f64s(peer, TIME_TAG, time_buf.len())?;
                if let Err(e) = self.insert_rank(peer, state, run_id, &ints, &floats) {
                    diag!("could not insert run data from rank {}: {}", peer, e);
                    if deferred.is_none() {
                        deferred = Some(e);
                    }
                }
            }
            match deferred {
                Some(e) => Err(e),
                None => Ok(()),
            }
        } else {
            self.collective
                .send_i64s(OWNER_RANK, COUNTER_TAG, &counter_buf)?;
            self.collective.send_f64s(OWNER_RANK, TIME_TAG, &time_buf)?;
            Ok(())
        }
    }

    /// One `perf_value` row per (category, event), plus the wall-clock row
    /// per category when time is measured. `proc_id` is the sending rank;
    /// names and thread id come from the owner's aligned record.
    fn insert_rank(
        &self,
        proc_id: usize,
        state: &ProbeData,
        run_id: i64,
        counter_buf: &[i64],
        time_buf: &[f64],
    ) -> Result<()> {
        let db = match self.db {
            Some(ref db) => db,
            None => {
                return Err(Error::Collective {
                    detail: "only the owner rank holds the staging store".to_string(),
                })
            }
        };
        let profile = state.profile();
        let mut cvi = 0;
        for (ci, category) in profile.categories().iter().enumerate() {
            for event in profile.events() {
                db.insert_value(
                    proc_id as i64,
                    state.thread_id() as i64,
                    profile.name(),
                    category,
                    event,
                    run_id,
                    Sample::Counter(counter_buf[cvi]),
                )?;
                cvi += 1;
            }
            if self.clock.enabled() {
                db.insert_value(
                    proc_id as i64,
                    state.thread_id() as i64,
                    profile.name(),
                    category,
                    TIME_EVENT,
                    run_id,
                    Sample::Time(time_buf[ci]),
                )?;
            }
        }
        Ok(())
    }

    /// Collective. Writes the staging store back to disk if anything
    /// changed; a failed write is diagnosed but does not fail the job,
    /// since the measurements are already lost either way.
    pub fn finalize(mut self) -> Result<()> {
        let mut store_ok = true;
        if let Some(db) = self.db.take() {
            if self.modified {
                if let Err(e) = db.store(&self.db_path, &self.db_vfs) {
                    diag!("could not write performance data to '{}': {}", self.db_path, e);
                    store_ok = false;
                }
            } else {
                diag!("skipping writing of performance data since there is no modified data");
            }
        }

        if self.persistence {
            match self.collective.agree(store_ok) {
                Ok(true) => (),
                Ok(false) => warn!("the owner rank could not write the store"),
                Err(e) => warn!("finalize rendezvous failed: {}", e),
            }
        }
        Ok(())
    }
}

/// Folds one rank's local outcome into a job-wide one: every rank learns
/// whether all ranks succeeded, and the local error (when there is one)
/// comes back out. The status exchange is what keeps a failing rank from
/// stranding the others at the next rendezvous.
fn all_good<T>(collective: &dyn Collective, local: Result<T>, what: &'static str) -> Result<T> {
    let agreed = collective.agree(local.is_ok())?;
    match local {
        Ok(value) => {
            if agreed {
                Ok(value)
            } else {
                Err(Error::Collective {
                    detail: format!("{} failed on a peer rank", what),
                })
            }
        }
        Err(e) => Err(e),
    }
}
