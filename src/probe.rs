//! Per-thread measurement: the accumulator record and the state machine
//! that drives an event set and the clock.

use std::sync::Arc;

use clock::{delta, Clock, Timestamp};
use counters::{CounterFacility, EventCode, EventSet};
use error::{Error, Result};
use profile::ProfileSpec;

/// What one category has soaked up on one thread: seconds of wall-clock
/// attributed to it plus one counter slot per profile event.
#[derive(Clone, Debug, Serialize)]
pub struct CategoryData {
    pub(crate) real_time: f64,
    pub(crate) counter_values: Vec<i64>,
}

impl CategoryData {
    fn zeroed(event_count: usize) -> CategoryData {
        CategoryData {
            real_time: 0.0,
            counter_values: vec![0; event_count],
        }
    }

    fn clear(&mut self) {
        self.real_time = 0.0;
        for slot in &mut self.counter_values {
            *slot = 0;
        }
    }
}

/// The per-thread record handed to `add_run_data`. Owned by exactly one
/// worker thread while measuring; snapshots are plain clones.
#[derive(Clone, Debug, Serialize)]
pub struct ProbeData {
    thread_id: usize,
    profile: ProfileSpec,
    #[serde(skip)]
    codes: Vec<EventCode>,
    categories: Vec<CategoryData>,
}

impl ProbeData {
    pub(crate) fn from_template(
        profile: ProfileSpec,
        codes: Vec<EventCode>,
        thread_id: usize,
    ) -> ProbeData {
        let categories = (0..profile.category_count())
            .map(|_| CategoryData::zeroed(profile.event_count()))
            .collect();
        ProbeData {
            thread_id,
            profile,
            codes,
            categories,
        }
    }

    pub fn thread_id(&self) -> usize {
        self.thread_id
    }

    pub fn profile(&self) -> &ProfileSpec {
        &self.profile
    }

    pub fn real_time(&self, ci: usize) -> f64 {
        self.categories[ci].real_time
    }

    pub fn counter_values(&self, ci: usize) -> &[i64] {
        &self.categories[ci].counter_values
    }

    /// Zero every accumulator, keeping the shape.
    pub fn reset_values(&mut self) {
        for category in &mut self.categories {
            category.clear();
        }
    }

    pub fn reset_category(&mut self, ci: usize) {
        self.categories[ci].clear();
    }

    /// Flatten into the wire shape: counters row-major (category-outer,
    /// event-inner) and one wall-clock entry per category.
    pub(crate) fn pack(&self) -> (Vec<i64>, Vec<f64>) {
        let mut counters = Vec::with_capacity(self.categories.len() * self.profile.event_count());
        let mut times = Vec::with_capacity(self.categories.len());
        for category in &self.categories {
            counters.extend_from_slice(&category.counter_values);
            times.push(category.real_time);
        }
        (counters, times)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Created,
    Ready,
    Running,
}

impl State {
    fn word(&self) -> &'static str {
        match *self {
            State::Created => "uninitialised",
            State::Ready => "ready",
            State::Running => "running",
        }
    }
}

/// Drives one thread's event set and clock, accumulating into its own
/// `ProbeData`. Create it, `init` it and use it on the same thread; the
/// counter facility is thread-affine.
pub struct Probe {
    data: ProbeData,
    facility: Arc<dyn CounterFacility>,
    clock: Arc<dyn Clock>,
    set: Option<Box<dyn EventSet>>,
    last_sample: Timestamp,
    state: State,
}

impl Probe {
    pub fn new(data: ProbeData, facility: Arc<dyn CounterFacility>, clock: Arc<dyn Clock>) -> Probe {
        Probe {
            data,
            facility,
            clock,
            set: None,
            last_sample: Timestamp::zero(),
            state: State::Created,
        }
    }

    /// Registers the calling thread with the facility and builds the event
    /// set in profile order. Must run on the thread that will measure.
    pub fn init(&mut self) -> Result<()> {
        self.expect(State::Created, "init")?;
        self.facility.thread_register()?;
        let mut set = self.facility.new_event_set()?;
        for (code, name) in self.data.codes.iter().zip(self.data.profile.events()) {
            set.add_event(*code, name)?;
        }
        self.set = Some(set);
        self.state = State::Ready;
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.expect(State::Ready, "start")?;
        self.set_mut().start()?;
        self.last_sample = self.clock.now();
        self.state = State::Running;
        Ok(())
    }

    /// Zeroes the counter deltas and restamps the clock. Accumulators are
    /// untouched.
    pub fn reset(&mut self) -> Result<()> {
        self.expect(State::Running, "reset")?;
        self.set_mut().reset()?;
        self.last_sample = self.clock.now();
        Ok(())
    }

    /// Attributes everything since the last sample to category `ci` and
    /// keeps measuring.
    pub fn accumulate(&mut self, ci: usize) -> Result<()> {
        self.expect(State::Running, "accumulate")?;
        self.check_category(ci)?;
        let now = self.clock.now();
        self.data.categories[ci].real_time += delta(now, self.last_sample);
        self.last_sample = now;
        let category = &mut self.data.categories[ci];
        match self.set {
            Some(ref mut set) => set.accumulate(&mut category.counter_values),
            None => unreachable!(),
        }
    }

    /// Like `accumulate`, then halts the event set.
    pub fn stop(&mut self, ci: usize) -> Result<()> {
        self.expect(State::Running, "stop")?;
        self.check_category(ci)?;
        let now = self.clock.now();
        self.data.categories[ci].real_time += delta(now, self.last_sample);
        self.last_sample = now;
        let category = &mut self.data.categories[ci];
        let result = match self.set {
            Some(ref mut set) => set.stop(&mut category.counter_values),
            None => unreachable!(),
        };
        self.state = State::Ready;
        result
    }

    /// start → stop → start. The counter substrate settles into a steady
    /// state only after a full bracket, so parallel-region setup runs this
    /// once before real measurement begins.
    pub fn prime(&mut self) -> Result<()> {
        self.start()?;
        self.stop_discarding()?;
        self.start()
    }

    fn stop_discarding(&mut self) -> Result<()> {
        self.expect(State::Running, "stop")?;
        let mut scratch = vec![0i64; self.data.profile.event_count()];
        let result = match self.set {
            Some(ref mut set) => set.stop(&mut scratch),
            None => unreachable!(),
        };
        self.state = State::Ready;
        result
    }

    pub fn reset_accumulators(&mut self) {
        self.data.reset_values();
    }

    /// Zeroes one category's time and counter slots, leaving the rest
    /// alone.
    pub fn reset_accumulator(&mut self, ci: usize) -> Result<()> {
        self.check_category(ci)?;
        self.data.reset_category(ci);
        Ok(())
    }

    pub fn data(&self) -> &ProbeData {
        &self.data
    }

    pub fn snapshot(&self) -> ProbeData {
        self.data.clone()
    }

    /// Tears down the event set and unregisters the thread, handing back
    /// the accumulated record.
    pub fn destroy(mut self) -> Result<ProbeData> {
        if self.state == State::Running {
            self.stop_discarding()?;
        }
        if let Some(ref mut set) = self.set {
            set.cleanup()?;
        }
        self.set = None;
        self.facility.thread_unregister()?;
        Ok(self.data)
    }

    fn expect(&self, wanted: State, op: &'static str) -> Result<()> {
        if self.state == wanted {
            Ok(())
        } else {
            Err(Error::ProbeState {
                op,
                state: self.state.word(),
            })
        }
    }

    fn check_category(&self, ci: usize) -> Result<()> {
        if ci < self.data.categories.len() {
            Ok(())
        } else {
            Err(Error::ProbeState {
                op: "use a category index outside the profile",
                state: self.state.word(),
            })
        }
    }

    fn set_mut(&mut self) -> &mut Box<dyn EventSet> {
        match self.set {
            Some(ref mut set) => set,
            // `expect` has already ruled out Created, and every other state
            // implies an event set
            None => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clock::ManualClock;
    use counters::MockCounters;
    use rand::{self, Rng};

    const MS: i64 = 1_000_000;

    fn probe_with(clock: &ManualClock, categories: &[&str], events: &[&str]) -> Probe {
        let facility = Arc::new(MockCounters::new());
        let spec = ProfileSpec::new("test", categories, events).unwrap();
        let codes = events
            .iter()
            .map(|e| facility.name_to_event(e).unwrap())
            .collect();
        let data = ProbeData::from_template(spec, codes, 0);
        Probe::new(data, facility, Arc::new(clock.clone()))
    }

    #[test]
    fn accumulate_splits_elapsed_time_between_categories() {
        let clock = ManualClock::new();
        let mut probe = probe_with(&clock, &["init", "loop"], &["e"]);
        probe.init().unwrap();
        probe.start().unwrap();

        clock.advance_nanos(10 * MS);
        probe.accumulate(0).unwrap();
        clock.advance_nanos(20 * MS);
        probe.stop(1).unwrap();

        assert!((probe.data().real_time(0) - 0.010).abs() < 1e-9);
        assert!((probe.data().real_time(1) - 0.020).abs() < 1e-9);
    }

    #[test]
    fn repeated_accumulate_totals_the_span_between_reset_and_stop() {
        let clock = ManualClock::new();
        let mut probe = probe_with(&clock, &["only"], &["e"]);
        probe.init().unwrap();
        probe.start().unwrap();
        probe.reset().unwrap();

        for _ in 0..7 {
            clock.advance_nanos(3 * MS);
            probe.accumulate(0).unwrap();
        }
        clock.advance_nanos(3 * MS);
        probe.stop(0).unwrap();

        assert!((probe.data().real_time(0) - 0.024).abs() < 1e-9);
    }

    #[test]
    fn interleaved_categories_partition_the_total_elapsed_time() {
        let clock = ManualClock::new();
        let mut probe = probe_with(&clock, &["a", "b", "c"], &[]);
        probe.init().unwrap();
        probe.start().unwrap();

        let mut rng = rand::thread_rng();
        let mut elapsed = 0i64;
        for _ in 0..100 {
            let step = rng.gen_range(1, 5000) * 1000;
            clock.advance_nanos(step);
            elapsed += step;
            probe.accumulate(rng.gen_range(0, 3)).unwrap();
        }
        clock.advance_nanos(MS);
        elapsed += MS;
        probe.stop(2).unwrap();

        let total: f64 = (0..3).map(|ci| probe.data().real_time(ci)).sum();
        assert!((total - elapsed as f64 * 1e-9).abs() < 1e-9);
    }

    #[test]
    fn counter_slots_add_up_per_category() {
        let clock = ManualClock::new();
        let mut probe = probe_with(&clock, &["a", "b"], &["x", "y"]);
        probe.init().unwrap();
        probe.start().unwrap();

        probe.accumulate(0).unwrap();
        probe.accumulate(0).unwrap();
        probe.stop(1).unwrap();

        // mock steps: event 0 → 1000/sample, event 1 → 2000/sample
        assert_eq!(probe.data().counter_values(0), &[2000, 4000]);
        assert_eq!(probe.data().counter_values(1), &[1000, 2000]);
    }

    #[test]
    fn reset_restamps_without_clearing_accumulators() {
        let clock = ManualClock::new();
        let mut probe = probe_with(&clock, &["a"], &[]);
        probe.init().unwrap();
        probe.start().unwrap();

        clock.advance_nanos(5 * MS);
        probe.accumulate(0).unwrap();
        clock.advance_nanos(50 * MS);
        probe.reset().unwrap();
        clock.advance_nanos(5 * MS);
        probe.stop(0).unwrap();

        // the 50ms gap before reset is attributed to nothing
        assert!((probe.data().real_time(0) - 0.010).abs() < 1e-9);
    }

    #[test]
    fn accumulate_before_start_is_a_state_error() {
        let clock = ManualClock::new();
        let mut probe = probe_with(&clock, &["a"], &[]);
        probe.init().unwrap();
        match probe.accumulate(0) {
            Err(Error::ProbeState { op, .. }) => assert_eq!(op, "accumulate"),
            other => panic!("expected a state error, got {:?}", other),
        }
    }

    #[test]
    fn prime_leaves_the_probe_running_with_clean_accumulators() {
        let clock = ManualClock::new();
        let mut probe = probe_with(&clock, &["a"], &["x"]);
        probe.init().unwrap();
        probe.prime().unwrap();

        clock.advance_nanos(MS);
        probe.stop(0).unwrap();
        // the priming bracket's sample went to scratch, not category 0
        assert_eq!(probe.data().counter_values(0), &[1000]);
        assert!((probe.data().real_time(0) - 0.001).abs() < 1e-9);
    }

    #[test]
    fn reset_accumulators_zeroes_time_and_counters() {
        let clock = ManualClock::new();
        let mut probe = probe_with(&clock, &["a"], &["x"]);
        probe.init().unwrap();
        probe.start().unwrap();
        clock.advance_nanos(MS);
        probe.stop(0).unwrap();

        probe.reset_accumulators();
        assert_eq!(probe.data().real_time(0), 0.0);
        assert_eq!(probe.data().counter_values(0), &[0]);
    }

    #[test]
    fn reset_accumulator_targets_a_single_category() {
        let clock = ManualClock::new();
        let mut probe = probe_with(&clock, &["a", "b"], &["x"]);
        probe.init().unwrap();
        probe.start().unwrap();
        clock.advance_nanos(MS);
        probe.accumulate(0).unwrap();
        clock.advance_nanos(2 * MS);
        probe.stop(1).unwrap();

        probe.reset_accumulator(0).unwrap();
        assert_eq!(probe.data().real_time(0), 0.0);
        assert_eq!(probe.data().counter_values(0), &[0]);
        // the other category keeps its record
        assert!((probe.data().real_time(1) - 0.002).abs() < 1e-9);
        assert_eq!(probe.data().counter_values(1), &[1000]);

        assert!(probe.reset_accumulator(7).is_err());
    }

    #[test]
    fn destroy_returns_the_record() {
        let clock = ManualClock::new();
        let mut probe = probe_with(&clock, &["a"], &["x"]);
        probe.init().unwrap();
        probe.start().unwrap();
        probe.accumulate(0).unwrap();
        let data = probe.destroy().unwrap();
        assert_eq!(data.counter_values(0), &[1000]);
    }
}
