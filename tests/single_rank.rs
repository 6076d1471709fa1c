//! End-to-end single-process scenarios against a real store file.

extern crate env_logger;
extern crate perfoscope;
#[macro_use]
extern crate pretty_assertions;
extern crate rusqlite;
extern crate tempfile;

use std::fs;
use std::sync::Arc;

use perfoscope::{
    Config, DisabledClock, Error, ManualClock, MockCounters, ProbeData, Session,
};
use rusqlite::Connection;

const MS: i64 = 1_000_000;

fn config(path: &str, clock: &ManualClock) -> Config {
    Config::new("P")
        .categories(&["init", "loop"])
        .events(&["PAPI_TOT_CYC"])
        .db_path(path)
        .wall_clock(Arc::new(clock.clone()))
        .counters(Arc::new(MockCounters::new()))
}

/// One measured run: 10ms attributed to `init`, 20ms to `loop`.
fn measure_one_run(session: &Session, clock: &ManualClock) -> ProbeData {
    let mut probe = session.probe(0);
    probe.init().unwrap();
    probe.start().unwrap();
    clock.advance_nanos(10 * MS);
    probe.accumulate(0).unwrap();
    clock.advance_nanos(20 * MS);
    probe.accumulate(1).unwrap();
    probe.stop(1).unwrap();
    probe.destroy().unwrap()
}

fn query_i64(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}

fn query_f64(conn: &Connection, sql: &str) -> f64 {
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}

#[test]
fn first_run_against_an_empty_store() {
    let _ = env_logger::try_init();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("perf.db");
    let path = path.to_str().unwrap();
    let clock = ManualClock::new();

    let mut session = Session::create(config(path, &clock)).unwrap();
    let data = measure_one_run(&session, &clock);
    assert!((data.real_time(0) - 0.010).abs() < 1e-9);
    assert!((data.real_time(1) - 0.020).abs() < 1e-9);

    session.add_run_data(&[data], 100).unwrap();
    session.finalize().unwrap();

    let conn = Connection::open(path).unwrap();
    assert_eq!(query_i64(&conn, "select count(*) from perf_profile"), 1);
    assert_eq!(query_i64(&conn, "select count(*) from perf_category"), 2);
    assert_eq!(query_i64(&conn, "select count(*) from perf_event"), 2);
    assert_eq!(query_i64(&conn, "select count(*) from perf_run"), 1);
    assert_eq!(
        query_i64(&conn, "select run from perf_run where size = 100"),
        1
    );
    // 2 categories × (PAPI_TOT_CYC + time)
    assert_eq!(query_i64(&conn, "select count(*) from perf_value"), 4);

    let init_time = query_f64(
        &conn,
        "select v.value from perf_value v, perf_category c, perf_event e \
         where v.category_id = c.id and c.name = 'init' \
         and v.event_id = e.id and e.name = 'time'",
    );
    assert!((init_time - 0.010).abs() < 1e-9);
    let loop_time = query_f64(
        &conn,
        "select v.value from perf_value v, perf_category c, perf_event e \
         where v.category_id = c.id and c.name = 'loop' \
         and v.event_id = e.id and e.name = 'time'",
    );
    assert!((loop_time - 0.020).abs() < 1e-9);
}

#[test]
fn a_second_run_appends_instead_of_overwriting() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("perf.db");
    let path = path.to_str().unwrap();

    for expected_runs in 1..3 {
        let clock = ManualClock::new();
        let mut session = Session::create(config(path, &clock)).unwrap();
        let data = measure_one_run(&session, &clock);
        session.add_run_data(&[data], 100).unwrap();
        session.finalize().unwrap();

        let conn = Connection::open(path).unwrap();
        assert_eq!(
            query_i64(&conn, "select count(*) from perf_run"),
            expected_runs
        );
        assert_eq!(
            query_i64(&conn, "select max(run) from perf_run where size = 100"),
            expected_runs
        );
        // the shape tables stayed put
        assert_eq!(query_i64(&conn, "select count(*) from perf_profile"), 1);
        assert_eq!(query_i64(&conn, "select count(*) from perf_event"), 2);
        assert_eq!(
            query_i64(&conn, "select count(*) from perf_value"),
            4 * expected_runs
        );
    }
}

#[test]
fn a_different_event_set_under_the_same_name_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("perf.db");
    let path = path.to_str().unwrap();

    let clock = ManualClock::new();
    let mut session = Session::create(config(path, &clock)).unwrap();
    let data = measure_one_run(&session, &clock);
    session.add_run_data(&[data], 100).unwrap();
    session.finalize().unwrap();
    let before = fs::read(path).unwrap();

    let clock = ManualClock::new();
    let divergent = config(path, &clock).events(&["PAPI_L1_DCM"]);
    match Session::create(divergent) {
        Err(Error::SchemaInconsistent { .. }) => (),
        other => panic!("expected SchemaInconsistent, got {:?}", other.map(|_| ())),
    }

    // the refused session never touched the file
    assert_eq!(before, fs::read(path).unwrap());
}

#[test]
fn wall_clock_off_leaves_no_time_event() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("perf.db");
    let path = path.to_str().unwrap();

    let clock = ManualClock::new();
    let mut session =
        Session::create(config(path, &clock).wall_clock(Arc::new(DisabledClock))).unwrap();
    let mut probe = session.probe(0);
    probe.init().unwrap();
    probe.start().unwrap();
    probe.accumulate(0).unwrap();
    probe.stop(1).unwrap();
    session.add_run_data(&[probe.destroy().unwrap()], 100).unwrap();
    session.finalize().unwrap();

    let conn = Connection::open(path).unwrap();
    assert_eq!(
        query_i64(&conn, "select count(*) from perf_event where name = 'time'"),
        0
    );
    // 2 categories × 1 hardware event
    assert_eq!(query_i64(&conn, "select count(*) from perf_value"), 2);
}

#[test]
fn persistence_off_creates_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("perf.db");
    let clock = ManualClock::new();

    let mut session =
        Session::create(config(path.to_str().unwrap(), &clock).persistence(false)).unwrap();
    let data = measure_one_run(&session, &clock);
    session.add_run_data(&[data], 100).unwrap();
    session.finalize().unwrap();

    assert!(!path.exists());
}

#[test]
fn a_session_without_runs_leaves_the_file_bit_identical() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("perf.db");
    let path = path.to_str().unwrap();

    let clock = ManualClock::new();
    let mut session = Session::create(config(path, &clock)).unwrap();
    let data = measure_one_run(&session, &clock);
    session.add_run_data(&[data], 100).unwrap();
    session.finalize().unwrap();
    let before = fs::read(path).unwrap();

    // load → no runs → store is skipped entirely
    let clock = ManualClock::new();
    let session = Session::create(config(path, &clock)).unwrap();
    session.finalize().unwrap();

    assert_eq!(before, fs::read(path).unwrap());
}

#[test]
fn distinct_sizes_share_the_profile_but_not_run_indices() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("perf.db");
    let path = path.to_str().unwrap();

    for size in &[100i64, 200, 300] {
        let clock = ManualClock::new();
        let mut session = Session::create(config(path, &clock)).unwrap();
        let data = measure_one_run(&session, &clock);
        session.add_run_data(&[data], *size).unwrap();
        session.finalize().unwrap();
    }

    let conn = Connection::open(path).unwrap();
    assert_eq!(query_i64(&conn, "select count(*) from perf_profile"), 1);
    assert_eq!(query_i64(&conn, "select count(*) from perf_category"), 2);
    assert_eq!(query_i64(&conn, "select count(*) from perf_event"), 2);
    // each size starts at run 1
    assert_eq!(query_i64(&conn, "select count(*) from perf_run"), 3);
    assert_eq!(query_i64(&conn, "select max(run) from perf_run"), 1);
}

#[test]
fn facade_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("perf.db");
    let path = path.to_str().unwrap();
    let clock = ManualClock::new();

    // everything before init is a no-op
    perfoscope::finalize().unwrap();
    perfoscope::add_run_data(&[], 1).unwrap();
    assert!(perfoscope::probe(0).is_err());

    perfoscope::init(config(path, &clock)).unwrap();
    // a second init is a no-op, not an error
    perfoscope::init(config(path, &clock)).unwrap();

    let mut probe = perfoscope::probe(0).unwrap();
    probe.init().unwrap();
    probe.prime().unwrap();
    clock.advance_nanos(5 * MS);
    probe.stop(0).unwrap();

    perfoscope::add_run_data(&[probe.destroy().unwrap()], 7).unwrap();
    perfoscope::finalize().unwrap();

    // the facade is now finalised: filing more data is an error
    match perfoscope::add_run_data(&[], 7) {
        Err(Error::Finalised { .. }) => (),
        other => panic!("expected Finalised, got {:?}", other),
    }

    let conn = Connection::open(path).unwrap();
    assert_eq!(query_i64(&conn, "select count(*) from perf_run"), 1);
    assert_eq!(query_i64(&conn, "select count(*) from perf_value"), 4);
}
