//! Scenarios with a whole rank set hosted in one process.

extern crate env_logger;
extern crate perfoscope;
#[macro_use]
extern crate pretty_assertions;
extern crate rusqlite;
extern crate tempfile;

use std::sync::Arc;
use std::thread;

use perfoscope::{
    ChannelWorld, Config, Error, ManualClock, MockCounters, Result, Session,
};
use rusqlite::Connection;

fn rank_config(path: &str, world: ChannelWorld) -> Config {
    Config::new("P")
        .categories(&["init", "loop"])
        .events(&["PAPI_TOT_CYC"])
        .db_path(path)
        .wall_clock(Arc::new(ManualClock::new()))
        .counters(Arc::new(MockCounters::new()))
        .collective(Arc::new(world))
}

#[test]
fn three_ranks_file_under_their_own_proc_ids() {
    let _ = env_logger::try_init();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("perf.db");
    let path_string = path.to_str().unwrap().to_string();

    let handles: Vec<_> = ChannelWorld::create(3)
        .into_iter()
        .map(|world| {
            let path = path_string.clone();
            thread::spawn(move || -> Result<()> {
                let mut session = Session::create(rank_config(&path, world))?;
                let mut probe = session.probe(0);
                probe.init()?;
                probe.start()?;
                probe.stop(0)?;
                session.add_run_data(&[probe.destroy()?], 8)?;
                session.finalize()
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    let conn = Connection::open(path.to_str().unwrap()).unwrap();
    let runs: i64 = conn
        .query_row("select count(*) from perf_run", [], |r| r.get(0))
        .unwrap();
    assert_eq!(runs, 1);

    // one row per rank per (category, event incl. time)
    let values: i64 = conn
        .query_row("select count(*) from perf_value", [], |r| r.get(0))
        .unwrap();
    assert_eq!(values, 3 * 2 * 2);

    let procs: i64 = conn
        .query_row("select count(distinct proc_id) from perf_value", [], |r| {
            r.get(0)
        })
        .unwrap();
    assert_eq!(procs, 3);
    for proc_id in 0..3 {
        let rows: i64 = conn
            .query_row(
                "select count(*) from perf_value where proc_id = ?1",
                [proc_id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(rows, 4);
    }
}

#[test]
fn divergent_specs_fail_session_creation_on_every_rank() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("perf.db");
    let path_string = path.to_str().unwrap().to_string();

    let handles: Vec<_> = ChannelWorld::create(3)
        .into_iter()
        .map(|world| {
            let path = path_string.clone();
            thread::spawn(move || {
                let rank = {
                    use perfoscope::Collective;
                    world.rank()
                };
                let config = if rank == 1 {
                    rank_config(&path, world).events(&["PAPI_L1_DCM"])
                } else {
                    rank_config(&path, world)
                };
                Session::create(config).map(|_| ())
            })
        })
        .collect();
    for handle in handles {
        match handle.join().unwrap() {
            Err(Error::CollectiveDisagreement { .. }) => (),
            other => panic!("expected disagreement on every rank, got {:?}", other),
        }
    }

    // nobody wrote anything
    assert!(!path.exists());
}

#[test]
fn only_the_owner_rank_holds_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("perf.db");
    let path_string = path.to_str().unwrap().to_string();

    let handles: Vec<_> = ChannelWorld::create(2)
        .into_iter()
        .map(|world| {
            let path = path_string.clone();
            thread::spawn(move || -> Result<bool> {
                let session = Session::create(rank_config(&path, world))?;
                let owner = session.is_owner();
                session.finalize()?;
                Ok(owner)
            })
        })
        .collect();
    let owners: Vec<bool> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();
    assert_eq!(owners, vec![true, false]);

    // no runs were filed, so the skipped write left no file behind
    assert!(!path.exists());
}
