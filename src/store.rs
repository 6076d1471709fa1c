//! The relational staging store.
//!
//! Only the owner rank ever holds one of these. It lives in memory for the
//! whole job: loaded from the on-disk file once at init, mutated by run
//! inserts, written back once at finalize. All user-supplied text travels
//! through bound parameters; the DDL is fixed.

use std::path::Path;

use rusqlite::backup::{Backup, StepResult};
use rusqlite::types::{ToSql, ToSqlOutput};
use rusqlite::{Connection, OpenFlags};

use error::{Error, Result};
use profile::ProfileSpec;

/// The synthetic event carrying wall-clock seconds. Always attached to a
/// profile when wall-clock measurement is enabled, never a hardware event.
pub const TIME_EVENT: &'static str = "time";

const CATEGORIES_PRESENT: u8 = 1;
const PROFILE_PRESENT: u8 = 2;
const EVENTS_PRESENT: u8 = 4;

const CREATE_NEW_RUN_SQL: &'static str =
    "insert into perf_run (run, size, profile_id) \
     values (\
     (select ifnull(max(r.run+1), 1) from perf_run r, perf_profile p \
     where p.name=?2 and r.profile_id=p.id and r.size=?1), \
     ?1, \
     (select p.id from perf_profile p where p.name=?2));";

const INSERT_VALUE_SQL: &'static str =
    "insert into perf_value(proc_id, thread_id, profile_id, category_id, event_id, run_id, value) \
     select ?1 as proc_id, ?2 as thread_id, p.id, c.id, e.id, ?3 as run_id, ?4 as value \
     from perf_profile p, perf_category c, perf_event e \
     where p.name=?5 and c.name=?6 and e.name=?7 and e.profile_id=p.id;";

/// A measured value on its way into `perf_value`. Counter deltas bind as
/// integers, wall-clock seconds as doubles; the column is numeric.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Sample {
    Counter(i64),
    Time(f64),
}

impl ToSql for Sample {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput> {
        match *self {
            Sample::Counter(v) => Ok(ToSqlOutput::from(v)),
            Sample::Time(v) => Ok(ToSqlOutput::from(v)),
        }
    }
}

pub struct StagingDb {
    conn: Connection,
    forkey_on: bool,
}

impl StagingDb {
    /// Fresh in-memory staging with foreign keys enforced where the build
    /// allows it.
    pub fn open_in_memory() -> Result<StagingDb> {
        let conn = Connection::open_in_memory().map_err(|e| Error::StoreIo {
            path: ":memory:".to_string(),
            detail: e.to_string(),
        })?;
        let forkey_on = match conn.execute_batch("PRAGMA foreign_keys = on;") {
            Ok(()) => true,
            Err(e) => {
                warn!("could not enforce foreign key constraints: {}", e);
                false
            }
        };
        Ok(StagingDb { conn, forkey_on })
    }

    /// Backup-copies the on-disk file into staging. A missing file is not
    /// an error; the job simply starts against an empty store.
    pub fn load(&mut self, path: &str, vfs: &str) -> Result<()> {
        if !Path::new(path).exists() {
            info!("no store at '{}' yet; starting empty", path);
            return Ok(());
        }
        let file = Connection::open_with_flags_and_vfs(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            vfs,
        )
        .map_err(|e| store_io(path, &e))?;
        info!("reading store from '{}'", path);
        let backup = Backup::new(&file, &mut self.conn).map_err(|e| store_io(path, &e))?;
        match backup.step(-1) {
            Ok(StepResult::Done) => {
                info!("done reading store from '{}'", path);
                Ok(())
            }
            Ok(other) => Err(Error::StoreIo {
                path: path.to_string(),
                detail: format!("backup stopped early: {:?}", other),
            }),
            Err(e) => Err(store_io(path, &e)),
        }
    }

    /// Backup-copies staging over the on-disk file, creating it if needed.
    pub fn store(&self, path: &str, vfs: &str) -> Result<()> {
        let mut file = Connection::open_with_flags_and_vfs(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            vfs,
        )
        .map_err(|e| store_io(path, &e))?;
        info!("writing store to '{}'", path);
        let backup = Backup::new(&self.conn, &mut file).map_err(|e| store_io(path, &e))?;
        match backup.step(-1) {
            Ok(StepResult::Done) => {
                info!("done writing store to '{}'", path);
                Ok(())
            }
            Ok(other) => Err(Error::StoreIo {
                path: path.to_string(),
                detail: format!("backup stopped early: {:?}", other),
            }),
            Err(e) => Err(store_io(path, &e)),
        }
    }

    pub fn create_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(&schema_sql(self.forkey_on))
            .map_err(|e| Error::sql("creating the schema", e))
    }

    /// Prepares the two hot-path statements so a bad build of the SQL fails
    /// at init rather than mid-run. They stay in the connection's statement
    /// cache afterwards.
    pub fn prepare_hot_statements(&self) -> Result<()> {
        self.conn
            .prepare_cached(CREATE_NEW_RUN_SQL)
            .map_err(|e| Error::sql("preparing the run statement", e))?;
        self.conn
            .prepare_cached(INSERT_VALUE_SQL)
            .map_err(|e| Error::sql("preparing the value statement", e))?;
        Ok(())
    }

    /// Idempotent profile registration: a profile row and its complete
    /// event list either both exist or both get inserted; partial presence
    /// of either means someone else's data is in the way and nothing is
    /// touched.
    pub fn register_profile(&self, spec: &ProfileSpec, time_enabled: bool) -> Result<()> {
        let mut store_events: Vec<String> = spec.events().to_vec();
        if time_enabled {
            store_events.push(TIME_EVENT.to_string());
        }

        let mask = self.exist_mask(spec, &store_events)?;
        let profile_present = mask & PROFILE_PRESENT != 0;
        let events_present = mask & EVENTS_PRESENT != 0;
        if profile_present != events_present {
            return Err(Error::SchemaInconsistent {
                profile: spec.name().to_string(),
                detail: "a profile with this name exists with a different event set; \
                         change the profile name and try again"
                    .to_string(),
            });
        }

        if !profile_present {
            self.conn
                .execute(
                    "insert into perf_profile(name) values (?1)",
                    params![spec.name()],
                )
                .map_err(|e| Error::sql("inserting the profile", e))?;
            for event in &store_events {
                self.conn
                    .execute(
                        "insert into perf_event(name, profile_id) \
                         values (?1, (select id from perf_profile where name = ?2))",
                        params![event, spec.name()],
                    )
                    .map_err(|e| Error::sql("inserting an event", e))?;
            }
        }

        if mask & CATEGORIES_PRESENT == 0 {
            for category in spec.categories() {
                self.conn
                    .execute(
                        "insert into perf_category(name) values (?1)",
                        params![category],
                    )
                    .map_err(|e| Error::sql("inserting a category", e))?;
            }
        }

        Ok(())
    }

    /// Allocates the next run index for `(profile, size)` and returns the
    /// new run's row id.
    pub fn create_new_run(&self, profile: &str, size: i64) -> Result<i64> {
        let mut stmt = self
            .conn
            .prepare_cached(CREATE_NEW_RUN_SQL)
            .map_err(|e| Error::sql("preparing the run statement", e))?;
        stmt.execute(params![size, profile])
            .map_err(|e| Error::sql("creating a run", e))?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_value(
        &self,
        proc_id: i64,
        thread_id: i64,
        profile: &str,
        category: &str,
        event: &str,
        run_id: i64,
        value: Sample,
    ) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare_cached(INSERT_VALUE_SQL)
            .map_err(|e| Error::sql("preparing the value statement", e))?;
        let inserted = stmt
            .execute(params![
                proc_id, thread_id, run_id, value, profile, category, event
            ])
            .map_err(|e| Error::sql("inserting a value", e))?;
        // the insert-select matches nothing when a name is unregistered,
        // which would silently drop the measurement
        if inserted == 1 {
            Ok(())
        } else {
            Err(Error::SchemaInconsistent {
                profile: profile.to_string(),
                detail: format!(
                    "no registered (category '{}', event '{}') to attach a value to",
                    category, event
                ),
            })
        }
    }

    /// Three bits: categories all present, profile row present, event list
    /// all present under that profile. Partial presence of categories or
    /// events is an inconsistency, not a bit.
    fn exist_mask(&self, spec: &ProfileSpec, store_events: &[String]) -> Result<u8> {
        let mut mask = 0u8;

        // categories are global, not keyed by profile
        let mut missing: Vec<&str> = spec.categories().iter().map(|c| c.as_str()).collect();
        {
            let mut stmt = self
                .conn
                .prepare("select name from perf_category")
                .map_err(|e| Error::sql("checking categories", e))?;
            let names = stmt
                .query_map(params![], |row| row.get::<_, String>(0))
                .map_err(|e| Error::sql("checking categories", e))?;
            for name in names {
                let name = name.map_err(|e| Error::sql("checking categories", e))?;
                missing.retain(|c| *c != name.as_str());
            }
        }
        if missing.is_empty() {
            mask |= CATEGORIES_PRESENT;
        } else if missing.len() != spec.category_count() {
            return Err(Error::SchemaInconsistent {
                profile: spec.name().to_string(),
                detail: "some of the profile's categories are registered and others are not"
                    .to_string(),
            });
        }

        let profiles: i64 = self
            .conn
            .query_row(
                "select count(*) from perf_profile where name = ?1",
                params![spec.name()],
                |row| row.get(0),
            )
            .map_err(|e| Error::sql("checking the profile", e))?;
        if profiles == 1 {
            mask |= PROFILE_PRESENT;
        }

        let mut missing: Vec<&str> = store_events.iter().map(|e| e.as_str()).collect();
        {
            let mut stmt = self
                .conn
                .prepare(
                    "select e.name from perf_profile p, perf_event e \
                     where p.name = ?1 and e.profile_id = p.id",
                )
                .map_err(|e| Error::sql("checking events", e))?;
            let names = stmt
                .query_map(params![spec.name()], |row| row.get::<_, String>(0))
                .map_err(|e| Error::sql("checking events", e))?;
            for name in names {
                let name = name.map_err(|e| Error::sql("checking events", e))?;
                missing.retain(|e| *e != name.as_str());
            }
        }
        if store_events.is_empty() {
            // nothing to compare; mirror the profile bit so the
            // profile/events consistency rule stays meaningful
            if mask & PROFILE_PRESENT != 0 {
                mask |= EVENTS_PRESENT;
            }
        } else if missing.is_empty() {
            mask |= EVENTS_PRESENT;
        } else if missing.len() != store_events.len() {
            return Err(Error::SchemaInconsistent {
                profile: spec.name().to_string(),
                detail: "some of the profile's events are registered and others are not"
                    .to_string(),
            });
        }

        Ok(mask)
    }

    #[cfg(test)]
    pub(crate) fn count(&self, sql: &str) -> i64 {
        self.conn
            .query_row(sql, params![], |row| row.get(0))
            .unwrap()
    }
}

fn store_io(path: &str, e: &rusqlite::Error) -> Error {
    Error::StoreIo {
        path: path.to_string(),
        detail: e.to_string(),
    }
}

fn schema_sql(forkey: bool) -> String {
    let references = |table: &str| {
        if forkey {
            format!(" references {}(id)", table)
        } else {
            String::new()
        }
    };
    format!(
        "create table if not exists perf_profile(\
         id integer primary key autoincrement, \
         name text not null unique);\n\
         create table if not exists perf_category(\
         id integer primary key autoincrement, \
         name text not null unique);\n\
         create table if not exists perf_event(\
         id integer primary key autoincrement, \
         name text not null, \
         profile_id integer not null{events_fk}, \
         constraint uk_id unique (name, profile_id));\n\
         create table if not exists perf_run(\
         id integer primary key autoincrement, \
         run integer not null, \
         size integer not null, \
         profile_id integer not null{run_fk}, \
         constraint uk_id unique(run, size, profile_id));\n\
         create table if not exists perf_value(\
         id integer primary key autoincrement, \
         proc_id int not null, \
         thread_id int not null, \
         profile_id integer not null{value_profile_fk}, \
         category_id integer not null{value_category_fk}, \
         event_id integer not null{value_event_fk}, \
         run_id integer not null{value_run_fk}, \
         value numeric not null);\n",
        events_fk = references("perf_profile"),
        run_fk = references("perf_profile"),
        value_profile_fk = references("perf_profile"),
        value_category_fk = references("perf_category"),
        value_event_fk = references("perf_event"),
        value_run_fk = references("perf_run"),
    )
}
