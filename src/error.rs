use rusqlite;

use fd::OpenError;

pub type Result<T> = ::std::result::Result<T, Error>;

/// Everything that can go wrong between `init` and `finalize`.
///
/// Failures raised inside a collective section are combined across ranks
/// before they surface, so an `Err` observed on one rank is observed on all
/// of them and nobody is left parked in a dead rendezvous.
#[derive(Debug, Fail)]
pub enum Error {
    #[fail(display = "counter facility unavailable: {}", reason)]
    EnvironmentUnavailable { reason: String },

    #[fail(display = "unknown counter event '{}'", name)]
    UnknownEvent { name: String },

    #[fail(
        display = "event '{}' cannot join the current event set: {}",
        name, inner
    )]
    IncompatibleEventCombination { name: String, inner: OpenError },

    #[fail(
        display = "store already holds profile '{}' with a different shape: {}",
        profile, detail
    )]
    SchemaInconsistent { profile: String, detail: String },

    #[fail(display = "ranks disagree on the profile shape: {}", detail)]
    CollectiveDisagreement { detail: String },

    #[fail(display = "store I/O failed on '{}': {}", path, detail)]
    StoreIo { path: String, detail: String },

    #[fail(display = "store statement failed while {}: {}", context, inner)]
    Sql {
        context: &'static str,
        inner: rusqlite::Error,
    },

    #[fail(display = "counter operation '{}' failed: {}", op, detail)]
    CounterRuntime { op: &'static str, detail: String },

    #[fail(display = "probe cannot {} while {}", op, state)]
    ProbeState {
        op: &'static str,
        state: &'static str,
    },

    #[fail(display = "collective transport failed: {}", detail)]
    Collective { detail: String },

    #[fail(display = "invalid measurement configuration: {}", detail)]
    InvalidConfig { detail: String },

    #[fail(display = "perfoscope is not initialised (wanted to {})", op)]
    Uninitialised { op: &'static str },

    #[fail(display = "perfoscope is already finalised (wanted to {})", op)]
    Finalised { op: &'static str },
}

impl Error {
    pub(crate) fn sql(context: &'static str, inner: rusqlite::Error) -> Error {
        Error::Sql { context, inner }
    }
}
