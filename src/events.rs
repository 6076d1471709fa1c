//! Names for generalised counter events.
//!
//! Profiles carry event names as opaque strings; this module is how the
//! perf-backed facility resolves them. Both the kebab-case spellings and
//! the classic PAPI preset names are accepted, so a profile written for a
//! PAPI-era toolchain keeps working unmodified.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use serde::{Serialize, Serializer};
use strum::IntoEnumIterator;

use error::{Error, Result};
use sys::*;

#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum Event {
    Hardware(HwEvent),
    Software(SwEvent),
    HardwareCache(CacheSpec),
}

impl Event {
    /// Resolve a textual event name. PAPI presets are tried first, then the
    /// kebab-case names, then `<cache>-<op>-<result>` triples.
    pub fn parse(name: &str) -> Result<Event> {
        if let Some(event) = papi_preset(name) {
            return Ok(event);
        }
        if let Ok(hw) = name.parse::<HwEvent>() {
            return Ok(Event::Hardware(hw));
        }
        if let Ok(sw) = name.parse::<SwEvent>() {
            return Ok(Event::Software(sw));
        }
        if let Some(spec) = CacheSpec::parse(name) {
            return Ok(Event::HardwareCache(spec));
        }
        Err(Error::UnknownEvent {
            name: name.to_string(),
        })
    }

    /// The `(type, config)` pair perf_event_open wants for this event.
    pub(crate) fn type_and_config(&self) -> (u32, u64) {
        match *self {
            Event::Hardware(hw) => (PERF_TYPE_HARDWARE, hw as u64),
            Event::Software(sw) => (PERF_TYPE_SOFTWARE, sw as u64),
            Event::HardwareCache(CacheSpec(id, op, result)) => (
                PERF_TYPE_HW_CACHE,
                id as u64 | (op as u64) << 8 | (result as u64) << 16,
            ),
        }
    }

    /// Every generalised event this module can name.
    pub fn all() -> Vec<Event> {
        let mut variants = Vec::new();

        for hw_event in HwEvent::iter() {
            variants.push(Event::Hardware(hw_event));
        }

        for sw_event in SwEvent::iter() {
            variants.push(Event::Software(sw_event));
        }

        for cache_id in CacheId::iter() {
            for cache_op in CacheOp::iter() {
                for cache_result in CacheResult::iter() {
                    variants.push(Event::HardwareCache(CacheSpec(
                        cache_id,
                        cache_op,
                        cache_result,
                    )));
                }
            }
        }

        variants
    }
}

impl FromStr for Event {
    type Err = Error;

    fn from_str(name: &str) -> Result<Event> {
        Event::parse(name)
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match *self {
            Event::Hardware(hwe) => f.write_fmt(format_args!("Hardware: {}", hwe)),
            Event::Software(swe) => f.write_fmt(format_args!("Software: {}", swe)),
            Event::HardwareCache(spec) => f.write_str("Cache: ").and_then(|()| spec.fmt(f)),
        }
    }
}

/// The PAPI preset spellings we honour, mapped onto generalised events the
/// same way PAPI's own perf substrate maps them.
fn papi_preset(name: &str) -> Option<Event> {
    let event = match name {
        "PAPI_TOT_CYC" => Event::Hardware(HwEvent::CpuCycles),
        "PAPI_TOT_INS" => Event::Hardware(HwEvent::Instructions),
        "PAPI_REF_CYC" => Event::Hardware(HwEvent::RefCpuCycles),
        "PAPI_BR_INS" => Event::Hardware(HwEvent::BranchInstructions),
        "PAPI_BR_MSP" => Event::Hardware(HwEvent::BranchMisses),
        "PAPI_L1_DCM" => {
            Event::HardwareCache(CacheSpec(CacheId::Level1Data, CacheOp::Read, CacheResult::Miss))
        }
        "PAPI_L1_ICM" => Event::HardwareCache(CacheSpec(
            CacheId::Level1Instruction,
            CacheOp::Read,
            CacheResult::Miss,
        )),
        "PAPI_L3_TCM" => {
            Event::HardwareCache(CacheSpec(CacheId::LastLevel, CacheOp::Read, CacheResult::Miss))
        }
        "PAPI_L3_TCA" => Event::HardwareCache(CacheSpec(
            CacheId::LastLevel,
            CacheOp::Read,
            CacheResult::Access,
        )),
        "PAPI_TLB_DM" => {
            Event::HardwareCache(CacheSpec(CacheId::DataTLB, CacheOp::Read, CacheResult::Miss))
        }
        "PAPI_TLB_IM" => Event::HardwareCache(CacheSpec(
            CacheId::InstructionTLB,
            CacheOp::Read,
            CacheResult::Miss,
        )),
        _ => return None,
    };
    Some(event)
}

#[repr(u64)]
#[derive(
    Clone, Copy, Debug, Display, EnumIter, EnumString, Eq, PartialEq, PartialOrd, Ord, Serialize,
)]
pub enum HwEvent {
    /// Total cycles; affected by CPU frequency scaling.
    #[serde(rename = "cpu-cycles")]
    #[strum(serialize = "cpu-cycles", to_string = "CPU Cycles")]
    CpuCycles = PERF_COUNT_HW_CPU_CYCLES,

    /// Retired instructions. Hardware interrupts inflate this.
    #[serde(rename = "instructions")]
    #[strum(serialize = "instructions")]
    Instructions = PERF_COUNT_HW_INSTRUCTIONS,

    /// Usually last-level cache accesses; exact meaning is CPU-specific.
    #[serde(rename = "cache-references")]
    #[strum(serialize = "cache-references", to_string = "Cache References")]
    CacheReferences = PERF_COUNT_HW_CACHE_REFERENCES,

    /// Usually last-level cache misses; pair with `CacheReferences` for a
    /// miss rate.
    #[serde(rename = "cache-misses")]
    #[strum(serialize = "cache-misses", to_string = "Cache Misses")]
    CacheMisses = PERF_COUNT_HW_CACHE_MISSES,

    /// Retired branch instructions.
    #[serde(rename = "branch-instructions")]
    #[strum(serialize = "branch-instructions", to_string = "Branch Instructions")]
    BranchInstructions = PERF_COUNT_HW_BRANCH_INSTRUCTIONS,

    /// Mispredicted branch instructions.
    #[serde(rename = "branch-misses")]
    #[strum(serialize = "branch-misses", to_string = "Branch Misses")]
    BranchMisses = PERF_COUNT_HW_BRANCH_MISSES,

    /// Bus cycles, which can differ from total cycles.
    #[serde(rename = "bus-cycles")]
    #[strum(serialize = "bus-cycles", to_string = "Bus Cycles")]
    BusCycles = PERF_COUNT_HW_BUS_CYCLES,

    /// Stalled cycles during issue.
    #[serde(rename = "stalled-cycles-frontend")]
    #[strum(serialize = "stalled-cycles-frontend", to_string = "Stalled Cycles, Frontend")]
    StalledCyclesFrontend = PERF_COUNT_HW_STALLED_CYCLES_FRONTEND,

    /// Stalled cycles during retirement.
    #[serde(rename = "stalled-cycles-backend")]
    #[strum(serialize = "stalled-cycles-backend", to_string = "Stalled Cycles, Backend")]
    StalledCyclesBackend = PERF_COUNT_HW_STALLED_CYCLES_BACKEND,

    /// Total cycles, immune to frequency scaling.
    #[serde(rename = "ref-cpu-cycles")]
    #[strum(serialize = "ref-cpu-cycles", to_string = "Total CPU Cycles")]
    RefCpuCycles = PERF_COUNT_HW_REF_CPU_CYCLES,
}

#[repr(u64)]
#[derive(
    Clone, Copy, Debug, Display, EnumIter, EnumString, Eq, PartialEq, PartialOrd, Ord, Serialize,
)]
pub enum SwEvent {
    /// High-resolution per-CPU timer.
    #[serde(rename = "cpu-clock")]
    #[strum(serialize = "cpu-clock", to_string = "CPU Clock")]
    CpuClock = PERF_COUNT_SW_CPU_CLOCK,

    /// Clock count specific to the running task.
    #[serde(rename = "task-clock")]
    #[strum(serialize = "task-clock", to_string = "Task Clock")]
    TaskClock = PERF_COUNT_SW_TASK_CLOCK,

    /// Context switches.
    #[serde(rename = "context-switches")]
    #[strum(serialize = "context-switches", to_string = "Context Switches")]
    ContextSwitches = PERF_COUNT_SW_CONTEXT_SWITCHES,

    /// Times the process migrated to a new CPU.
    #[serde(rename = "cpu-migrations")]
    #[strum(serialize = "cpu-migrations", to_string = "CPU Migrations")]
    CpuMigrations = PERF_COUNT_SW_CPU_MIGRATIONS,

    /// All page faults.
    #[serde(rename = "page-faults")]
    #[strum(serialize = "page-faults", to_string = "Page Faults")]
    PageFaults = PERF_COUNT_SW_PAGE_FAULTS,

    /// Page faults served without disk I/O.
    #[serde(rename = "page-faults-minor")]
    #[strum(serialize = "page-faults-minor", to_string = "Page Faults, Minor")]
    PageFaultsMinor = PERF_COUNT_SW_PAGE_FAULTS_MIN,

    /// Page faults that needed disk I/O.
    #[serde(rename = "page-faults-major")]
    #[strum(serialize = "page-faults-major", to_string = "Page Faults, Major")]
    PageFaultsMajor = PERF_COUNT_SW_PAGE_FAULTS_MAJ,

    /// Unaligned accesses the kernel fixed up. Never fires on x86.
    #[serde(rename = "alignment-faults")]
    #[strum(serialize = "alignment-faults", to_string = "Alignment Faults")]
    AlignmentFaults = PERF_COUNT_SW_ALIGNMENT_FAULTS,

    /// Instructions the kernel emulated for user space.
    #[serde(rename = "emulation-faults")]
    #[strum(serialize = "emulation-faults", to_string = "Emulation Faults")]
    EmulationFaults = PERF_COUNT_SW_EMULATION_FAULTS,
}

/// A `<cache>-<op>-<result>` triple, e.g. `l1d-read-miss`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub struct CacheSpec(pub CacheId, pub CacheOp, pub CacheResult);

impl CacheSpec {
    fn parse(name: &str) -> Option<CacheSpec> {
        let mut parts = name.splitn(3, '-');
        let id = parts.next().and_then(|t| t.parse::<CacheId>().ok());
        let op = parts.next().and_then(|t| t.parse::<CacheOp>().ok());
        let result = parts.next().and_then(|t| t.parse::<CacheResult>().ok());
        match (id, op, result) {
            (Some(id), Some(op), Some(result)) => Some(CacheSpec(id, op, result)),
            _ => None,
        }
    }
}

impl Serialize for CacheSpec {
    fn serialize<S>(&self, serializer: S) -> ::std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&format_args!(
            "{}-{}-{}",
            self.0.token(),
            self.1.token(),
            self.2.token()
        ))
    }
}

impl Display for CacheSpec {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.write_fmt(format_args!("{} {} {}", self.0, self.1, self.2))
    }
}

#[repr(u64)]
#[derive(Clone, Copy, Debug, Display, EnumIter, EnumString, Eq, PartialEq, PartialOrd, Ord)]
pub enum CacheId {
    #[strum(serialize = "l1d", to_string = "Level 1 Data Cache")]
    Level1Data = PERF_COUNT_HW_CACHE_L1D,

    #[strum(serialize = "l1i", to_string = "Level 1 Instruction Cache")]
    Level1Instruction = PERF_COUNT_HW_CACHE_L1I,

    #[strum(serialize = "ll", to_string = "Last-Level Cache")]
    LastLevel = PERF_COUNT_HW_CACHE_LL,

    #[strum(serialize = "dtlb", to_string = "Data TLB")]
    DataTLB = PERF_COUNT_HW_CACHE_DTLB,

    #[strum(serialize = "itlb", to_string = "Instruction TLB")]
    InstructionTLB = PERF_COUNT_HW_CACHE_ITLB,

    #[strum(serialize = "bpu", to_string = "Branch Prediction Unit")]
    BranchPredictionUnit = PERF_COUNT_HW_CACHE_BPU,

    #[strum(serialize = "node", to_string = "Local Memory Accesses")]
    Node = PERF_COUNT_HW_CACHE_NODE,
}

impl CacheId {
    fn token(&self) -> &'static str {
        match *self {
            CacheId::Level1Data => "l1d",
            CacheId::Level1Instruction => "l1i",
            CacheId::LastLevel => "ll",
            CacheId::DataTLB => "dtlb",
            CacheId::InstructionTLB => "itlb",
            CacheId::BranchPredictionUnit => "bpu",
            CacheId::Node => "node",
        }
    }
}

#[repr(u64)]
#[derive(Clone, Copy, Debug, Display, EnumIter, EnumString, Eq, PartialEq, PartialOrd, Ord)]
pub enum CacheOp {
    #[strum(serialize = "read", to_string = "Read")]
    Read = PERF_COUNT_HW_CACHE_OP_READ,

    #[strum(serialize = "write", to_string = "Write")]
    Write = PERF_COUNT_HW_CACHE_OP_WRITE,

    #[strum(serialize = "prefetch", to_string = "Prefetch")]
    Prefetch = PERF_COUNT_HW_CACHE_OP_PREFETCH,
}

impl CacheOp {
    fn token(&self) -> &'static str {
        match *self {
            CacheOp::Read => "read",
            CacheOp::Write => "write",
            CacheOp::Prefetch => "prefetch",
        }
    }
}

#[repr(u64)]
#[derive(Clone, Copy, Debug, Display, EnumIter, EnumString, Eq, PartialEq, PartialOrd, Ord)]
pub enum CacheResult {
    #[strum(serialize = "access", to_string = "Access")]
    Access = PERF_COUNT_HW_CACHE_RESULT_ACCESS,

    #[strum(serialize = "miss", to_string = "Miss")]
    Miss = PERF_COUNT_HW_CACHE_RESULT_MISS,
}

impl CacheResult {
    fn token(&self) -> &'static str {
        match *self {
            CacheResult::Access => "access",
            CacheResult::Miss => "miss",
        }
    }
}
