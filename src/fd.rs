//! One file descriptor per counted event.

use std::fs::File;
use std::io::{self, Read};
use std::mem::size_of;
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::slice;

use nix;
use nix::errno::Errno;

use events::Event;
use sys;

/// A counting perf_event descriptor for a single event, bound to the
/// calling thread on whichever CPU it runs. Opened disabled; the event-set
/// layer decides when it ticks.
#[derive(Debug)]
pub struct PerfEventFile(pub(crate) File, pub(crate) Event);

impl PerfEventFile {
    pub fn open(event: Event) -> ::std::result::Result<Self, OpenError> {
        let (type_, config) = event.type_and_config();
        let attr = sys::counting_attr(type_, config);
        // NOTE(unsafe) the attr outlives the call and the kernel promises a
        // valid fd for any return other than -1
        unsafe {
            match sys::perf_event_open(&attr, 0, -1, -1, 0) {
                -1 => Err(OpenError::from(Errno::last())),
                fd => Ok(PerfEventFile(File::from_raw_fd(fd), event)),
            }
        }
    }

    pub fn enable(&self) -> nix::Result<()> {
        unsafe { sys::perf_event_ioc_enable(self.0.as_raw_fd()).map(|_| ()) }
    }

    pub fn disable(&self) -> nix::Result<()> {
        unsafe { sys::perf_event_ioc_disable(self.0.as_raw_fd()).map(|_| ()) }
    }

    pub fn reset(&self) -> nix::Result<()> {
        unsafe { sys::perf_event_ioc_reset(self.0.as_raw_fd()).map(|_| ()) }
    }

    /// The running total since the last reset.
    pub fn value(&mut self) -> io::Result<u64> {
        let mut value: u64 = 0;

        // NOTE(unsafe): we're just generating a pointer to a stack variable,
        // not saving that pointer beyond this stack frame
        let value_slice = unsafe {
            let ptr = (&mut value as *mut u64) as *mut u8;
            let len = size_of::<u64>();
            slice::from_raw_parts_mut(ptr, len)
        };

        self.0.read_exact(value_slice)?;

        Ok(value)
    }

    pub fn event(&self) -> Event {
        self.1
    }
}

#[derive(Debug, Fail)]
pub enum OpenError {
    #[fail(
        display = "the perf_event_attr size is not one the kernel accepts; the \
                   library and the running kernel disagree about the ABI"
    )]
    AttrWrongSize,
    #[fail(
        display = "the requested event needs CAP_SYS_ADMIN or a more permissive \
                   perf_event_paranoid setting"
    )]
    CapSysAdminRequired,
    #[fail(display = "another event already has exclusive access to the PMU")]
    PmuBusy,
    #[fail(
        display = "the event is invalid here: out-of-range config, a CPU that \
                   does not exist, or no room left to schedule it"
    )]
    InvalidEvent,
    #[fail(
        display = "each counted event holds a file descriptor and the \
                   per-process descriptor limit has been reached"
    )]
    TooManyOpenFiles,
    #[fail(display = "the event involves a feature the current CPU does not have")]
    CpuFeatureUnsupported,
    #[fail(display = "the event type is not valid on this kernel")]
    InvalidEventType,
    #[fail(display = "no hardware support for the requested event")]
    HardwareFeatureUnsupported,
    #[fail(display = "the kernel returned an unexpected error code: {:?}", errno)]
    Unknown { errno: Errno },
}

impl From<Errno> for OpenError {
    fn from(errno: Errno) -> OpenError {
        match errno {
            Errno::E2BIG => OpenError::AttrWrongSize,
            Errno::EACCES | Errno::EPERM => OpenError::CapSysAdminRequired,
            Errno::EBUSY => OpenError::PmuBusy,
            Errno::EINVAL | Errno::ENOSPC => OpenError::InvalidEvent,
            Errno::EMFILE => OpenError::TooManyOpenFiles,
            Errno::ENODEV => OpenError::CpuFeatureUnsupported,
            Errno::ENOENT => OpenError::InvalidEventType,
            Errno::EOPNOTSUPP => OpenError::HardwareFeatureUnsupported,
            errno => OpenError::Unknown { errno },
        }
    }
}
