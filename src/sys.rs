//! Hand-declared slice of the perf_event_open ABI.
//!
//! Only what counting needs: the attr struct, the type/config constants for
//! generalised events, and the enable/disable/reset ioctls. Sampling-side
//! fields exist solely to keep the struct the size the kernel expects.

#![allow(non_camel_case_types)]

use libc::{c_int, c_ulong, pid_t, syscall, SYS_perf_event_open};

pub const PERF_TYPE_HARDWARE: u32 = 0;
pub const PERF_TYPE_SOFTWARE: u32 = 1;
pub const PERF_TYPE_HW_CACHE: u32 = 3;

pub const PERF_COUNT_HW_CPU_CYCLES: u64 = 0;
pub const PERF_COUNT_HW_INSTRUCTIONS: u64 = 1;
pub const PERF_COUNT_HW_CACHE_REFERENCES: u64 = 2;
pub const PERF_COUNT_HW_CACHE_MISSES: u64 = 3;
pub const PERF_COUNT_HW_BRANCH_INSTRUCTIONS: u64 = 4;
pub const PERF_COUNT_HW_BRANCH_MISSES: u64 = 5;
pub const PERF_COUNT_HW_BUS_CYCLES: u64 = 6;
pub const PERF_COUNT_HW_STALLED_CYCLES_FRONTEND: u64 = 7;
pub const PERF_COUNT_HW_STALLED_CYCLES_BACKEND: u64 = 8;
pub const PERF_COUNT_HW_REF_CPU_CYCLES: u64 = 9;

pub const PERF_COUNT_SW_CPU_CLOCK: u64 = 0;
pub const PERF_COUNT_SW_TASK_CLOCK: u64 = 1;
pub const PERF_COUNT_SW_PAGE_FAULTS: u64 = 2;
pub const PERF_COUNT_SW_CONTEXT_SWITCHES: u64 = 3;
pub const PERF_COUNT_SW_CPU_MIGRATIONS: u64 = 4;
pub const PERF_COUNT_SW_PAGE_FAULTS_MIN: u64 = 5;
pub const PERF_COUNT_SW_PAGE_FAULTS_MAJ: u64 = 6;
pub const PERF_COUNT_SW_ALIGNMENT_FAULTS: u64 = 7;
pub const PERF_COUNT_SW_EMULATION_FAULTS: u64 = 8;

pub const PERF_COUNT_HW_CACHE_L1D: u64 = 0;
pub const PERF_COUNT_HW_CACHE_L1I: u64 = 1;
pub const PERF_COUNT_HW_CACHE_LL: u64 = 2;
pub const PERF_COUNT_HW_CACHE_DTLB: u64 = 3;
pub const PERF_COUNT_HW_CACHE_ITLB: u64 = 4;
pub const PERF_COUNT_HW_CACHE_BPU: u64 = 5;
pub const PERF_COUNT_HW_CACHE_NODE: u64 = 6;

pub const PERF_COUNT_HW_CACHE_OP_READ: u64 = 0;
pub const PERF_COUNT_HW_CACHE_OP_WRITE: u64 = 1;
pub const PERF_COUNT_HW_CACHE_OP_PREFETCH: u64 = 2;

pub const PERF_COUNT_HW_CACHE_RESULT_ACCESS: u64 = 0;
pub const PERF_COUNT_HW_CACHE_RESULT_MISS: u64 = 1;

/// PERF_ATTR_SIZE_VER5; the layout below adds up to exactly this.
pub const PERF_ATTR_SIZE: u32 = 112;

bitflags! {
    /// The bitfield word of `perf_event_attr`, from the low bit up:
    /// disabled, inherit, pinned, exclusive, exclude_user, exclude_kernel,
    /// exclude_hv, exclude_idle. We only ever set a few of them.
    pub struct AttrFlags: u64 {
        const DISABLED = 1;
        const INHERIT = 1 << 1;
        const EXCLUDE_USER = 1 << 4;
        const EXCLUDE_KERNEL = 1 << 5;
        const EXCLUDE_HV = 1 << 6;
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct perf_event_attr {
    pub type_: u32,
    pub size: u32,
    pub config: u64,
    pub sample_period_or_freq: u64,
    pub sample_type: u64,
    pub read_format: u64,
    pub flags: u64,
    pub wakeup_events_or_watermark: u32,
    pub bp_type: u32,
    pub bp_addr_or_config1: u64,
    pub bp_len_or_config2: u64,
    pub branch_sample_type: u64,
    pub sample_regs_user: u64,
    pub sample_stack_user: u32,
    pub clockid: i32,
    pub sample_regs_intr: u64,
    pub aux_watermark: u32,
    pub sample_max_stack: u16,
    pub __reserved_2: u16,
}

/// A fully-zeroed attr set up for counting: disabled until started, one
/// counter per descriptor, user space only.
pub fn counting_attr(type_: u32, config: u64) -> perf_event_attr {
    let mut attr = perf_event_attr::default();
    attr.type_ = type_;
    attr.size = PERF_ATTR_SIZE;
    attr.config = config;
    attr.flags = (AttrFlags::DISABLED | AttrFlags::EXCLUDE_KERNEL | AttrFlags::EXCLUDE_HV).bits();
    attr
}

/// Raw perf_event_open. Returns the new fd, or -1 with errno set.
pub unsafe fn perf_event_open(
    attr: *const perf_event_attr,
    pid: pid_t,
    cpu: c_int,
    group_fd: c_int,
    flags: c_ulong,
) -> c_int {
    syscall(SYS_perf_event_open, attr, pid, cpu, group_fd, flags) as c_int
}

const PERF_EVENT_IOC_MAGIC: u8 = b'$';
const PERF_EVENT_IOC_ENABLE_MODE: u8 = 0;
const PERF_EVENT_IOC_DISABLE_MODE: u8 = 1;
const PERF_EVENT_IOC_RESET_MODE: u8 = 3;

ioctl!(none perf_event_ioc_enable with PERF_EVENT_IOC_MAGIC, PERF_EVENT_IOC_ENABLE_MODE);
ioctl!(none perf_event_ioc_disable with PERF_EVENT_IOC_MAGIC, PERF_EVENT_IOC_DISABLE_MODE);
ioctl!(none perf_event_ioc_reset with PERF_EVENT_IOC_MAGIC, PERF_EVENT_IOC_RESET_MODE);
