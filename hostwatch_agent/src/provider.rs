//! Raw OS counters consumed by the snapshot builder.
//!
//! [`SystemMetricsProvider`] is the seam between the control loop and the
//! platform. The production implementation lives in [`crate::metrics`];
//! tests substitute an in-memory provider.

use crate::error::AcquisitionError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VirtualMemory {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub available: u64,
    pub percent: f64,
    pub buffers: u64,
    pub cached: u64,
    pub shared: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SwapMemory {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskPartition {
    pub device: String,
    pub mountpoint: String,
    pub fstype: String,
    pub opts: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskUsage {
    pub total: u64,
    pub used: u64,
    pub free: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskIoCounters {
    pub read_count: u64,
    pub write_count: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub read_time_ms: u64,
    pub write_time_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetIoCounters {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
    pub errin: u64,
    pub errout: u64,
    pub dropin: u64,
    pub dropout: u64,
}

/// Point-in-time access to host counters. Calls may block on slow OS reads.
pub trait SystemMetricsProvider: Send + Sync {
    fn hostname(&self) -> String;

    /// Per-core percentages when `per_core`, otherwise a single overall value.
    fn cpu_percent(&self, per_core: bool) -> Result<Vec<f64>, AcquisitionError>;

    /// `None` when the platform cannot tell (physical cores on some VMs).
    fn cpu_count(&self, physical_only: bool) -> Option<usize>;

    fn load_average(&self) -> Option<[f64; 3]>;

    fn virtual_memory(&self) -> Result<VirtualMemory, AcquisitionError>;

    fn swap_memory(&self) -> Result<SwapMemory, AcquisitionError>;

    fn disk_partitions(&self) -> Result<Vec<DiskPartition>, AcquisitionError>;

    fn disk_usage(&self, mountpoint: &str) -> Result<DiskUsage, AcquisitionError>;

    fn disk_io_counters(&self) -> Result<Option<DiskIoCounters>, AcquisitionError>;

    fn net_io_counters(&self) -> Result<NetIoCounters, AcquisitionError>;
}
