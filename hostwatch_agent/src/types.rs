//! Data types shipped to the ingestion endpoint.
//! Keep this module minimal and stable; it defines the wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Round to two decimal places; used for every derived percentage and GB value.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

pub fn bytes_to_gb(bytes: u64) -> f64 {
    round2(bytes as f64 / BYTES_PER_GB)
}

/// `used / total * 100`, or 0 when the total is unknown/zero.
pub fn percent_of(used: u64, total: u64) -> f64 {
    if total > 0 {
        round2(used as f64 / total as f64 * 100.0)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricFamily {
    Cpu,
    Memory,
    Disk,
    Swap,
}

impl MetricFamily {
    pub const ALL: [MetricFamily; 4] = [Self::Cpu, Self::Memory, Self::Disk, Self::Swap];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::Disk => "disk",
            Self::Swap => "swap",
        }
    }
}

impl fmt::Display for MetricFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct CpuMetrics {
    pub overall_percent: f64,
    pub per_core_percent: Vec<f64>,
    pub core_count_physical: Option<usize>,
    pub core_count_logical: usize,
    pub load_average: Option<[f64; 3]>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct MemoryMetrics {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub available_bytes: u64,
    pub percent_used: f64,
    pub buffers_bytes: u64,
    pub cached_bytes: u64,
    pub shared_bytes: u64,
    pub total_gb: f64,
    pub used_gb: f64,
    pub available_gb: f64,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct SwapMetrics {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub percent_used: f64,
    pub total_gb: f64,
    pub used_gb: f64,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct FilesystemUsage {
    pub device: String,
    pub mountpoint: String,
    pub filesystem_type: String,
    pub options: String,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub percent_used: f64,
    pub total_gb: f64,
    pub used_gb: f64,
    pub free_gb: f64,
}

#[derive(Debug, Serialize, Clone, Default, PartialEq, Eq)]
pub struct DiskIoStats {
    pub read_count: u64,
    pub write_count: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub read_time_ms: u64,
    pub write_time_ms: u64,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct DiskMetrics {
    pub filesystems: Vec<FilesystemUsage>,
    pub io_stats: Option<DiskIoStats>,
}

// cumulative totals since boot (collector should diff to get rates)
#[derive(Debug, Serialize, Clone, Default, PartialEq, Eq)]
pub struct NetworkMetrics {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
    pub errin: u64,
    pub errout: u64,
    pub dropin: u64,
    pub dropout: u64,
}

/// Every family of a successful sample.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct HostSample {
    pub cpu: CpuMetrics,
    pub memory: MemoryMetrics,
    pub swap: SwapMetrics,
    pub disk: DiskMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkMetrics>,
}

/// A snapshot is either a full sample or an error marker, never both.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum SnapshotBody {
    Sample(Box<HostSample>),
    Failed { error: String },
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct MetricSnapshot {
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    pub collection_duration_ms: u64,
    #[serde(flatten)]
    pub body: SnapshotBody,
}

impl MetricSnapshot {
    pub fn sample(&self) -> Option<&HostSample> {
        match &self.body {
            SnapshotBody::Sample(s) => Some(s),
            SnapshotBody::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.body {
            SnapshotBody::Failed { error } => Some(error),
            SnapshotBody::Sample(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error().is_some()
    }
}

/// Body POSTed to the ingestion endpoint.
#[derive(Debug, Serialize)]
pub struct IngestPayload<'a> {
    pub hostname: &'a str,
    pub metrics: &'a MetricSnapshot,
}
