//! In-memory fakes shared by unit tests.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{AcquisitionError, AlertError, TransportError};
use crate::notify::{AlertChannel, AlertSink};
use crate::provider::{
    DiskIoCounters, DiskPartition, DiskUsage, NetIoCounters, SwapMemory, SystemMetricsProvider,
    VirtualMemory,
};
use crate::transmit::IngestionSink;
use crate::types::{
    CpuMetrics, DiskMetrics, FilesystemUsage, HostSample, MemoryMetrics, MetricSnapshot,
    SnapshotBody, SwapMetrics,
};

const GIB: u64 = 1024 * 1024 * 1024;

pub struct FakeProvider {
    pub partitions: Vec<DiskPartition>,
    pub usage: HashMap<String, DiskUsage>,
    pub io: Option<DiskIoCounters>,
    pub fail_cpu: bool,
    pub fail_memory: bool,
    pub fail_swap: bool,
    pub fail_partitions: bool,
    pub fail_network: bool,
    pub panic_on_cpu: bool,
    /// Time spent inside `virtual_memory` before it answers (or fails).
    pub memory_latency: Duration,
}

impl FakeProvider {
    pub fn healthy() -> Self {
        let partitions = vec![
            DiskPartition {
                device: "/dev/sda1".into(),
                mountpoint: "/".into(),
                fstype: "ext4".into(),
                opts: "rw,relatime".into(),
            },
            DiskPartition {
                device: "/dev/sda2".into(),
                mountpoint: "/home".into(),
                fstype: "ext4".into(),
                opts: "rw,relatime".into(),
            },
        ];
        let usage = HashMap::from([
            (
                "/".to_string(),
                DiskUsage {
                    total: 100 * GIB,
                    used: 50 * GIB,
                    free: 50 * GIB,
                },
            ),
            (
                "/home".to_string(),
                DiskUsage {
                    total: 200 * GIB,
                    used: 60 * GIB,
                    free: 140 * GIB,
                },
            ),
        ]);
        Self {
            partitions,
            usage,
            io: Some(DiskIoCounters {
                read_count: 1_000_000,
                write_count: 500_000,
                read_bytes: 10 * GIB,
                write_bytes: 5 * GIB,
                read_time_ms: 120_000,
                write_time_ms: 80_000,
            }),
            fail_cpu: false,
            fail_memory: false,
            fail_swap: false,
            fail_partitions: false,
            fail_network: false,
            panic_on_cpu: false,
            memory_latency: Duration::ZERO,
        }
    }
}

impl SystemMetricsProvider for FakeProvider {
    fn hostname(&self) -> String {
        "test-host".into()
    }

    fn cpu_percent(&self, per_core: bool) -> Result<Vec<f64>, AcquisitionError> {
        if self.panic_on_cpu {
            panic!("cpu counters exploded");
        }
        if self.fail_cpu {
            return Err(AcquisitionError::unavailable("cpu", "permission denied"));
        }
        Ok(if per_core {
            vec![25.0, 30.0, 35.0, 40.0]
        } else {
            vec![45.5]
        })
    }

    fn cpu_count(&self, physical_only: bool) -> Option<usize> {
        Some(if physical_only { 4 } else { 8 })
    }

    fn load_average(&self) -> Option<[f64; 3]> {
        Some([1.0, 1.5, 2.0])
    }

    fn virtual_memory(&self) -> Result<VirtualMemory, AcquisitionError> {
        if !self.memory_latency.is_zero() {
            std::thread::sleep(self.memory_latency);
        }
        if self.fail_memory {
            return Err(AcquisitionError::unavailable("memory", "meminfo unreadable"));
        }
        Ok(VirtualMemory {
            total: 8 * GIB,
            used: 4 * GIB,
            free: 2 * GIB,
            available: 4 * GIB,
            percent: 50.0,
            buffers: 256 * 1024 * 1024,
            cached: GIB,
            shared: 128 * 1024 * 1024,
        })
    }

    fn swap_memory(&self) -> Result<SwapMemory, AcquisitionError> {
        if self.fail_swap {
            return Err(AcquisitionError::unavailable("swap", "swap accounting disabled"));
        }
        Ok(SwapMemory {
            total: 2 * GIB,
            used: GIB / 2,
            free: GIB * 3 / 2,
            percent: 25.0,
        })
    }

    fn disk_partitions(&self) -> Result<Vec<DiskPartition>, AcquisitionError> {
        if self.fail_partitions {
            return Err(AcquisitionError::unavailable("disk partitions", "mount table unreadable"));
        }
        Ok(self.partitions.clone())
    }

    fn disk_usage(&self, mountpoint: &str) -> Result<DiskUsage, AcquisitionError> {
        self.usage
            .get(mountpoint)
            .copied()
            .ok_or_else(|| AcquisitionError::UnknownMountpoint(mountpoint.to_string()))
    }

    fn disk_io_counters(&self) -> Result<Option<DiskIoCounters>, AcquisitionError> {
        Ok(self.io)
    }

    fn net_io_counters(&self) -> Result<NetIoCounters, AcquisitionError> {
        if self.fail_network {
            return Err(AcquisitionError::unavailable("network", "no interfaces"));
        }
        Ok(NetIoCounters {
            bytes_sent: 1_000_000,
            bytes_recv: 2_000_000,
            packets_sent: 1000,
            packets_recv: 2000,
            ..NetIoCounters::default()
        })
    }
}

/// A successful snapshot with the given usage percentages and one filesystem
/// per `(mountpoint, percent)` pair.
pub fn sample_snapshot(cpu: f64, memory: f64, swap: f64, disks: &[(&str, f64)]) -> MetricSnapshot {
    let filesystems = disks
        .iter()
        .map(|&(mount, percent)| FilesystemUsage {
            device: format!("/dev/fake{}", mount.replace('/', "_")),
            mountpoint: mount.to_string(),
            filesystem_type: "ext4".into(),
            options: "rw".into(),
            total_bytes: 100 * GIB,
            used_bytes: (percent * GIB as f64) as u64,
            free_bytes: ((100.0 - percent) * GIB as f64) as u64,
            percent_used: percent,
            total_gb: 100.0,
            used_gb: percent,
            free_gb: 100.0 - percent,
        })
        .collect();
    MetricSnapshot {
        timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        hostname: "test-host".into(),
        collection_duration_ms: 3,
        body: SnapshotBody::Sample(Box::new(HostSample {
            cpu: CpuMetrics {
                overall_percent: cpu,
                per_core_percent: vec![cpu, cpu],
                core_count_physical: Some(1),
                core_count_logical: 2,
                load_average: None,
            },
            memory: MemoryMetrics {
                total_bytes: 8 * GIB,
                used_bytes: 0,
                free_bytes: 0,
                available_bytes: 0,
                percent_used: memory,
                buffers_bytes: 0,
                cached_bytes: 0,
                shared_bytes: 0,
                total_gb: 8.0,
                used_gb: 0.0,
                available_gb: 0.0,
            },
            swap: SwapMetrics {
                total_bytes: 2 * GIB,
                used_bytes: 0,
                free_bytes: 0,
                percent_used: swap,
                total_gb: 2.0,
                used_gb: 0.0,
            },
            disk: DiskMetrics {
                filesystems,
                io_stats: None,
            },
            network: None,
        })),
    }
}

#[derive(Default)]
pub struct RecordingAlertSink {
    calls: Mutex<Vec<(AlertChannel, String)>>,
    failing: Option<AlertChannel>,
}

impl RecordingAlertSink {
    pub fn failing_on(channel: AlertChannel) -> Self {
        Self {
            calls: Mutex::default(),
            failing: Some(channel),
        }
    }

    pub fn calls(&self) -> Vec<(AlertChannel, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn notify(&self, channel: AlertChannel, message: &str) -> Result<(), AlertError> {
        self.calls.lock().unwrap().push((channel, message.to_string()));
        if self.failing == Some(channel) {
            Err(AlertError::Rejected(500))
        } else {
            Ok(())
        }
    }
}

type Fallback = Box<dyn Fn() -> Result<(), TransportError> + Send + Sync>;

/// Ingestion sink that replays a scripted list of outcomes, then falls back
/// to `fallback` (success by default).
pub struct ScriptedSink {
    script: Mutex<VecDeque<Result<(), TransportError>>>,
    fallback: Option<Fallback>,
    payloads: Mutex<Vec<Vec<u8>>>,
    delay: Duration,
    started: AtomicUsize,
    completed: AtomicUsize,
}

impl ScriptedSink {
    pub fn new(script: Vec<Result<(), TransportError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            payloads: Mutex::default(),
            delay: Duration::ZERO,
            started: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    pub fn always(f: impl Fn() -> Result<(), TransportError> + Send + Sync + 'static) -> Self {
        Self {
            fallback: Some(Box::new(f)),
            ..Self::new(Vec::new())
        }
    }

    /// Every post takes `delay` of (tokio) time before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl IngestionSink for ScriptedSink {
    async fn post(
        &self,
        _url: &str,
        payload: &[u8],
        _timeout: Duration,
    ) -> Result<(), TransportError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.payloads.lock().unwrap().push(payload.to_vec());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        let out = match next {
            Some(r) => r,
            None => match &self.fallback {
                Some(f) => f(),
                None => Ok(()),
            },
        };
        self.completed.fetch_add(1, Ordering::SeqCst);
        out
    }
}
