//! Turns provider calls into one [`MetricSnapshot`].
//!
//! `build()` never fails: a family that cannot be sampled either drops out
//! (single filesystem, I/O counters, network) or turns the whole snapshot
//! into an error marker (cpu, memory, swap, partition list).

use chrono::{SubsecRound, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::error::AcquisitionError;
use crate::provider::SystemMetricsProvider;
use crate::types::{
    bytes_to_gb, percent_of, round2, CpuMetrics, DiskIoStats, DiskMetrics, FilesystemUsage,
    HostSample, MemoryMetrics, MetricSnapshot, NetworkMetrics, SnapshotBody, SwapMetrics,
};

/// Filesystem types that never represent real storage.
pub const PSEUDO_FILESYSTEMS: [&str; 4] = ["tmpfs", "devtmpfs", "squashfs", "overlay"];

pub struct SnapshotBuilder {
    provider: Arc<dyn SystemMetricsProvider>,
    include_network: bool,
}

impl SnapshotBuilder {
    pub fn new(provider: Arc<dyn SystemMetricsProvider>, include_network: bool) -> Self {
        Self {
            provider,
            include_network,
        }
    }

    pub fn build(&self) -> MetricSnapshot {
        let started = Instant::now();
        let timestamp = Utc::now().trunc_subsecs(0);
        let hostname = self.provider.hostname();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.sample()));
        let body = match outcome {
            Ok(Ok(sample)) => SnapshotBody::Sample(Box::new(sample)),
            Ok(Err(e)) => {
                warn!(error = %e, "metric collection failed");
                SnapshotBody::Failed {
                    error: e.to_string(),
                }
            }
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                warn!(error = %msg, "metric collection panicked");
                SnapshotBody::Failed {
                    error: format!("collection panicked: {msg}"),
                }
            }
        };

        let collection_duration_ms = started.elapsed().as_millis() as u64;
        debug!(
            collection_duration_ms,
            error = matches!(body, SnapshotBody::Failed { .. }),
            "snapshot built"
        );
        MetricSnapshot {
            timestamp,
            hostname,
            collection_duration_ms,
            body,
        }
    }

    fn sample(&self) -> Result<HostSample, AcquisitionError> {
        let cpu = self.cpu()?;
        let memory = self.memory()?;
        let swap = self.swap()?;
        let disk = self.disk()?;
        let network = if self.include_network {
            match self.provider.net_io_counters() {
                Ok(c) => Some(NetworkMetrics {
                    bytes_sent: c.bytes_sent,
                    bytes_recv: c.bytes_recv,
                    packets_sent: c.packets_sent,
                    packets_recv: c.packets_recv,
                    errin: c.errin,
                    errout: c.errout,
                    dropin: c.dropin,
                    dropout: c.dropout,
                }),
                Err(e) => {
                    warn!(error = %e, "network counters unavailable, omitting");
                    None
                }
            }
        } else {
            None
        };
        Ok(HostSample {
            cpu,
            memory,
            swap,
            disk,
            network,
        })
    }

    fn cpu(&self) -> Result<CpuMetrics, AcquisitionError> {
        let per_core: Vec<f64> = self
            .provider
            .cpu_percent(true)?
            .into_iter()
            .map(round2)
            .collect();
        let overall = self
            .provider
            .cpu_percent(false)?
            .first()
            .copied()
            .ok_or_else(|| AcquisitionError::unavailable("cpu", "no overall value"))?;
        let logical = self
            .provider
            .cpu_count(false)
            .unwrap_or(per_core.len());
        Ok(CpuMetrics {
            overall_percent: round2(overall),
            per_core_percent: per_core,
            core_count_physical: self.provider.cpu_count(true),
            core_count_logical: logical,
            load_average: self.provider.load_average(),
        })
    }

    fn memory(&self) -> Result<MemoryMetrics, AcquisitionError> {
        let vm = self.provider.virtual_memory()?;
        Ok(MemoryMetrics {
            total_bytes: vm.total,
            used_bytes: vm.used,
            free_bytes: vm.free,
            available_bytes: vm.available,
            percent_used: round2(vm.percent),
            buffers_bytes: vm.buffers,
            cached_bytes: vm.cached,
            shared_bytes: vm.shared,
            total_gb: bytes_to_gb(vm.total),
            used_gb: bytes_to_gb(vm.used),
            available_gb: bytes_to_gb(vm.available),
        })
    }

    fn swap(&self) -> Result<SwapMetrics, AcquisitionError> {
        let sw = self.provider.swap_memory()?;
        Ok(SwapMetrics {
            total_bytes: sw.total,
            used_bytes: sw.used,
            free_bytes: sw.free,
            percent_used: round2(sw.percent),
            total_gb: bytes_to_gb(sw.total),
            used_gb: bytes_to_gb(sw.used),
        })
    }

    fn disk(&self) -> Result<DiskMetrics, AcquisitionError> {
        let partitions = self.provider.disk_partitions()?;
        let mut filesystems = Vec::with_capacity(partitions.len());
        for part in partitions {
            if PSEUDO_FILESYSTEMS.contains(&part.fstype.as_str()) {
                continue;
            }
            let usage = match self.provider.disk_usage(&part.mountpoint) {
                Ok(u) => u,
                Err(e) => {
                    warn!(
                        mountpoint = %part.mountpoint,
                        error = %e,
                        "skipping unreadable filesystem"
                    );
                    continue;
                }
            };
            filesystems.push(FilesystemUsage {
                device: part.device,
                mountpoint: part.mountpoint,
                filesystem_type: part.fstype,
                options: part.opts,
                total_bytes: usage.total,
                used_bytes: usage.used,
                free_bytes: usage.free,
                percent_used: percent_of(usage.used, usage.total),
                total_gb: bytes_to_gb(usage.total),
                used_gb: bytes_to_gb(usage.used),
                free_gb: bytes_to_gb(usage.free),
            });
        }

        let io_stats = match self.provider.disk_io_counters() {
            Ok(c) => c.map(|c| DiskIoStats {
                read_count: c.read_count,
                write_count: c.write_count,
                read_bytes: c.read_bytes,
                write_bytes: c.write_bytes,
                read_time_ms: c.read_time_ms,
                write_time_ms: c.write_time_ms,
            }),
            Err(e) => {
                warn!(error = %e, "disk i/o counters unavailable, omitting");
                None
            }
        };

        Ok(DiskMetrics {
            filesystems,
            io_stats,
        })
    }
}

pub(crate) fn panic_message(p: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = p.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = p.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{DiskIoCounters, DiskPartition, DiskUsage};
    use crate::testing::FakeProvider;

    fn part(device: &str, mountpoint: &str, fstype: &str) -> DiskPartition {
        DiskPartition {
            device: device.into(),
            mountpoint: mountpoint.into(),
            fstype: fstype.into(),
            opts: "rw,relatime".into(),
        }
    }

    #[test]
    fn builds_full_sample() {
        let fake = FakeProvider::healthy();
        let snap = SnapshotBuilder::new(Arc::new(fake), true).build();

        assert_eq!(snap.hostname, "test-host");
        assert_eq!(snap.timestamp.timestamp_subsec_nanos(), 0);
        let s = snap.sample().expect("sample");
        assert_eq!(s.cpu.overall_percent, 45.5);
        assert_eq!(s.cpu.per_core_percent, vec![25.0, 30.0, 35.0, 40.0]);
        assert_eq!(s.cpu.core_count_physical, Some(4));
        assert_eq!(s.cpu.core_count_logical, 8);
        assert_eq!(s.cpu.load_average, Some([1.0, 1.5, 2.0]));
        assert_eq!(s.memory.percent_used, 50.0);
        assert_eq!(s.memory.total_gb, 8.0);
        assert_eq!(s.memory.used_gb, 4.0);
        assert_eq!(s.swap.total_bytes, 2_147_483_648);

        let root = s.disk.filesystems.iter().find(|f| f.mountpoint == "/").unwrap();
        assert_eq!(root.device, "/dev/sda1");
        assert_eq!(root.filesystem_type, "ext4");
        assert_eq!(root.percent_used, 50.0);
        assert_eq!(root.total_gb, 100.0);
        let home = s.disk.filesystems.iter().find(|f| f.mountpoint == "/home").unwrap();
        assert_eq!(home.total_gb, 200.0);
        assert_eq!(home.percent_used, 30.0);

        let io = s.disk.io_stats.as_ref().unwrap();
        assert_eq!(io.read_count, 1_000_000);
        assert_eq!(io.write_bytes, 5_368_709_120);
        let net = s.network.as_ref().unwrap();
        assert_eq!(net.bytes_sent, 1_000_000);
        assert_eq!(net.packets_recv, 2000);
    }

    #[test]
    fn pseudo_filesystems_are_excluded() {
        let mut fake = FakeProvider::healthy();
        fake.partitions = vec![
            part("/dev/sda1", "/", "ext4"),
            part("tmpfs", "/run", "tmpfs"),
            part("devtmpfs", "/dev", "devtmpfs"),
            part("/dev/loop0", "/snap/core/1", "squashfs"),
            part("overlay", "/var/lib/docker/overlay2/x", "overlay"),
        ];
        let snap = SnapshotBuilder::new(Arc::new(fake), true).build();
        let mounts: Vec<&str> = snap
            .sample()
            .unwrap()
            .disk
            .filesystems
            .iter()
            .map(|f| f.mountpoint.as_str())
            .collect();
        assert_eq!(mounts, ["/"]);
    }

    #[test]
    fn unreadable_filesystem_is_skipped_not_fatal() {
        let mut fake = FakeProvider::healthy();
        fake.partitions.push(part("/dev/sdb1", "/secret", "ext4"));
        // "/secret" has no usage entry, so disk_usage fails for it
        let snap = SnapshotBuilder::new(Arc::new(fake), true).build();
        assert!(!snap.is_error());
        assert_eq!(snap.sample().unwrap().disk.filesystems.len(), 2);
    }

    #[test]
    fn zero_sized_filesystem_reports_zero_percent() {
        let mut fake = FakeProvider::healthy();
        fake.partitions = vec![part("none", "/empty", "ext4")];
        fake.usage.insert(
            "/empty".into(),
            DiskUsage {
                total: 0,
                used: 0,
                free: 0,
            },
        );
        let snap = SnapshotBuilder::new(Arc::new(fake), true).build();
        assert_eq!(snap.sample().unwrap().disk.filesystems[0].percent_used, 0.0);
    }

    #[test]
    fn percent_used_is_rounded_ratio() {
        let mut fake = FakeProvider::healthy();
        fake.partitions = vec![part("/dev/sdc1", "/data", "xfs")];
        fake.usage.insert(
            "/data".into(),
            DiskUsage {
                total: 3_000,
                used: 1_000,
                free: 2_000,
            },
        );
        let snap = SnapshotBuilder::new(Arc::new(fake), true).build();
        assert_eq!(snap.sample().unwrap().disk.filesystems[0].percent_used, 33.33);
    }

    #[test]
    fn memory_failure_yields_error_snapshot() {
        let mut fake = FakeProvider::healthy();
        fake.fail_memory = true;
        let snap = SnapshotBuilder::new(Arc::new(fake), true).build();
        assert!(snap.is_error());
        assert!(snap.error().unwrap().contains("memory"));
        assert_eq!(snap.hostname, "test-host");
    }

    #[test]
    fn cpu_swap_and_partition_failures_each_yield_error_snapshots() {
        let cases: [(&str, fn(&mut FakeProvider)); 3] = [
            ("cpu", |f| f.fail_cpu = true),
            ("swap", |f| f.fail_swap = true),
            ("disk partitions", |f| f.fail_partitions = true),
        ];
        for (family, break_it) in cases {
            let mut fake = FakeProvider::healthy();
            break_it(&mut fake);
            let snap = SnapshotBuilder::new(Arc::new(fake), true).build();
            assert!(snap.is_error(), "{family} failure should fail the snapshot");
            assert!(snap.sample().is_none());
            let err = snap.error().unwrap();
            assert!(err.contains(family), "{family}: {err}");

            let v = serde_json::to_value(&snap).unwrap();
            assert!(v.get("cpu").is_none() && v.get("disk").is_none());
            assert_eq!(v["hostname"], "test-host");
        }
    }

    #[test]
    fn duration_covers_time_spent_before_a_failure() {
        let mut fake = FakeProvider::healthy();
        fake.memory_latency = std::time::Duration::from_millis(30);
        fake.fail_memory = true;
        let snap = SnapshotBuilder::new(Arc::new(fake), true).build();
        assert!(snap.is_error());
        assert!(snap.collection_duration_ms >= 30, "{}", snap.collection_duration_ms);
    }

    #[test]
    fn provider_panic_yields_error_snapshot() {
        let mut fake = FakeProvider::healthy();
        fake.panic_on_cpu = true;
        let snap = SnapshotBuilder::new(Arc::new(fake), true).build();
        assert!(snap.error().unwrap().starts_with("collection panicked"));
    }

    #[test]
    fn optional_families_drop_out_on_failure() {
        let mut fake = FakeProvider::healthy();
        fake.fail_network = true;
        fake.io = None;
        let snap = SnapshotBuilder::new(Arc::new(fake), true).build();
        let s = snap.sample().unwrap();
        assert!(s.network.is_none());
        assert!(s.disk.io_stats.is_none());
    }

    #[test]
    fn network_can_be_disabled() {
        let fake = FakeProvider::healthy();
        let snap = SnapshotBuilder::new(Arc::new(fake), false).build();
        let v = serde_json::to_value(&snap).unwrap();
        assert!(v.get("network").is_none());
        assert!(v.get("cpu").is_some());
        assert!(v.get("error").is_none());
    }

    #[test]
    fn io_counters_pass_through() {
        let mut fake = FakeProvider::healthy();
        fake.io = Some(DiskIoCounters {
            read_time_ms: 60_000,
            write_time_ms: 30_000,
            ..DiskIoCounters::default()
        });
        let snap = SnapshotBuilder::new(Arc::new(fake), true).build();
        let io = snap.sample().unwrap().disk.io_stats.clone().unwrap();
        assert_eq!((io.read_time_ms, io.write_time_ms), (60_000, 30_000));
    }
}
