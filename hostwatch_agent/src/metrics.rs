//! Metrics acquisition using sysinfo, plus /proc readers on Linux for the
//! counters sysinfo does not expose (disk I/O counts, net drops, buffers).

use crate::error::AcquisitionError;
use crate::provider::{
    DiskIoCounters, DiskPartition, DiskUsage, NetIoCounters, SwapMemory, SystemMetricsProvider,
    VirtualMemory,
};
use crate::state::{lock, SysHandles};
use crate::types::percent_of;
#[cfg(target_os = "linux")]
use std::fs;
use std::path::Path;
use std::time::Instant;
use sysinfo::{System, MINIMUM_CPU_UPDATE_INTERVAL};
use tracing::warn;

pub struct SysinfoProvider {
    state: SysHandles,
}

impl SysinfoProvider {
    /// Blocks for one CPU update interval so the first sample has a usage baseline.
    pub fn new() -> Self {
        let state = SysHandles::new();
        std::thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL);
        Self { state }
    }

    // sysinfo computes cpu usage between two refreshes; refreshing again within
    // MINIMUM_CPU_UPDATE_INTERVAL yields garbage, so reuse the last numbers instead.
    fn refresh_cpu_if_stale(&self, sys: &mut System) -> Result<(), AcquisitionError> {
        let mut at = lock(&self.state.cpu_refreshed_at, "cpu refresh clock")?;
        let now = Instant::now();
        if at.is_none_or(|t| now.duration_since(t) >= MINIMUM_CPU_UPDATE_INTERVAL) {
            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                sys.refresh_cpu_usage();
            })) {
                warn!("sysinfo cpu refresh panicked: {e:?}");
                return Err(AcquisitionError::unavailable("cpu", "refresh panicked"));
            }
            *at = Some(now);
        }
        Ok(())
    }
}

impl Default for SysinfoProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemMetricsProvider for SysinfoProvider {
    fn hostname(&self) -> String {
        self.state.hostname.clone()
    }

    fn cpu_percent(&self, per_core: bool) -> Result<Vec<f64>, AcquisitionError> {
        let mut sys = lock(&self.state.sys, "system")?;
        self.refresh_cpu_if_stale(&mut sys)?;
        if sys.cpus().is_empty() {
            return Err(AcquisitionError::unavailable("cpu", "no cpus reported"));
        }
        if per_core {
            Ok(sys.cpus().iter().map(|c| f64::from(c.cpu_usage())).collect())
        } else {
            Ok(vec![f64::from(sys.global_cpu_usage())])
        }
    }

    fn cpu_count(&self, physical_only: bool) -> Option<usize> {
        if physical_only {
            return System::physical_core_count();
        }
        let sys = lock(&self.state.sys, "system").ok()?;
        let n = sys.cpus().len();
        (n > 0).then_some(n)
    }

    fn load_average(&self) -> Option<[f64; 3]> {
        // sysinfo reports zeros on Windows
        if !cfg!(unix) {
            return None;
        }
        let l = System::load_average();
        Some([l.one, l.five, l.fifteen])
    }

    fn virtual_memory(&self) -> Result<VirtualMemory, AcquisitionError> {
        let mut sys = lock(&self.state.sys, "system")?;
        sys.refresh_memory();
        let total = sys.total_memory();
        if total == 0 {
            return Err(AcquisitionError::unavailable("memory", "total reported as 0"));
        }
        let available = sys.available_memory();
        let used = total.saturating_sub(available);
        let (buffers, cached, shared) = read_memory_extras();
        Ok(VirtualMemory {
            total,
            used,
            free: sys.free_memory(),
            available,
            percent: percent_of(used, total),
            buffers,
            cached,
            shared,
        })
    }

    fn swap_memory(&self) -> Result<SwapMemory, AcquisitionError> {
        let mut sys = lock(&self.state.sys, "system")?;
        sys.refresh_memory();
        let total = sys.total_swap();
        let used = sys.used_swap();
        Ok(SwapMemory {
            total,
            used,
            free: sys.free_swap(),
            percent: percent_of(used, total),
        })
    }

    fn disk_partitions(&self) -> Result<Vec<DiskPartition>, AcquisitionError> {
        let mut disks = lock(&self.state.disks, "disks")?;
        disks.refresh(true);
        Ok(disks
            .list()
            .iter()
            .map(|d| DiskPartition {
                device: d.name().to_string_lossy().into_owned(),
                mountpoint: d.mount_point().to_string_lossy().into_owned(),
                fstype: d.file_system().to_string_lossy().into_owned(),
                opts: if d.is_read_only() { "ro" } else { "rw" }.to_string(),
            })
            .collect())
    }

    fn disk_usage(&self, mountpoint: &str) -> Result<DiskUsage, AcquisitionError> {
        let disks = lock(&self.state.disks, "disks")?;
        let disk = disks
            .list()
            .iter()
            .find(|d| d.mount_point() == Path::new(mountpoint))
            .ok_or_else(|| AcquisitionError::UnknownMountpoint(mountpoint.to_string()))?;
        let total = disk.total_space();
        let free = disk.available_space();
        Ok(DiskUsage {
            total,
            used: total.saturating_sub(free),
            free,
        })
    }

    fn disk_io_counters(&self) -> Result<Option<DiskIoCounters>, AcquisitionError> {
        #[cfg(target_os = "linux")]
        {
            let s = fs::read_to_string("/proc/diskstats").map_err(|source| AcquisitionError::Io {
                path: "/proc/diskstats",
                source,
            })?;
            Ok(Some(parse_diskstats(&s, |name| {
                Path::new("/sys/block").join(name).join("device").exists()
            })))
        }
        #[cfg(not(target_os = "linux"))]
        {
            // Byte totals only; sysinfo has no operation counts or timings.
            let disks = lock(&self.state.disks, "disks")?;
            let mut io = DiskIoCounters::default();
            for d in disks.list() {
                let u = d.usage();
                io.read_bytes = io.read_bytes.saturating_add(u.total_read_bytes);
                io.write_bytes = io.write_bytes.saturating_add(u.total_written_bytes);
            }
            Ok(Some(io))
        }
    }

    fn net_io_counters(&self) -> Result<NetIoCounters, AcquisitionError> {
        #[cfg(target_os = "linux")]
        {
            let s = fs::read_to_string("/proc/net/dev").map_err(|source| AcquisitionError::Io {
                path: "/proc/net/dev",
                source,
            })?;
            Ok(parse_net_dev(&s))
        }
        #[cfg(not(target_os = "linux"))]
        {
            let mut nets = lock(&self.state.networks, "networks")?;
            nets.refresh(true);
            let mut c = NetIoCounters::default();
            for (_name, data) in nets.iter() {
                c.bytes_recv = c.bytes_recv.saturating_add(data.total_received());
                c.bytes_sent = c.bytes_sent.saturating_add(data.total_transmitted());
                c.packets_recv = c.packets_recv.saturating_add(data.total_packets_received());
                c.packets_sent = c.packets_sent.saturating_add(data.total_packets_transmitted());
                c.errin = c.errin.saturating_add(data.total_errors_on_received());
                c.errout = c.errout.saturating_add(data.total_errors_on_transmitted());
            }
            Ok(c)
        }
    }
}

#[cfg(target_os = "linux")]
fn read_memory_extras() -> (u64, u64, u64) {
    match fs::read_to_string("/proc/meminfo") {
        Ok(s) => parse_meminfo(&s),
        Err(e) => {
            warn!("reading /proc/meminfo failed: {e}");
            (0, 0, 0)
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn read_memory_extras() -> (u64, u64, u64) {
    (0, 0, 0)
}

/// (buffers, cached, shared) in bytes. Cached includes reclaimable slab, as `free` reports it.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_meminfo(s: &str) -> (u64, u64, u64) {
    let (mut buffers, mut cached, mut shared) = (0u64, 0u64, 0u64);
    for line in s.lines() {
        let mut it = line.split_whitespace();
        let (Some(key), Some(val)) = (it.next(), it.next()) else {
            continue;
        };
        let Ok(kb) = val.parse::<u64>() else {
            continue;
        };
        let bytes = kb.saturating_mul(1024);
        match key {
            "Buffers:" => buffers = bytes,
            "Cached:" | "SReclaimable:" => cached = cached.saturating_add(bytes),
            "Shmem:" => shared = bytes,
            _ => {}
        }
    }
    (buffers, cached, shared)
}

/// Sum the whole-disk rows of /proc/diskstats; partitions would double count.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_diskstats(s: &str, is_disk: impl Fn(&str) -> bool) -> DiskIoCounters {
    // major minor name reads merged sectors ms_read writes merged sectors ms_write ...
    const SECTOR: u64 = 512;
    let mut io = DiskIoCounters::default();
    for line in s.lines() {
        let f: Vec<&str> = line.split_whitespace().collect();
        if f.len() < 11 || !is_disk(f[2]) {
            continue;
        }
        let n = |i: usize| f[i].parse::<u64>().unwrap_or(0);
        io.read_count = io.read_count.saturating_add(n(3));
        io.read_bytes = io.read_bytes.saturating_add(n(5).saturating_mul(SECTOR));
        io.read_time_ms = io.read_time_ms.saturating_add(n(6));
        io.write_count = io.write_count.saturating_add(n(7));
        io.write_bytes = io.write_bytes.saturating_add(n(9).saturating_mul(SECTOR));
        io.write_time_ms = io.write_time_ms.saturating_add(n(10));
    }
    io
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_net_dev(s: &str) -> NetIoCounters {
    let mut c = NetIoCounters::default();
    // first two lines are headers
    for line in s.lines().skip(2) {
        let Some((_iface, rest)) = line.split_once(':') else {
            continue;
        };
        let f: Vec<u64> = rest
            .split_whitespace()
            .map(|t| t.parse::<u64>().unwrap_or(0))
            .collect();
        if f.len() < 12 {
            continue;
        }
        c.bytes_recv = c.bytes_recv.saturating_add(f[0]);
        c.packets_recv = c.packets_recv.saturating_add(f[1]);
        c.errin = c.errin.saturating_add(f[2]);
        c.dropin = c.dropin.saturating_add(f[3]);
        c.bytes_sent = c.bytes_sent.saturating_add(f[8]);
        c.packets_sent = c.packets_sent.saturating_add(f[9]);
        c.errout = c.errout.saturating_add(f[10]);
        c.dropout = c.dropout.saturating_add(f[11]);
    }
    c
}
