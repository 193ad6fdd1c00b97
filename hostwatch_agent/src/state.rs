//! Persistent sysinfo handles reused across sampling calls.

use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use sysinfo::{CpuRefreshKind, Disks, MemoryRefreshKind, Networks, RefreshKind, System};

use crate::error::AcquisitionError;

pub struct SysHandles {
    // Keep System alive so cpu_usage() deltas work between refreshes
    pub sys: Mutex<System>,
    pub disks: Mutex<Disks>,
    pub networks: Mutex<Networks>,
    pub cpu_refreshed_at: Mutex<Option<Instant>>,
    pub hostname: String,
}

impl SysHandles {
    pub fn new() -> Self {
        let refresh_kind = RefreshKind::nothing()
            .with_cpu(CpuRefreshKind::nothing().with_cpu_usage())
            .with_memory(MemoryRefreshKind::everything());
        let sys = System::new_with_specifics(refresh_kind);

        let hostname = hostname::get()
            .ok()
            .and_then(|s| s.into_string().ok())
            .or_else(System::host_name)
            .unwrap_or_else(|| "unknown".to_string());

        Self {
            sys: Mutex::new(sys),
            disks: Mutex::new(Disks::new_with_refreshed_list()),
            networks: Mutex::new(Networks::new_with_refreshed_list()),
            cpu_refreshed_at: Mutex::new(Some(Instant::now())),
            hostname,
        }
    }
}

impl Default for SysHandles {
    fn default() -> Self {
        Self::new()
    }
}

pub fn lock<'a, T>(
    m: &'a Mutex<T>,
    what: &'static str,
) -> Result<MutexGuard<'a, T>, AcquisitionError> {
    m.lock().map_err(|_| AcquisitionError::Poisoned(what))
}
