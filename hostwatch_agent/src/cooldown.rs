//! Per-alert cooldown tracking.
//!
//! Keys are the stable `(family, target)` pair so the measured value embedded
//! in an alert message never changes the identity of the alert.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use crate::types::MetricFamily;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AlertKey {
    pub family: MetricFamily,
    /// Mountpoint for disk alerts, `None` for host-wide families.
    pub target: Option<String>,
}

impl AlertKey {
    pub fn family(family: MetricFamily) -> Self {
        Self {
            family,
            target: None,
        }
    }

    pub fn targeted(family: MetricFamily, target: impl Into<String>) -> Self {
        Self {
            family,
            target: Some(target.into()),
        }
    }
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(t) => write!(f, "{}:{}", self.family, t),
            None => write!(f, "{}", self.family),
        }
    }
}

/// Last fire time per key. Entries are never removed; the key space is
/// bounded by four families plus the mounted filesystems.
#[derive(Debug, Default)]
pub struct CooldownRegistry {
    last_fired: HashMap<AlertKey, DateTime<Utc>>,
}

impl CooldownRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_fire(&self, key: &AlertKey, now: DateTime<Utc>, window: Duration) -> bool {
        match self.last_fired.get(key) {
            None => true,
            Some(last) => now.signed_duration_since(*last) >= window,
        }
    }

    pub fn record(&mut self, key: AlertKey, now: DateTime<Utc>) {
        self.last_fired.insert(key, now);
    }

    /// `should_fire` and, when it does, `record` in one step.
    pub fn try_fire(&mut self, key: &AlertKey, now: DateTime<Utc>, window: Duration) -> bool {
        if !self.should_fire(key, now, window) {
            return false;
        }
        self.record(key.clone(), now);
        true
    }

    pub fn last_fired(&self, key: &AlertKey) -> Option<DateTime<Utc>> {
        self.last_fired.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.last_fired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_fired.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn first_fire_always_allowed() {
        let reg = CooldownRegistry::new();
        assert!(reg.should_fire(&AlertKey::family(MetricFamily::Cpu), t0(), Duration::minutes(5)));
    }

    #[test]
    fn suppressed_inside_window_and_released_at_boundary() {
        let mut reg = CooldownRegistry::new();
        let key = AlertKey::family(MetricFamily::Memory);
        let window = Duration::minutes(5);

        assert!(reg.try_fire(&key, t0(), window));
        assert!(!reg.try_fire(&key, t0() + Duration::minutes(4), window));
        // suppressed attempts do not move the clock
        assert_eq!(reg.last_fired(&key), Some(t0()));
        assert!(reg.try_fire(&key, t0() + Duration::minutes(5), window));
        assert_eq!(reg.last_fired(&key), Some(t0() + Duration::minutes(5)));
    }

    #[test]
    fn keys_are_independent() {
        let mut reg = CooldownRegistry::new();
        let window = Duration::minutes(5);
        let root = AlertKey::targeted(MetricFamily::Disk, "/");
        let var = AlertKey::targeted(MetricFamily::Disk, "/var");

        assert!(reg.try_fire(&root, t0(), window));
        assert!(reg.try_fire(&var, t0(), window));
        assert!(reg.try_fire(&AlertKey::family(MetricFamily::Disk), t0(), window));
        assert!(!reg.try_fire(&root, t0(), window));
        assert_eq!(reg.len(), 3);
    }

    #[test]
    fn zero_window_never_suppresses() {
        let mut reg = CooldownRegistry::new();
        let key = AlertKey::family(MetricFamily::Swap);
        assert!(reg.try_fire(&key, t0(), Duration::zero()));
        assert!(reg.try_fire(&key, t0(), Duration::zero()));
    }

    #[test]
    fn key_display() {
        assert_eq!(AlertKey::family(MetricFamily::Cpu).to_string(), "cpu");
        assert_eq!(AlertKey::targeted(MetricFamily::Disk, "/var").to_string(), "disk:/var");
    }
}
