//! Threshold evaluation with cooldown suppression and channel dispatch.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{AlertSettings, ThresholdConfig};
use crate::cooldown::{AlertKey, CooldownRegistry};
use crate::notify::AlertSink;
use crate::types::{MetricFamily, MetricSnapshot};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub key: AlertKey,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
}

/// Every threshold breach in `snapshot`, ignoring cooldown. Error snapshots
/// never breach. A value must be strictly above its threshold.
pub fn breaches(
    snapshot: &MetricSnapshot,
    thresholds: &ThresholdConfig,
    now: DateTime<Utc>,
) -> Vec<AlertEvent> {
    let Some(sample) = snapshot.sample() else {
        return Vec::new();
    };
    let mut events = Vec::new();
    for family in MetricFamily::ALL {
        let threshold = thresholds.get(family);
        match family {
            MetricFamily::Disk => {
                for fs in &sample.disk.filesystems {
                    if fs.percent_used > threshold {
                        events.push(AlertEvent {
                            key: AlertKey::targeted(family, fs.mountpoint.clone()),
                            message: format!(
                                "High disk usage on {}: {:.1}% (threshold {}%)",
                                fs.mountpoint, fs.percent_used, threshold
                            ),
                            triggered_at: now,
                        });
                    }
                }
            }
            _ => {
                let (label, value) = match family {
                    MetricFamily::Cpu => ("CPU", sample.cpu.overall_percent),
                    MetricFamily::Memory => ("memory", sample.memory.percent_used),
                    _ => ("swap", sample.swap.percent_used),
                };
                if value > threshold {
                    events.push(AlertEvent {
                        key: AlertKey::family(family),
                        message: format!(
                            "High {label} usage: {value:.1}% (threshold {threshold}%)"
                        ),
                        triggered_at: now,
                    });
                }
            }
        }
    }
    events
}

pub struct AlertEvaluator {
    thresholds: ThresholdConfig,
    settings: AlertSettings,
    cooldown: CooldownRegistry,
    sink: Arc<dyn AlertSink>,
}

impl AlertEvaluator {
    pub fn new(
        thresholds: ThresholdConfig,
        settings: AlertSettings,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            thresholds,
            settings,
            cooldown: CooldownRegistry::new(),
            sink,
        }
    }

    pub fn cooldown(&self) -> &CooldownRegistry {
        &self.cooldown
    }

    /// Evaluate one snapshot and dispatch the alerts that clear cooldown.
    /// Returns the dispatched events.
    pub async fn evaluate(
        &mut self,
        snapshot: &MetricSnapshot,
        now: DateTime<Utc>,
    ) -> Vec<AlertEvent> {
        if snapshot.is_error() {
            debug!("error snapshot, skipping alert evaluation");
            return Vec::new();
        }
        if !self.settings.enabled {
            return Vec::new();
        }

        let window = self.settings.cooldown_window();
        let mut fired = Vec::new();
        for event in breaches(snapshot, &self.thresholds, now) {
            // Record before dispatch so a failing channel cannot cause a re-fire next cycle.
            if !self.cooldown.try_fire(&event.key, now, window) {
                debug!(key = %event.key, "alert suppressed by cooldown");
                continue;
            }
            info!(key = %event.key, message = %event.message, "alert triggered");
            self.dispatch(&event).await;
            fired.push(event);
        }
        fired
    }

    async fn dispatch(&self, event: &AlertEvent) {
        for &channel in &self.settings.channels {
            if let Err(e) = self.sink.notify(channel, &event.message).await {
                warn!(key = %event.key, %channel, error = %e, "alert channel failed");
            }
        }
    }
}
