//! The sample -> evaluate -> transmit control loop.
//!
//! One cycle at a time. A stop request arriving mid-cycle moves the state to
//! `Stopping` but never cancels the cycle, so a transmission that has started
//! always runs to completion (success or retry exhaustion). The inter-cycle
//! sleep is cut short.

use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::alert::AlertEvaluator;
use crate::shutdown::ShutdownCoordinator;
use crate::snapshot::{panic_message, SnapshotBuilder};
use crate::transmit::Transmitter;
use crate::types::MetricSnapshot;

/// Pause after a cycle that blew up, before trying again.
pub const ERROR_PAUSE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Running,
    Stopping,
    Stopped,
}

/// What one cycle did.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub snapshot_error: bool,
    pub alerts_fired: usize,
    pub delivered: bool,
    pub elapsed: Duration,
}

pub struct Scheduler {
    builder: Arc<SnapshotBuilder>,
    evaluator: AlertEvaluator,
    transmitter: Transmitter,
    endpoint: String,
    interval: Duration,
    shutdown: ShutdownCoordinator,
    state: Arc<watch::Sender<SchedulerState>>,
}

impl Scheduler {
    pub fn new(
        builder: SnapshotBuilder,
        evaluator: AlertEvaluator,
        transmitter: Transmitter,
        endpoint: impl Into<String>,
        interval: Duration,
        shutdown: ShutdownCoordinator,
    ) -> Self {
        Self {
            builder: Arc::new(builder),
            evaluator,
            transmitter,
            endpoint: endpoint.into(),
            interval,
            shutdown,
            state: Arc::new(watch::channel(SchedulerState::Running).0),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Follow state transitions from another task while `run` holds the scheduler.
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Run cycles until shutdown is requested. Returns the number of cycles
    /// that completed normally.
    pub async fn run(&mut self) -> u64 {
        info!(
            endpoint = %self.endpoint,
            interval_secs = self.interval.as_secs_f64(),
            "starting metrics loop"
        );
        let state = Arc::clone(&self.state);
        let shutdown = self.shutdown.clone();
        let interval = self.interval;
        let mut completed = 0u64;

        while shutdown.is_running() {
            let cycle = AssertUnwindSafe(self.cycle()).catch_unwind();
            tokio::pin!(cycle);
            // the cycle is never cancelled; a stop request only marks the transition
            let outcome = loop {
                tokio::select! {
                    out = &mut cycle => break out,
                    _ = shutdown.stopped(), if *state.borrow() == SchedulerState::Running => {
                        mark_stopping(&state);
                    }
                }
            };
            let pause = match outcome {
                Ok(report) => {
                    completed += 1;
                    if report.elapsed >= interval {
                        warn!(
                            elapsed_ms = report.elapsed.as_millis() as u64,
                            interval_ms = interval.as_millis() as u64,
                            "cycle overran interval, starting next cycle immediately"
                        );
                        None
                    } else {
                        Some(interval - report.elapsed)
                    }
                }
                Err(panic) => {
                    error!(
                        error = %panic_message(panic.as_ref()),
                        pause_secs = ERROR_PAUSE.as_secs(),
                        "cycle failed, pausing before next attempt"
                    );
                    Some(ERROR_PAUSE)
                }
            };

            if !shutdown.is_running() {
                break;
            }
            if let Some(d) = pause {
                debug!(sleep_ms = d.as_millis() as u64, "waiting for next cycle");
                tokio::select! {
                    _ = sleep(d) => {}
                    _ = shutdown.stopped() => {}
                }
            }
        }

        mark_stopping(&state);
        info!(cycles = completed, "metrics loop stopping");
        state.send_replace(SchedulerState::Stopped);
        info!("metrics agent stopped");
        completed
    }

    /// Exactly one cycle, with no sleep afterwards.
    pub async fn run_once(&mut self) -> CycleReport {
        self.cycle().await
    }

    async fn cycle(&mut self) -> CycleReport {
        let started = Instant::now();
        let snapshot = self.collect().await;

        let alerts_fired = if snapshot.is_error() {
            warn!(
                error = snapshot.error().unwrap_or_default(),
                "collection failed, sending error snapshot"
            );
            0
        } else {
            self.evaluator.evaluate(&snapshot, Utc::now()).await.len()
        };

        let delivered = self.transmitter.send(&snapshot, &self.endpoint).await;
        let elapsed = started.elapsed();
        debug!(
            elapsed_ms = elapsed.as_millis() as u64,
            alerts_fired, delivered, "cycle complete"
        );
        CycleReport {
            snapshot_error: snapshot.is_error(),
            alerts_fired,
            delivered,
            elapsed,
        }
    }

    // OS reads can block; keep them off the runtime workers.
    async fn collect(&self) -> MetricSnapshot {
        let builder = Arc::clone(&self.builder);
        match tokio::task::spawn_blocking(move || builder.build()).await {
            Ok(s) => s,
            Err(e) => match e.try_into_panic() {
                Ok(p) => std::panic::resume_unwind(p),
                Err(e) => {
                    std::panic::resume_unwind(Box::new(format!("collection task cancelled: {e}")))
                }
            },
        }
    }
}

fn mark_stopping(state: &watch::Sender<SchedulerState>) {
    state.send_if_modified(|s| {
        if *s == SchedulerState::Running {
            info!("shutdown requested, finishing current work");
            *s = SchedulerState::Stopping;
            true
        } else {
            false
        }
    });
}
