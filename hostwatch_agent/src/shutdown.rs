//! Signal-driven shutdown: a single `running` flag plus a wake-up for sleepers.
//!
//! Only [`ShutdownCoordinator::request_stop`] touches the flag, and only in
//! one direction; there is no way to resume once stopped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

struct Inner {
    running: AtomicBool,
    wake: Notify,
}

#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                running: AtomicBool::new(true),
                wake: Notify::new(),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Clear the running flag. Returns `true` only for the call that flipped it.
    pub fn request_stop(&self) -> bool {
        let was_running = self.inner.running.swap(false, Ordering::AcqRel);
        if was_running {
            self.inner.wake.notify_waiters();
        }
        was_running
    }

    /// Resolves once a stop has been requested.
    pub async fn stopped(&self) {
        loop {
            let notified = self.inner.wake.notified();
            tokio::pin!(notified);
            // register before checking the flag so a concurrent stop is not missed
            notified.as_mut().enable();
            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }

    /// Install SIGINT/SIGTERM handlers (Ctrl-C off Unix). Registration errors
    /// are returned so the agent can refuse to start.
    pub fn listen(&self) -> std::io::Result<JoinHandle<()>> {
        let me = self.clone();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigint = signal(SignalKind::interrupt())?;
            let mut sigterm = signal(SignalKind::terminate())?;

            Ok(tokio::spawn(async move {
                loop {
                    let name = tokio::select! {
                        s = sigint.recv() => s.map(|_| "SIGINT"),
                        s = sigterm.recv() => s.map(|_| "SIGTERM"),
                    };
                    let Some(name) = name else { break };
                    me.on_signal(name);
                }
            }))
        }

        #[cfg(not(unix))]
        {
            Ok(tokio::spawn(async move {
                while tokio::signal::ctrl_c().await.is_ok() {
                    me.on_signal("ctrl-c");
                }
            }))
        }
    }

    fn on_signal(&self, name: &'static str) {
        if self.request_stop() {
            info!(signal = name, "termination requested, finishing current cycle");
        } else {
            debug!(signal = name, "already stopping");
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
