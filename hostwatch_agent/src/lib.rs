//! hostwatch agent library: periodic host sampling, threshold alerts with
//! cooldown, and retrying HTTP delivery of snapshots.

pub mod alert;
pub mod config;
pub mod cooldown;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod notify;
pub mod provider;
pub mod scheduler;
pub mod shutdown;
pub mod snapshot;
pub mod state;
pub mod transmit;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;
