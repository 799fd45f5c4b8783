//! Uppe Sentinel - monitoring and incident engine
//!
//! Probes registered resources on a fixed tick, records every check, opens
//! and resolves incidents, reports availability against SLA targets and
//! delivers alerts through retried, circuit-broken transports.

pub mod config;
pub mod database;
pub mod monitoring;
pub mod notify;
pub mod orchestrator;
pub mod pool;
pub mod stats;

#[cfg(test)]
pub(crate) mod testing;

pub use orchestrator::Orchestrator;
