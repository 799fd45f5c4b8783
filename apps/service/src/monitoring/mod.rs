/// Monitoring engine - probes resources and tracks incidents
///
/// This module is responsible for:
/// - Executing protocol checks (HTTP, TCP, TLS, DNS, WebSocket, ICMP)
/// - Driving checks on a fixed tick
/// - Opening and resolving incidents from check outcomes
pub mod checker;
pub mod executor;
pub mod incident;
pub mod scheduler;
pub mod target;
pub mod types;

pub use executor::MonitoringExecutor;
pub use incident::{FailureStreak, IncidentTracker, Transition, TransitionKind};
pub use scheduler::{IncidentEvent, MonitoringScheduler, SchedulerConfig, TickReport};
pub use types::{Check, CheckStatus};
