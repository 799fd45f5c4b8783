use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore, broadcast, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::executor::MonitoringExecutor;
use super::incident::{FailureStreak, IncidentTracker, TransitionKind};
use super::types::Check;
use crate::database::Database;
use crate::database::models::Resource;
use crate::notify::{AlertMessage, NotificationAttempt, NotificationDispatcher};

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_interval_secs: u64,
    pub max_concurrent_checks: usize,
    /// Skip a resource until its own check interval has passed
    pub respect_check_interval: bool,
    /// Recent checks attached to an alert
    pub alert_context_checks: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 30,
            max_concurrent_checks: 16,
            respect_check_interval: false,
            alert_context_checks: 5,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }
}

/// Published on every incident transition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncidentEvent {
    pub resource_id: Uuid,
    pub resource_name: String,
    pub incident_id: i64,
    pub transition: TransitionKind,
    pub at: DateTime<Utc>,
    /// Alerts were held back (maintenance mode or quiet hours)
    pub suppressed: bool,
}

/// Summary of one tick. `notifications` is only filled by
/// [`MonitoringScheduler::run_once`], which waits for delivery.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub checked: usize,
    pub up: usize,
    pub down: usize,
    pub skipped: usize,
    pub failed: usize,
    pub events: Vec<IncidentEvent>,
    pub notifications: Vec<NotificationAttempt>,
}

/// Mutable per-resource state, guarded by the resource's lock
#[derive(Debug, Default)]
struct ResourceState {
    streak: FailureStreak,
    slow_alerted: bool,
    last_probe: Option<Instant>,
}

struct ResourceOutcome {
    check: Check,
    event: Option<IncidentEvent>,
}

/// Drives probes on a fixed tick
pub struct MonitoringScheduler {
    database: Arc<dyn Database>,
    executor: Arc<MonitoringExecutor>,
    tracker: IncidentTracker,
    dispatcher: Arc<NotificationDispatcher>,
    events: broadcast::Sender<IncidentEvent>,
    states: std::sync::Mutex<HashMap<Uuid, Arc<Mutex<ResourceState>>>>,
    semaphore: Arc<Semaphore>,
    /// Alert deliveries in flight, detached from the ticks that raised them
    deliveries: std::sync::Mutex<JoinSet<Vec<NotificationAttempt>>>,
    config: SchedulerConfig,
}

impl MonitoringScheduler {
    pub fn new(
        database: Arc<dyn Database>,
        executor: Arc<MonitoringExecutor>,
        dispatcher: Arc<NotificationDispatcher>,
        events: broadcast::Sender<IncidentEvent>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            tracker: IncidentTracker::new(database.clone()),
            database,
            executor,
            dispatcher,
            events,
            states: std::sync::Mutex::new(HashMap::new()),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_checks.max(1))),
            deliveries: std::sync::Mutex::new(JoinSet::new()),
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn tracker(&self) -> &IncidentTracker {
        &self.tracker
    }

    fn states(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Arc<Mutex<ResourceState>>>> {
        self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn deliveries(&self) -> std::sync::MutexGuard<'_, JoinSet<Vec<NotificationAttempt>>> {
        self.deliveries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state_for(&self, resource_id: Uuid) -> Arc<Mutex<ResourceState>> {
        self.states().entry(resource_id).or_default().clone()
    }

    /// Resources with streak or latch state held in memory
    pub fn tracked_resources(&self) -> usize {
        self.states().len()
    }

    /// Alert deliveries not yet finished
    pub fn pending_deliveries(&self) -> usize {
        self.deliveries().len()
    }

    fn spawn_delivery(&self, alerts: Vec<AlertMessage>) {
        let dispatcher = Arc::clone(&self.dispatcher);
        self.deliveries().spawn(async move {
            let mut attempts = Vec::new();
            for alert in &alerts {
                attempts.extend(dispatcher.dispatch(alert).await);
            }
            attempts
        });
    }

    /// Collect finished deliveries without waiting
    fn reap_deliveries(&self) {
        let mut deliveries = self.deliveries();
        while let Some(joined) = deliveries.try_join_next() {
            if let Err(e) = joined {
                error!("Alert delivery task panicked: {e}");
            }
        }
    }

    /// Wait for every delivery handed off so far and return its outcomes
    pub async fn flush_deliveries(&self) -> Vec<NotificationAttempt> {
        let mut pending = std::mem::take(&mut *self.deliveries());
        let mut attempts = Vec::new();
        while let Some(joined) = pending.join_next().await {
            match joined {
                Ok(batch) => attempts.extend(batch),
                Err(e) => error!("Alert delivery task panicked: {e}"),
            }
        }
        attempts
    }

    /// Probe every enabled resource regardless of check intervals, then wait
    /// for the alerts raised so far to be delivered
    pub async fn run_once(self: &Arc<Self>) -> Result<TickReport> {
        let mut report = self.tick(true).await?;
        report.notifications = self.flush_deliveries().await;
        Ok(report)
    }

    /// Probe every enabled resource once. With `force` unset and
    /// `respect_check_interval` on, resources probed more recently than their
    /// check interval are skipped.
    pub async fn tick(self: &Arc<Self>, force: bool) -> Result<TickReport> {
        let resources = self
            .database
            .list_enabled_resources()
            .await
            .context("Failed to load enabled resources")?;
        debug!("Tick over {} enabled resources", resources.len());
        let enabled: HashSet<Uuid> = resources.iter().map(|resource| resource.id).collect();

        let mut tasks = JoinSet::new();
        for resource in resources {
            let scheduler = Arc::clone(self);
            tasks.spawn(async move {
                let resource_id = resource.id;
                let outcome = scheduler.process_resource(resource, force).await;
                (resource_id, outcome)
            });
        }

        let mut report = TickReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(Some(outcome)))) => {
                    report.checked += 1;
                    if outcome.check.is_up() {
                        report.up += 1;
                    } else {
                        report.down += 1;
                    }
                    report.events.extend(outcome.event);
                }
                Ok((_, Ok(None))) => report.skipped += 1,
                Ok((resource_id, Err(e))) => {
                    report.failed += 1;
                    error!(resource = %resource_id, "Check pipeline failed: {e:#}");
                }
                Err(e) => {
                    report.failed += 1;
                    error!("Check task panicked: {e}");
                }
            }
        }

        self.states().retain(|id, _| enabled.contains(id));
        self.reap_deliveries();

        info!(
            checked = report.checked,
            up = report.up,
            down = report.down,
            skipped = report.skipped,
            failed = report.failed,
            transitions = report.events.len(),
            "Tick completed"
        );

        Ok(report)
    }

    /// Probe, record and track one resource. Steps run in order under the
    /// resource's lock. Alerts are handed to a delivery task once the lock
    /// and the concurrency permit are released.
    async fn process_resource(&self, resource: Resource, force: bool) -> Result<Option<ResourceOutcome>> {
        let permit = self.semaphore.acquire().await.context("Check semaphore closed")?;

        let state = self.state_for(resource.id);
        let mut state = state.lock().await;

        if !force && self.config.respect_check_interval {
            if let Some(last) = state.last_probe {
                if last.elapsed() < resource.check_interval() {
                    debug!(resource = %resource.id, "Skipping, check interval not elapsed");
                    return Ok(None);
                }
            }
        }
        state.last_probe = Some(Instant::now());

        let mut check = self.executor.execute_check(&resource).await;
        check.id = Some(self.database.append_check(&check).await?);
        debug!(
            resource = %resource.id,
            status = %check.status,
            response_time_ms = check.response_time_ms,
            "Check recorded"
        );

        let suppressed = resource.alerts_suppressed(check.checked_at);
        let mut alerts = Vec::new();
        let mut event = None;

        if let Some(status) = state.streak.record(check.status, resource.consecutive_failures_threshold) {
            let transition = self.tracker.observe(resource.id, status, check.checked_at).await?;

            if let (Some(kind), Some(incident)) = (transition.kind(), transition.incident()) {
                let recent = self
                    .database
                    .get_recent_checks(resource.id, self.config.alert_context_checks)
                    .await?;
                alerts.extend(AlertMessage::for_transition(&resource, &transition, &recent, check.checked_at));

                match kind {
                    TransitionKind::Started => warn!(
                        resource = %resource.id,
                        incident = incident.id,
                        "Incident started for {}: {}",
                        resource.name,
                        check.error_message.as_deref().unwrap_or("down")
                    ),
                    TransitionKind::Resolved => info!(
                        resource = %resource.id,
                        incident = incident.id,
                        "Incident resolved for {}",
                        resource.name
                    ),
                }

                event = Some(IncidentEvent {
                    resource_id: resource.id,
                    resource_name: resource.name.clone(),
                    incident_id: incident.id,
                    transition: kind,
                    at: check.checked_at,
                    suppressed,
                });
            }
        }

        if let Some(threshold) = resource.response_time_threshold_ms {
            if let (true, Some(ms)) = (check.is_up(), check.response_time_ms) {
                if ms > threshold as f64 {
                    if !state.slow_alerted {
                        state.slow_alerted = true;
                        let recent = self
                            .database
                            .get_recent_checks(resource.id, self.config.alert_context_checks)
                            .await?;
                        alerts.push(AlertMessage::slow_response(&resource, &check, &recent));
                    }
                } else {
                    state.slow_alerted = false;
                }
            }
        }

        drop(state);
        drop(permit);

        if let Some(event) = &event {
            // No subscribers is fine
            let _ = self.events.send(event.clone());
        }

        if !alerts.is_empty() {
            if suppressed {
                info!(resource = %resource.id, "Alerts suppressed (maintenance or quiet hours)");
            } else {
                self.spawn_delivery(alerts);
            }
        }

        Ok(Some(ResourceOutcome { check, event }))
    }

    /// Tick until `shutdown` flips to true
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            tick_secs = self.config.tick_interval().as_secs(),
            max_concurrent = self.config.max_concurrent_checks,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(false).await {
                        error!("Tick failed: {e:#}");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(pending = self.pending_deliveries(), "Scheduler stopping, draining alert deliveries");
                        self.flush_deliveries().await;
                        break;
                    }
                }
            }
        }
    }
}
