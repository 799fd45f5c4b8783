/// Orchestrator module - coordinates all components
///
/// The orchestrator is the core coordinator that:
/// - Builds the executor, tracker, dispatcher and aggregator from configuration
/// - Runs the scheduler and retention cleanup until shutdown
/// - Answers statistics, SLA and history queries
pub mod retention;

pub use retention::{RetentionCleanup, RetentionPolicy};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{Config, Notifications};
use crate::database::{Database, open_database};
use crate::monitoring::{IncidentEvent, MonitoringExecutor, MonitoringScheduler, TickReport};
use crate::notify::{EmailTransport, NotificationDispatcher, WebhookTransport};
use crate::pool::open_local;
use crate::stats::{HistoryBucket, SlaSnapshot, StatsAggregator, StatsSnapshot};

/// Buffered incident events per subscriber
const EVENT_CAPACITY: usize = 256;

/// Main orchestrator for the monitoring engine
pub struct Orchestrator {
    config: Arc<Config>,
    database: Arc<dyn Database>,
    scheduler: Arc<MonitoringScheduler>,
    aggregator: StatsAggregator,
    events: broadcast::Sender<IncidentEvent>,
}

impl Orchestrator {
    /// Create and run an orchestrator until Ctrl-C
    pub async fn start(config: Config) -> Result<()> {
        let orchestrator = Self::open(config).await?;
        orchestrator
            .run(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("Failed to listen for Ctrl-C: {e}");
                }
            })
            .await
    }

    /// Open the configured database and build the engine on top of it
    pub async fn open(config: Config) -> Result<Self> {
        info!("Opening database at {}", config.database.path.display());
        let pool = open_local(&config.database.path, config.database.pool_size).await?;
        let database = open_database(pool).await?;
        Self::new(config, Arc::new(database))
    }

    /// Build the engine with transports from the notification config
    pub fn new(config: Config, database: Arc<dyn Database>) -> Result<Self> {
        let dispatcher = build_dispatcher(&config.notifications)?;
        Self::with_dispatcher(config, database, dispatcher)
    }

    pub fn with_dispatcher(
        config: Config,
        database: Arc<dyn Database>,
        dispatcher: NotificationDispatcher,
    ) -> Result<Self> {
        let executor = Arc::new(MonitoringExecutor::new()?);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let scheduler = Arc::new(MonitoringScheduler::new(
            database.clone(),
            executor,
            Arc::new(dispatcher),
            events.clone(),
            config.scheduler.clone(),
        ));

        Ok(Self {
            aggregator: StatsAggregator::new(database.clone()),
            config: Arc::new(config),
            database,
            scheduler,
            events,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.database
    }

    /// Incident transitions as they happen
    pub fn subscribe(&self) -> broadcast::Receiver<IncidentEvent> {
        self.events.subscribe()
    }

    /// Probe every enabled resource once, ignoring check intervals, and wait
    /// for the resulting alerts
    pub async fn run_once(&self) -> Result<TickReport> {
        self.scheduler.run_once().await
    }

    pub async fn get_resource_stats(&self, resource_id: Uuid, window_hours: u32) -> Result<StatsSnapshot> {
        self.aggregator.resource_stats(resource_id, window_hours, Utc::now()).await
    }

    pub async fn get_sla_report(&self, resource_id: Uuid, window_days: u32) -> Result<SlaSnapshot> {
        let resource = self
            .database
            .get_resource(resource_id)
            .await?
            .ok_or_else(|| anyhow!("Resource {resource_id} not found"))?;
        self.aggregator.sla_report(&resource, window_days, Utc::now()).await
    }

    pub async fn get_resource_history(&self, resource_id: Uuid, window_hours: u32) -> Result<Vec<HistoryBucket>> {
        self.aggregator.history(resource_id, window_hours, Utc::now()).await
    }

    pub async fn acknowledge_incident(&self, incident_id: i64, acknowledged_by: &str) -> Result<()> {
        self.scheduler
            .tracker()
            .acknowledge(incident_id, acknowledged_by)
            .await
            .with_context(|| format!("Failed to acknowledge incident {incident_id}"))
    }

    /// Run the scheduler and retention cleanup until `shutdown` completes
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        info!("Starting monitoring orchestrator...");
        let (stop_tx, stop_rx) = watch::channel(false);

        let retention = RetentionCleanup::new(self.database.clone(), self.config.retention.clone());
        info!(
            "Retention policy: checks={}d, every {}s",
            self.config.retention.check_retention_days, self.config.retention.cleanup_interval_secs
        );
        let retention_handle = retention.start_periodic_cleanup(stop_rx.clone());
        let scheduler_handle = tokio::spawn(Arc::clone(&self.scheduler).run(stop_rx));

        shutdown.await;
        info!("Shutdown requested, stopping background tasks");
        // Receivers only go away once the tasks have exited
        let _ = stop_tx.send(true);

        for (name, handle) in [("scheduler", scheduler_handle), ("retention", retention_handle)] {
            if let Err(e) = handle.await {
                warn!("{name} task ended abnormally: {e}");
            }
        }

        info!("Orchestrator stopped");
        Ok(())
    }
}

/// One transport per configured section, each with its own breaker and retry policy
pub fn build_dispatcher(notifications: &Notifications) -> Result<NotificationDispatcher> {
    let mut dispatcher = NotificationDispatcher::new();

    if let Some(email) = &notifications.email {
        if email.recipients.is_empty() {
            warn!("Email notifications configured without recipients, skipping");
        } else {
            let transport = EmailTransport::new(email).context("Invalid email notification config")?;
            dispatcher = dispatcher.with_transport(
                Arc::new(transport),
                email.recipients.clone(),
                notifications.retry.clone(),
                notifications.breaker.clone(),
            );
        }
    }

    if let Some(webhook) = &notifications.webhook {
        if webhook.urls.is_empty() {
            warn!("Webhook notifications configured without urls, skipping");
        } else {
            let transport = WebhookTransport::new(webhook).context("Invalid webhook notification config")?;
            dispatcher = dispatcher.with_transport(
                Arc::new(transport),
                webhook.urls.clone(),
                notifications.retry.clone(),
                notifications.breaker.clone(),
            );
        }
    }

    info!("Notification transports configured: {}", dispatcher.transport_count());
    Ok(dispatcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{Resource, ResourceType};
    use crate::database::test_database;
    use crate::monitoring::TransitionKind;
    use crate::notify::{EmailConfig, WebhookConfig};
    use crate::testing::closed_port;
    use std::time::Duration;

    #[test]
    fn test_build_dispatcher_from_config() {
        let mut notifications = Notifications::default();
        assert_eq!(build_dispatcher(&notifications).unwrap().transport_count(), 0);

        notifications.webhook = Some(WebhookConfig {
            urls: vec!["https://hooks.example.com".into()],
            headers: Default::default(),
            timeout_ms: 1_000,
        });
        notifications.email = Some(EmailConfig {
            smtp_host: "localhost".into(),
            smtp_port: 25,
            security: crate::notify::email::SmtpSecurity::None,
            username: None,
            password: None,
            from_address: "alerts@example.com".into(),
            recipients: Vec::new(),
            timeout_ms: 1_000,
        });

        // Email has no recipients and is skipped
        assert_eq!(build_dispatcher(&notifications).unwrap().transport_count(), 1);
    }

    #[tokio::test]
    async fn test_run_once_and_queries() -> Result<()> {
        let (database, _dir) = test_database().await?;
        let orchestrator = Orchestrator::new(Config::default(), Arc::new(database))?;
        let mut events = orchestrator.subscribe();

        let port = closed_port().await;
        let resource = Resource::new("db", format!("127.0.0.1:{port}"), ResourceType::Tcp).with_timeout_ms(1_000);
        orchestrator.database().save_resource(&resource).await?;

        let report = orchestrator.run_once().await?;
        assert_eq!(report.checked, 1);

        let event = events.try_recv()?;
        assert_eq!(event.transition, TransitionKind::Started);
        orchestrator.acknowledge_incident(event.incident_id, "oncall").await?;

        let stats = orchestrator.get_resource_stats(resource.id, 24).await?;
        assert_eq!(stats.total_checks, 1);
        assert_eq!(stats.uptime_percentage, 0.0);
        assert!(stats.current_downtime_minutes.is_some());

        let sla = orchestrator.get_sla_report(resource.id, 30).await?;
        assert!(!sla.sla_met);

        assert_eq!(orchestrator.get_resource_history(resource.id, 24).await?.len(), 1);
        assert!(orchestrator.get_sla_report(Uuid::new_v4(), 30).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() -> Result<()> {
        let (database, _dir) = test_database().await?;
        let orchestrator = Orchestrator::new(Config::default(), Arc::new(database))?;

        tokio::time::timeout(
            Duration::from_secs(5),
            orchestrator.run(tokio::time::sleep(Duration::from_millis(50))),
        )
        .await??;
        Ok(())
    }
}
