use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, params};
use uuid::Uuid;

use super::models::{
    Incident, QuietHours, Resource, ResourceType, millis_to_timestamp, timestamp_to_millis,
};
use crate::monitoring::types::{Check, CheckStatus};
use crate::pool::{LibsqlManager, LibsqlPool};

const RESOURCE_COLUMNS: &str = "id, name, url, resource_type, check_interval_seconds, timeout_ms, \
     enabled, http_keyword, http_headers, cert_expiry_days, quiet_hours_start, quiet_hours_end, \
     sla_target, consecutive_failures_threshold, response_time_threshold_ms, maintenance_mode";

const CHECK_COLUMNS: &str =
    "id, resource_id, status, response_time_ms, status_code, error_message, details, checked_at";

const INCIDENT_COLUMNS: &str =
    "id, resource_id, started_at, resolved_at, acknowledged_at, acknowledged_by";

/// Storage operations the engine consumes
#[async_trait]
pub trait Database: Send + Sync {
    /// Get all enabled resources
    async fn list_enabled_resources(&self) -> Result<Vec<Resource>>;

    async fn get_resource(&self, id: Uuid) -> Result<Option<Resource>>;

    /// Insert or replace a resource
    async fn save_resource(&self, resource: &Resource) -> Result<()>;

    /// Append a check to the log, returning its row id
    async fn append_check(&self, check: &Check) -> Result<i64>;

    /// Most recent checks for a resource, newest first
    async fn get_recent_checks(&self, resource_id: Uuid, limit: usize) -> Result<Vec<Check>>;

    /// Checks at or after `window_start`, oldest first
    async fn get_checks_in_window(
        &self,
        resource_id: Uuid,
        window_start: DateTime<Utc>,
    ) -> Result<Vec<Check>>;

    async fn get_open_incident(&self, resource_id: Uuid) -> Result<Option<Incident>>;

    async fn create_incident(&self, resource_id: Uuid, started_at: DateTime<Utc>) -> Result<Incident>;

    async fn resolve_incident(&self, incident_id: i64, resolved_at: DateTime<Utc>) -> Result<()>;

    /// Incidents overlapping the window (still open, or resolved at/after `window_start`),
    /// ordered by start time
    async fn get_incidents_in_window(
        &self,
        resource_id: Uuid,
        window_start: DateTime<Utc>,
    ) -> Result<Vec<Incident>>;

    async fn acknowledge_incident(
        &self,
        incident_id: i64,
        acknowledged_by: &str,
        acknowledged_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Delete checks older than `retention`, returning the number of rows removed
    async fn prune_checks_older_than(&self, retention: chrono::Duration) -> Result<u64>;
}

/// LibSQL database implementation
pub struct DatabaseImpl {
    pool: LibsqlPool,
}

impl DatabaseImpl {
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>> {
        self.pool.get().await.map_err(|e| anyhow!("Failed to get database connection: {e}"))
    }
}

fn resource_from_row(row: &Row) -> Result<Resource> {
    let id: String = row.get(0)?;
    let resource_type: String = row.get(3)?;
    let headers: String = row.get(8)?;
    let quiet_start: Option<i64> = row.get(10)?;
    let quiet_end: Option<i64> = row.get(11)?;

    let quiet_hours = match (quiet_start, quiet_end) {
        (Some(start), Some(end)) => {
            Some(QuietHours { start_hour: start.clamp(0, 23) as u8, end_hour: end.clamp(0, 24) as u8 })
        }
        _ => None,
    };

    Ok(Resource {
        id: Uuid::parse_str(&id)?,
        name: row.get(1)?,
        url: row.get(2)?,
        resource_type: ResourceType::parse(&resource_type),
        check_interval_seconds: row.get::<i64>(4)?.max(0) as u64,
        timeout_ms: row.get::<i64>(5)?.max(0) as u64,
        enabled: row.get::<i64>(6)? != 0,
        http_keyword: row.get(7)?,
        http_headers: serde_json::from_str(&headers).unwrap_or_default(),
        cert_expiry_days: row.get::<Option<i64>>(9)?.map(|v| v.max(0) as u32),
        quiet_hours,
        sla_target: row.get(12)?,
        consecutive_failures_threshold: row.get::<i64>(13)?.max(0) as u32,
        response_time_threshold_ms: row.get::<Option<i64>>(14)?.map(|v| v.max(0) as u64),
        maintenance_mode: row.get::<i64>(15)? != 0,
    })
}

fn check_from_row(row: &Row) -> Result<Check> {
    let resource_id: String = row.get(1)?;
    let status: String = row.get(2)?;
    let details: Option<String> = row.get(6)?;

    Ok(Check {
        id: Some(row.get(0)?),
        resource_id: Uuid::parse_str(&resource_id)?,
        status: CheckStatus::from_db(&status),
        response_time_ms: row.get(3)?,
        status_code: row.get::<Option<i64>>(4)?.map(|v| v as u16),
        error_message: row.get(5)?,
        details: details.and_then(|raw| serde_json::from_str(&raw).ok()),
        checked_at: millis_to_timestamp(row.get(7)?),
    })
}

fn incident_from_row(row: &Row) -> Result<Incident> {
    let resource_id: String = row.get(1)?;

    Ok(Incident {
        id: row.get(0)?,
        resource_id: Uuid::parse_str(&resource_id)?,
        started_at: millis_to_timestamp(row.get(2)?),
        resolved_at: row.get::<Option<i64>>(3)?.map(millis_to_timestamp),
        acknowledged_at: row.get::<Option<i64>>(4)?.map(millis_to_timestamp),
        acknowledged_by: row.get(5)?,
    })
}

#[async_trait]
impl Database for DatabaseImpl {
    async fn list_enabled_resources(&self) -> Result<Vec<Resource>> {
        let conn = self.get_conn().await?;
        let sql = format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE enabled = 1 ORDER BY name");
        let mut rows = conn.query(&sql, ()).await?;

        let mut resources = Vec::new();
        while let Some(row) = rows.next().await? {
            resources.push(resource_from_row(&row)?);
        }

        Ok(resources)
    }

    async fn get_resource(&self, id: Uuid) -> Result<Option<Resource>> {
        let conn = self.get_conn().await?;
        let sql = format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE id = ?");
        let mut rows = conn.query(&sql, params![id.to_string()]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(resource_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn save_resource(&self, resource: &Resource) -> Result<()> {
        let conn = self.get_conn().await?;
        let headers = serde_json::to_string(&resource.http_headers)?;
        let sql = format!(
            "INSERT OR REPLACE INTO resources ({RESOURCE_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );

        conn.execute(
            &sql,
            params![
                resource.id.to_string(),
                resource.name.clone(),
                resource.url.clone(),
                resource.resource_type.as_str(),
                resource.check_interval_seconds as i64,
                resource.timeout_ms as i64,
                if resource.enabled { 1 } else { 0 },
                resource.http_keyword.clone(),
                headers,
                resource.cert_expiry_days.map(|v| v as i64),
                resource.quiet_hours.map(|q| q.start_hour as i64),
                resource.quiet_hours.map(|q| q.end_hour as i64),
                resource.sla_target,
                resource.consecutive_failures_threshold as i64,
                resource.response_time_threshold_ms.map(|v| v as i64),
                if resource.maintenance_mode { 1 } else { 0 }
            ],
        )
        .await
        .with_context(|| format!("Failed to save resource {}", resource.id))?;

        Ok(())
    }

    async fn append_check(&self, check: &Check) -> Result<i64> {
        let conn = self.get_conn().await?;
        let details = check.details.as_ref().map(serde_json::to_string).transpose()?;

        conn.execute(
            "INSERT INTO checks (resource_id, status, response_time_ms, status_code, error_message, details, checked_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                check.resource_id.to_string(),
                check.status.to_string(),
                check.response_time_ms,
                check.status_code.map(|v| v as i64),
                check.error_message.clone(),
                details,
                timestamp_to_millis(check.checked_at)
            ],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    async fn get_recent_checks(&self, resource_id: Uuid, limit: usize) -> Result<Vec<Check>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {CHECK_COLUMNS} FROM checks WHERE resource_id = ? ORDER BY checked_at DESC, id DESC LIMIT ?"
        );
        let mut rows = conn.query(&sql, params![resource_id.to_string(), limit as i64]).await?;

        let mut checks = Vec::new();
        while let Some(row) = rows.next().await? {
            checks.push(check_from_row(&row)?);
        }

        Ok(checks)
    }

    async fn get_checks_in_window(
        &self,
        resource_id: Uuid,
        window_start: DateTime<Utc>,
    ) -> Result<Vec<Check>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {CHECK_COLUMNS} FROM checks WHERE resource_id = ? AND checked_at >= ? ORDER BY checked_at ASC, id ASC"
        );
        let mut rows = conn
            .query(&sql, params![resource_id.to_string(), timestamp_to_millis(window_start)])
            .await?;

        let mut checks = Vec::new();
        while let Some(row) = rows.next().await? {
            checks.push(check_from_row(&row)?);
        }

        Ok(checks)
    }

    async fn get_open_incident(&self, resource_id: Uuid) -> Result<Option<Incident>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {INCIDENT_COLUMNS} FROM incidents WHERE resource_id = ? AND resolved_at IS NULL LIMIT 1"
        );
        let mut rows = conn.query(&sql, params![resource_id.to_string()]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(incident_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn create_incident(&self, resource_id: Uuid, started_at: DateTime<Utc>) -> Result<Incident> {
        let conn = self.get_conn().await?;

        conn.execute(
            "INSERT INTO incidents (resource_id, started_at) VALUES (?, ?)",
            params![resource_id.to_string(), timestamp_to_millis(started_at)],
        )
        .await
        .with_context(|| format!("Failed to open incident for resource {resource_id}"))?;

        Ok(Incident {
            id: conn.last_insert_rowid(),
            resource_id,
            started_at: millis_to_timestamp(timestamp_to_millis(started_at)),
            resolved_at: None,
            acknowledged_at: None,
            acknowledged_by: None,
        })
    }

    async fn resolve_incident(&self, incident_id: i64, resolved_at: DateTime<Utc>) -> Result<()> {
        let conn = self.get_conn().await?;

        let updated = conn
            .execute(
                "UPDATE incidents SET resolved_at = ? WHERE id = ? AND resolved_at IS NULL",
                params![timestamp_to_millis(resolved_at), incident_id],
            )
            .await?;

        if updated == 0 {
            return Err(anyhow!("Incident {incident_id} is not open"));
        }

        Ok(())
    }

    async fn get_incidents_in_window(
        &self,
        resource_id: Uuid,
        window_start: DateTime<Utc>,
    ) -> Result<Vec<Incident>> {
        let conn = self.get_conn().await?;
        let sql = format!(
            "SELECT {INCIDENT_COLUMNS} FROM incidents \
             WHERE resource_id = ? AND (resolved_at IS NULL OR resolved_at >= ?) \
             ORDER BY started_at ASC, id ASC"
        );
        let mut rows = conn
            .query(&sql, params![resource_id.to_string(), timestamp_to_millis(window_start)])
            .await?;

        let mut incidents = Vec::new();
        while let Some(row) = rows.next().await? {
            incidents.push(incident_from_row(&row)?);
        }

        Ok(incidents)
    }

    async fn acknowledge_incident(
        &self,
        incident_id: i64,
        acknowledged_by: &str,
        acknowledged_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.get_conn().await?;

        let updated = conn
            .execute(
                "UPDATE incidents SET acknowledged_at = ?, acknowledged_by = ? WHERE id = ?",
                params![timestamp_to_millis(acknowledged_at), acknowledged_by, incident_id],
            )
            .await?;

        if updated == 0 {
            return Err(anyhow!("Incident {incident_id} not found"));
        }

        Ok(())
    }

    async fn prune_checks_older_than(&self, retention: chrono::Duration) -> Result<u64> {
        let conn = self.get_conn().await?;
        let cutoff = Utc::now() - retention;

        let deleted = conn
            .execute("DELETE FROM checks WHERE checked_at < ?", params![timestamp_to_millis(cutoff)])
            .await?;

        Ok(deleted)
    }
}
