/// Storage for resources, the check log and incidents
///
/// The engine only talks to the [`Database`] trait; [`DatabaseImpl`] backs it
/// with a pooled LibSQL connection.
pub mod migrations;
pub mod models;
pub mod repository;

pub use repository::{Database, DatabaseImpl};

use anyhow::Result;

use crate::pool::LibsqlPool;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}

/// Run migrations on a pooled connection and wrap the pool
pub async fn open_database(pool: LibsqlPool) -> Result<DatabaseImpl> {
    {
        let conn = pool.get().await.map_err(|e| anyhow::anyhow!("Failed to get connection: {e}"))?;
        initialize_database(&conn).await?;
    }
    Ok(DatabaseImpl::new_from_pool(pool))
}

/// Fresh database in a temporary directory. Keep the returned guard alive for
/// as long as the database is used.
#[cfg(test)]
pub(crate) async fn test_database() -> Result<(DatabaseImpl, tempfile::TempDir)> {
    let dir = tempfile::tempdir()?;
    let pool = crate::pool::open_local(dir.path().join("sentinel.db"), 4).await?;
    Ok((open_database(pool).await?, dir))
}
