//! PostgreSQL appliance directory.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{Appliance, ApplianceDirectory, PersistenceError};
use crate::heartbeat::StatusRecord;

/// Create a connection pool.
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

/// Apply the embedded migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

#[derive(Debug, FromRow)]
struct ApplianceRow {
    id: Uuid,
    name: String,
    behavior: String,
    status: String,
    last_connected_at: Option<DateTime<Utc>>,
    last_heartbeat_at: Option<DateTime<Utc>>,
}

impl TryFrom<ApplianceRow> for Appliance {
    type Error = PersistenceError;

    fn try_from(row: ApplianceRow) -> Result<Self, Self::Error> {
        let status = row.status.parse().map_err(PersistenceError::Corrupt)?;
        Ok(Appliance {
            id: row.id,
            name: row.name,
            behavior: row.behavior,
            record: StatusRecord {
                status,
                last_connected_at: row.last_connected_at,
                last_heartbeat_at: row.last_heartbeat_at,
            },
        })
    }
}

/// Repository over the `appliances` table.
#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert an appliance (administrative helper, used by tests).
    pub async fn create(&self, appliance: &Appliance) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO appliances (id, name, behavior, status, last_connected_at, last_heartbeat_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(appliance.id)
        .bind(&appliance.name)
        .bind(&appliance.behavior)
        .bind(appliance.record.status.as_str())
        .bind(appliance.record.last_connected_at)
        .bind(appliance.record.last_heartbeat_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete an appliance (administrative helper, used by tests).
    pub async fn delete(&self, id: Uuid) -> Result<bool, PersistenceError> {
        let result = sqlx::query("DELETE FROM appliances WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ApplianceDirectory for PgDirectory {
    async fn get(&self, id: Uuid) -> Result<Option<Appliance>, PersistenceError> {
        sqlx::query_as::<_, ApplianceRow>(
            r#"
            SELECT id, name, behavior, status, last_connected_at, last_heartbeat_at
            FROM appliances
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(Appliance::try_from)
        .transpose()
    }

    async fn save_status(&self, id: Uuid, record: &StatusRecord) -> Result<(), PersistenceError> {
        let result = sqlx::query(
            r#"
            UPDATE appliances
            SET status = $2, last_connected_at = $3, last_heartbeat_at = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(record.status.as_str())
        .bind(record.last_connected_at)
        .bind(record.last_heartbeat_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::NotFound(id));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Appliance>, PersistenceError> {
        sqlx::query_as::<_, ApplianceRow>(
            r#"
            SELECT id, name, behavior, status, last_connected_at, last_heartbeat_at
            FROM appliances
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Appliance::try_from)
        .collect()
    }

    async fn mark_all_down(&self) -> Result<u64, PersistenceError> {
        let result = sqlx::query("UPDATE appliances SET status = 'DOWN' WHERE status <> 'DOWN'")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
