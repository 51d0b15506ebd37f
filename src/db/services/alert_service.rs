use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use sqlx::PgPool;

use crate::db::models::PendingAlert;
use crate::db::{NotificationRegistry, StorageError};

/// `alerts` table access.
#[derive(Clone)]
pub struct PgNotificationRegistry {
    db_pool: PgPool,
}

impl PgNotificationRegistry {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl NotificationRegistry for PgNotificationRegistry {
    async fn upsert(&self, user_id: &str) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO alerts (id) VALUES ($1) ON CONFLICT (id) DO UPDATE SET start_time = DEFAULT",
        )
        .bind(user_id)
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    async fn get(&self, user_id: &str) -> Result<Option<PendingAlert>, StorageError> {
        let alert = sqlx::query_as::<_, PendingAlert>(
            "SELECT id, start_time FROM alerts WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.db_pool)
        .await?;
        Ok(alert)
    }

    async fn due(&self, min_wait: ChronoDuration) -> Result<Vec<PendingAlert>, StorageError> {
        let min_wait_seconds = min_wait.num_milliseconds() as f64 / 1000.0;
        let alerts = sqlx::query_as::<_, PendingAlert>(
            r#"
            SELECT id, start_time FROM alerts
            WHERE start_time <= now() - make_interval(secs => $1)
            ORDER BY start_time ASC
            "#,
        )
        .bind(min_wait_seconds)
        .fetch_all(&self.db_pool)
        .await?;
        Ok(alerts)
    }

    async fn remove(&self, user_id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM alerts WHERE id = $1")
            .bind(user_id)
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_delivered(&self, alert: &PendingAlert) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM alerts WHERE id = $1 AND start_time = $2")
            .bind(&alert.id)
            .bind(alert.start_time)
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
