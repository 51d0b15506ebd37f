use async_trait::async_trait;
use chrono::FixedOffset;
use sqlx::PgPool;

use crate::db::models::{LatencyPoint, LatencySample};
use crate::db::{MeasurementStore, StorageError};

const INSERT_SAMPLE: &str = "INSERT INTO pings (loadtime) VALUES ($1) ON CONFLICT DO NOTHING";

/// `pings` table access. `checktime` defaults to `now()` and is the primary
/// key, so two inserts in the same transaction instant collapse into one.
#[derive(Clone)]
pub struct PgMeasurementStore {
    db_pool: PgPool,
    display_offset: FixedOffset,
}

impl PgMeasurementStore {
    pub fn new(db_pool: PgPool, display_offset: FixedOffset) -> Self {
        Self {
            db_pool,
            display_offset,
        }
    }
}

#[async_trait]
impl MeasurementStore for PgMeasurementStore {
    async fn record(&self, loadtime: f64) -> Result<bool, StorageError> {
        let result = sqlx::query(INSERT_SAMPLE)
            .bind(loadtime)
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<LatencyPoint>, StorageError> {
        let samples = sqlx::query_as::<_, LatencySample>(
            r#"
            SELECT checktime, loadtime FROM (
                SELECT checktime, loadtime FROM pings ORDER BY checktime DESC LIMIT $1
            ) AS latest
            ORDER BY latest.checktime ASC
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.db_pool)
        .await?;

        Ok(samples
            .iter()
            .map(|sample| LatencyPoint::from_sample(sample, self.display_offset))
            .collect())
    }
}
