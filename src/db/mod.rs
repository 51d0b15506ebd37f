//! Durable storage: the latency log and the pending-alert registry.
//!
//! Both stores sit behind traits so the scheduler, the gateway and the
//! dispatcher never see the backing database. Postgres implementations live
//! in [`services`], in-memory ones in [`memory`].

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use sqlx::{PgPool, postgres::PgPoolOptions};
use thiserror::Error;
use tracing::info;

use self::models::{LatencyPoint, PendingAlert};

pub mod memory;
pub mod models;
pub mod services;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),
}

/// Creates the Postgres pool and brings the schema up to date.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, StorageError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Append-only log of latency samples.
#[async_trait]
pub trait MeasurementStore: Send + Sync {
    /// Inserts a sample stamped with the current server time.
    ///
    /// Returns `false` when a sample with the same timestamp already exists;
    /// that is not an error.
    async fn record(&self, loadtime: f64) -> Result<bool, StorageError>;

    /// The `limit` most recent samples, oldest first.
    async fn recent(&self, limit: usize) -> Result<Vec<LatencyPoint>, StorageError>;
}

/// Users waiting to be told that the site is fast again. At most one record per user.
#[async_trait]
pub trait NotificationRegistry: Send + Sync {
    /// Creates the user's record or resets its `start_time` to now, atomically.
    async fn upsert(&self, user_id: &str) -> Result<(), StorageError>;

    async fn get(&self, user_id: &str) -> Result<Option<PendingAlert>, StorageError>;

    /// Records whose `start_time` is at least `min_wait` in the past, oldest first.
    async fn due(&self, min_wait: ChronoDuration) -> Result<Vec<PendingAlert>, StorageError>;

    /// Returns whether a record was actually removed.
    async fn remove(&self, user_id: &str) -> Result<bool, StorageError>;

    /// Removes the record only if it still carries the scanned `start_time`.
    /// A user who re-subscribed after the scan keeps the refreshed record.
    async fn remove_delivered(&self, alert: &PendingAlert) -> Result<bool, StorageError>;
}
