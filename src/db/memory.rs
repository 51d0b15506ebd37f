//! In-memory stores with an injectable clock, for tests and `--ephemeral` runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Utc};
use dashmap::DashMap;
use tokio::sync::RwLock;

use super::models::{LatencyPoint, LatencySample, PendingAlert};
use super::{MeasurementStore, NotificationRegistry, StorageError};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

pub struct MemoryMeasurementStore {
    samples: RwLock<BTreeMap<DateTime<Utc>, f64>>,
    clock: Clock,
    display_offset: FixedOffset,
}

impl MemoryMeasurementStore {
    pub fn new(clock: Clock, display_offset: FixedOffset) -> Self {
        Self {
            samples: RwLock::new(BTreeMap::new()),
            clock,
            display_offset,
        }
    }

    pub async fn len(&self) -> usize {
        self.samples.read().await.len()
    }
}

#[async_trait]
impl MeasurementStore for MemoryMeasurementStore {
    async fn record(&self, loadtime: f64) -> Result<bool, StorageError> {
        let checktime = (self.clock)();
        let mut samples = self.samples.write().await;
        if samples.contains_key(&checktime) {
            return Ok(false);
        }
        samples.insert(checktime, loadtime);
        Ok(true)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<LatencyPoint>, StorageError> {
        let samples = self.samples.read().await;
        let mut latest: Vec<LatencyPoint> = samples
            .iter()
            .rev()
            .take(limit)
            .map(|(checktime, loadtime)| {
                LatencyPoint::from_sample(
                    &LatencySample {
                        checktime: *checktime,
                        loadtime: *loadtime,
                    },
                    self.display_offset,
                )
            })
            .collect();
        latest.reverse();
        Ok(latest)
    }
}

pub struct MemoryNotificationRegistry {
    alerts: DashMap<String, DateTime<Utc>>,
    clock: Clock,
}

impl MemoryNotificationRegistry {
    pub fn new(clock: Clock) -> Self {
        Self {
            alerts: DashMap::new(),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}

#[async_trait]
impl NotificationRegistry for MemoryNotificationRegistry {
    async fn upsert(&self, user_id: &str) -> Result<(), StorageError> {
        self.alerts.insert(user_id.to_string(), (self.clock)());
        Ok(())
    }

    async fn get(&self, user_id: &str) -> Result<Option<PendingAlert>, StorageError> {
        Ok(self.alerts.get(user_id).map(|entry| PendingAlert {
            id: entry.key().clone(),
            start_time: *entry.value(),
        }))
    }

    async fn due(&self, min_wait: ChronoDuration) -> Result<Vec<PendingAlert>, StorageError> {
        let cutoff = (self.clock)() - min_wait;
        let mut alerts: Vec<PendingAlert> = self
            .alerts
            .iter()
            .filter(|entry| *entry.value() <= cutoff)
            .map(|entry| PendingAlert {
                id: entry.key().clone(),
                start_time: *entry.value(),
            })
            .collect();
        alerts.sort_by_key(|alert| alert.start_time);
        Ok(alerts)
    }

    async fn remove(&self, user_id: &str) -> Result<bool, StorageError> {
        Ok(self.alerts.remove(user_id).is_some())
    }

    async fn remove_delivered(&self, alert: &PendingAlert) -> Result<bool, StorageError> {
        Ok(self
            .alerts
            .remove_if(&alert.id, |_, start_time| *start_time == alert.start_time)
            .is_some())
    }
}
