use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use futures_util::future::join_all;
use tracing::{debug, error, info, warn};

use crate::db::models::PendingAlert;
use crate::db::{NotificationRegistry, StorageError};
use crate::notifications::senders::{BotSender, SenderError};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Failed to scan pending alerts: {0}")]
    ScanFailed(#[from] StorageError),
}

/// Outcome of one `dispatch` call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub eligible: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Sent, but the record could not be deleted; it will be sent again.
    pub not_removed: usize,
}

enum Delivery {
    Delivered,
    Failed(SenderError),
    NotRemoved(StorageError),
}

/// Flushes pending alerts through the bot once the site is fast again.
pub struct AlertDispatcher {
    registry: Arc<dyn NotificationRegistry>,
    sender: Arc<dyn BotSender>,
    message: String,
    min_wait: ChronoDuration,
}

impl AlertDispatcher {
    pub fn new(
        registry: Arc<dyn NotificationRegistry>,
        sender: Arc<dyn BotSender>,
        message: String,
        min_wait: ChronoDuration,
    ) -> Self {
        Self {
            registry,
            sender,
            message,
            min_wait,
        }
    }

    /// Sends the notification to every eligible user and deletes the
    /// records that were delivered. Failed sends keep their record.
    pub async fn dispatch(&self) -> Result<DispatchReport, DispatchError> {
        let eligible = self.registry.due(self.min_wait).await?;
        let mut report = DispatchReport {
            eligible: eligible.len(),
            ..Default::default()
        };
        if eligible.is_empty() {
            return Ok(report);
        }

        let deliveries = join_all(eligible.iter().map(|alert| self.deliver(alert))).await;

        for (alert, delivery) in eligible.iter().zip(deliveries) {
            match delivery {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Failed(e) => {
                    warn!(user_id = %alert.id, error = %e, "Failed to deliver alert, keeping it for the next fast check.");
                    report.failed += 1;
                }
                Delivery::NotRemoved(e) => {
                    error!(user_id = %alert.id, error = %e, "Alert delivered but could not be removed.");
                    report.not_removed += 1;
                }
            }
        }

        info!(
            eligible = report.eligible,
            delivered = report.delivered,
            failed = report.failed,
            not_removed = report.not_removed,
            "Alert dispatch finished."
        );
        Ok(report)
    }

    async fn deliver(&self, alert: &PendingAlert) -> Delivery {
        if let Err(e) = self.sender.send(&alert.id, &self.message).await {
            return Delivery::Failed(e);
        }
        match self.registry.remove_delivered(alert).await {
            Ok(true) => Delivery::Delivered,
            Ok(false) => {
                debug!(user_id = %alert.id, "Alert was refreshed during delivery, keeping the new record.");
                Delivery::Delivered
            }
            Err(e) => Delivery::NotRemoved(e),
        }
    }
}
