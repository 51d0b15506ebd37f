use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::models::{LatencyPoint, PendingAlert, format_clock};

/// A pending alert as pushed to its owner.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AlertView {
    pub id: String,
    pub start_time: DateTime<Utc>,
    /// Clock time at which the delivery window closes.
    pub end_time: String,
}

impl AlertView {
    pub fn from_alert(
        alert: &PendingAlert,
        delivery_window: ChronoDuration,
        display_offset: FixedOffset,
    ) -> Self {
        Self {
            id: alert.id.clone(),
            start_time: alert.start_time,
            end_time: format_clock(alert.delivery_window_end(delivery_window), display_offset),
        }
    }
}

/// Server → client pushes, framed as `{"event": ..., "data": ...}`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum ServerEvent {
    Times(Vec<LatencyPoint>),
    Notify(AlertView),
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct AuthPayload {
    pub sign: String,
}

/// Client → server events.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Auth(AuthPayload),
    /// "Tell me when the site is fast again." Any payload is ignored.
    Notify,
}

#[derive(Error, Debug)]
pub enum ClientEventError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Unknown event: {0}")]
    UnknownEvent(String),
}

#[derive(Deserialize)]
struct RawClientFrame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl ClientEvent {
    pub fn parse(text: &str) -> Result<Self, ClientEventError> {
        let frame: RawClientFrame = serde_json::from_str(text)?;
        match frame.event.as_str() {
            "auth" => Ok(ClientEvent::Auth(serde_json::from_value(frame.data)?)),
            "notify" => Ok(ClientEvent::Notify),
            _ => Err(ClientEventError::UnknownEvent(frame.event)),
        }
    }
}
