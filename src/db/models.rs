use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Format used for clock times pushed to clients, e.g. `14.05`.
pub const CLOCK_FORMAT: &str = "%H.%M";

/// One row of the `pings` table.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct LatencySample {
    pub checktime: DateTime<Utc>,
    pub loadtime: f64,
}

/// A latency sample as presented to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyPoint {
    pub loadtime: f64,
    pub checktime: String,
}

impl LatencyPoint {
    pub fn from_sample(sample: &LatencySample, display_offset: FixedOffset) -> Self {
        Self {
            loadtime: truncate_hundredths(sample.loadtime),
            checktime: format_clock(sample.checktime, display_offset),
        }
    }
}

/// One row of the `alerts` table. Its presence means the user is waiting
/// for the site to become fast again.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct PendingAlert {
    pub id: String,
    pub start_time: DateTime<Utc>,
}

impl PendingAlert {
    pub fn delivery_window_end(&self, delivery_window: ChronoDuration) -> DateTime<Utc> {
        self.start_time + delivery_window
    }
}

/// Truncates (not rounds) a non-negative value to two decimal places.
///
/// The small epsilon keeps values such as `0.29`, which are stored as
/// `0.28999…`, from losing a hundredth.
pub fn truncate_hundredths(value: f64) -> f64 {
    if !value.is_finite() {
        return value;
    }
    ((value * 100.0) + 1e-9).trunc() / 100.0
}

pub fn format_clock(time: DateTime<Utc>, display_offset: FixedOffset) -> String {
    time.with_timezone(&display_offset)
        .format(CLOCK_FORMAT)
        .to_string()
}
