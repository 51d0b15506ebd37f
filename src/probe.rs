//! Latency probing of the monitored site.
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, warn};

use crate::db::{MeasurementStore, StorageError};
use crate::version::user_agent;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Probe timed out after {0:?} without a completed request")]
    Timeout(Duration),
    #[error("No requests completed: {0}")]
    NoRequestsCompleted(String),
    #[error("Failed to build HTTP client: {0}")]
    ClientError(#[from] reqwest::Error),
}

/// Totals of one load burst.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeOutcome {
    pub total_time_seconds: f64,
    pub total_requests: u64,
}

#[async_trait]
pub trait LoadProbe: Send + Sync {
    async fn probe(
        &self,
        url: &str,
        max_requests: u32,
        max_seconds: u64,
    ) -> Result<ProbeOutcome, ProbeError>;
}

/// Mean seconds per request, or `max_seconds` when the probe failed or
/// completed nothing. A broken probe must read as slow, never as fast.
pub fn effective_loadtime(outcome: Result<ProbeOutcome, ProbeError>, max_seconds: u64) -> f64 {
    match outcome {
        Ok(ProbeOutcome {
            total_time_seconds,
            total_requests,
        }) if total_requests > 0 => total_time_seconds / total_requests as f64,
        Ok(_) => max_seconds as f64,
        Err(e) => {
            warn!(error = %e, "Probe failed, recording worst-case load time.");
            max_seconds as f64
        }
    }
}

/// Sequential GET burst with `reqwest`. Every completed response counts,
/// whatever its status; the whole burst is bounded by `max_seconds`.
pub struct HttpLoadProbe {
    client: Client,
}

impl HttpLoadProbe {
    pub fn new() -> Result<Self, ProbeError> {
        let client = Client::builder()
            .user_agent(user_agent())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LoadProbe for HttpLoadProbe {
    async fn probe(
        &self,
        url: &str,
        max_requests: u32,
        max_seconds: u64,
    ) -> Result<ProbeOutcome, ProbeError> {
        let budget = Duration::from_secs(max_seconds);
        let start_time = Instant::now();
        let mut completed: u64 = 0;
        let mut last_error: Option<String> = None;

        let burst = async {
            for _ in 0..max_requests {
                match self.client.get(url).send().await {
                    Ok(response) => {
                        // Drain the body so the timing covers the full page load.
                        let status = response.status();
                        if let Err(e) = response.bytes().await {
                            last_error = Some(e.to_string());
                            continue;
                        }
                        debug!(%status, "Probe request completed.");
                        completed += 1;
                    }
                    Err(e) => {
                        debug!(error = %e, "Probe request failed.");
                        last_error = Some(e.to_string());
                    }
                }
            }
        };
        let timed_out = tokio::time::timeout(budget, burst).await.is_err();
        let elapsed = start_time.elapsed().as_secs_f64();

        if completed == 0 {
            return Err(match last_error {
                Some(e) if !timed_out => ProbeError::NoRequestsCompleted(e),
                _ if timed_out => ProbeError::Timeout(budget),
                _ => ProbeError::NoRequestsCompleted("no requests issued".to_string()),
            });
        }

        Ok(ProbeOutcome {
            total_time_seconds: elapsed,
            total_requests: completed,
        })
    }
}

/// Runs the probe against the target and records the resulting sample.
pub struct ProbeRunner {
    probe: Arc<dyn LoadProbe>,
    store: Arc<dyn MeasurementStore>,
    target_url: String,
    max_requests: u32,
    max_seconds: u64,
}

impl ProbeRunner {
    pub fn new(
        probe: Arc<dyn LoadProbe>,
        store: Arc<dyn MeasurementStore>,
        target_url: String,
        max_requests: u32,
        max_seconds: u64,
    ) -> Self {
        Self {
            probe,
            store,
            target_url,
            max_requests,
            max_seconds,
        }
    }

    /// Returns the load time that was handed to the store.
    pub async fn run(&self) -> Result<f64, StorageError> {
        let outcome = self
            .probe
            .probe(&self.target_url, self.max_requests, self.max_seconds)
            .await;
        let loadtime = effective_loadtime(outcome, self.max_seconds);

        let inserted = self.store.record(loadtime).await?;
        if !inserted {
            debug!(loadtime, "A sample already exists for this timestamp, skipped.");
        }
        Ok(loadtime)
    }
}
