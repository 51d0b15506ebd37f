use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

use crate::alerting::{AlertDispatcher, DispatchReport};
use crate::db::MeasurementStore;
use crate::probe::ProbeRunner;
use crate::server::connections::ConnectionRegistry;
use crate::web::models::websocket_models::ServerEvent;

/// What one check cycle did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CycleReport {
    /// `None` when the sample could not be stored.
    pub recorded_loadtime: Option<f64>,
    /// Load time of the newest stored sample, as broadcast.
    pub latest_loadtime: Option<f64>,
    pub broadcast_to: usize,
    pub dispatch: Option<DispatchReport>,
}

/// Drives probe → record → broadcast → dispatch on a fixed cadence.
pub struct Scheduler {
    runner: ProbeRunner,
    measurements: Arc<dyn MeasurementStore>,
    connections: Arc<ConnectionRegistry>,
    dispatcher: AlertDispatcher,
    recent_window: usize,
    fast_threshold_seconds: f64,
    cycle_in_progress: AtomicBool,
}

/// Clears the in-progress flag when the cycle ends, however it ends.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Scheduler {
    pub fn new(
        runner: ProbeRunner,
        measurements: Arc<dyn MeasurementStore>,
        connections: Arc<ConnectionRegistry>,
        dispatcher: AlertDispatcher,
        recent_window: usize,
        fast_threshold_seconds: f64,
    ) -> Self {
        Self {
            runner,
            measurements,
            connections,
            dispatcher,
            recent_window,
            fast_threshold_seconds,
            cycle_in_progress: AtomicBool::new(false),
        }
    }

    /// Runs one cycle. Returns `None` without doing anything if another
    /// cycle is still in flight.
    pub async fn run_cycle(&self) -> Option<CycleReport> {
        if self
            .cycle_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Previous check cycle is still running, skipping this tick.");
            return None;
        }
        let _guard = CycleGuard(&self.cycle_in_progress);

        let mut report = CycleReport::default();

        match self.runner.run().await {
            Ok(loadtime) => {
                info!(loadtime, "Recorded load time.");
                report.recorded_loadtime = Some(loadtime);
            }
            // Still broadcast whatever history is available.
            Err(e) => error!(error = %e, "Failed to record load time."),
        }

        let points = match self.measurements.recent(self.recent_window).await {
            Ok(points) => points,
            Err(e) => {
                error!(error = %e, "Failed to load recent samples, ending cycle.");
                return Some(report);
            }
        };
        report.latest_loadtime = points.last().map(|point| point.loadtime);
        report.broadcast_to = self.connections.broadcast(&ServerEvent::Times(points));
        debug!(connections = report.broadcast_to, "Broadcast recent samples.");

        match report.latest_loadtime {
            Some(latest) if latest < self.fast_threshold_seconds => {
                match self.dispatcher.dispatch().await {
                    Ok(dispatch) => report.dispatch = Some(dispatch),
                    Err(e) => error!(error = %e, "Alert dispatch skipped."),
                }
            }
            _ => debug!("Site is not fast, no alerts dispatched."),
        }

        Some(report)
    }

    /// Ticks on multiples of `period` since the Unix epoch, so a 5 minute
    /// period fires at :00, :05, :10 and so on. Each cycle runs on its own
    /// task; the guard in [`Scheduler::run_cycle`] keeps them from overlapping.
    ///
    /// Returns once `shutdown_rx` fires, after the cycle in flight has finished.
    pub async fn start(self: Arc<Self>, period: Duration, mut shutdown_rx: watch::Receiver<()>) {
        let first_tick = Instant::now() + delay_until_next_boundary(period);
        let mut interval = interval_at(first_tick, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(period_seconds = period.as_secs(), "Check scheduler started.");

        let mut cycles = JoinSet::new();
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    while cycles.try_join_next().is_some() {}
                    let scheduler = Arc::clone(&self);
                    cycles.spawn(async move {
                        scheduler.run_cycle().await;
                    });
                }
                _ = shutdown_rx.changed() => {
                    info!("Check scheduler stopping.");
                    break;
                }
            }
        }

        while cycles.join_next().await.is_some() {}
        info!("Check scheduler stopped.");
    }
}

fn delay_until_next_boundary(period: Duration) -> Duration {
    let period_ms = period.as_millis().max(1) as i64;
    let now_ms = Utc::now().timestamp_millis();
    Duration::from_millis((period_ms - now_ms.rem_euclid(period_ms)) as u64)
}
