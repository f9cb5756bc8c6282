//! Process-owned scheduler for the payment auto-poll.
//!
//! `Stopped -> Running` on [`PaymentScheduler::start`], back to `Stopped` on
//! [`PaymentScheduler::stop`]. While running, one `tokio::time::interval`
//! drives the job; a slow cycle delays the next tick instead of overlapping it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::error::{AppError, AppErrorKind, AppResult, ValidationError};
use crate::services::status_poller::PollSummary;

pub const MIN_INTERVAL_MINUTES: u64 = 1;
pub const MAX_INTERVAL_MINUTES: u64 = 24 * 60;

/// How long `stop` waits for an in-flight cycle before aborting it.
const STOP_GRACE: Duration = Duration::from_secs(30);

/// Work the scheduler runs on every tick.
#[async_trait]
pub trait PollJob: Send + Sync {
    async fn poll_cycle(&self) -> AppResult<PollSummary>;
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("interval must be between 1 and 1440 minutes, got {minutes}")]
    InvalidInterval { minutes: u64 },
}

impl From<SchedulerError> for AppError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::InvalidInterval { .. } => {
                AppError::new(AppErrorKind::Validation(ValidationError::OutOfRange {
                    field: "interval_minutes".to_string(),
                    min: Some(MIN_INTERVAL_MINUTES.to_string()),
                    max: Some(MAX_INTERVAL_MINUTES.to_string()),
                }))
            }
        }
    }
}

fn validate_interval(minutes: u64) -> Result<(), SchedulerError> {
    if (MIN_INTERVAL_MINUTES..=MAX_INTERVAL_MINUTES).contains(&minutes) {
        Ok(())
    } else {
        Err(SchedulerError::InvalidInterval { minutes })
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Start the scheduler at boot
    pub enabled: bool,
    pub interval_minutes: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: 5,
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: std::env::var("PAYMENT_POLL_ENABLED")
                .map(|v| !matches!(v.trim().to_lowercase().as_str(), "false" | "0" | "no" | "off"))
                .unwrap_or(defaults.enabled),
            interval_minutes: std::env::var("PAYMENT_POLL_INTERVAL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.interval_minutes),
        }
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        validate_interval(self.interval_minutes)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_summary: Option<PollSummary>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub interval_minutes: u64,
    pub started_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub stats: SchedulerStats,
}

struct RunningTask {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
    started_at: DateTime<Utc>,
}

struct SchedulerState {
    interval_minutes: u64,
    running: Option<RunningTask>,
}

pub struct PaymentScheduler {
    job: Arc<dyn PollJob>,
    state: Mutex<SchedulerState>,
    stats: Arc<Mutex<SchedulerStats>>,
}

impl PaymentScheduler {
    pub fn new(job: Arc<dyn PollJob>, config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        Ok(Self {
            job,
            state: Mutex::new(SchedulerState {
                interval_minutes: config.interval_minutes,
                running: None,
            }),
            stats: Arc::new(Mutex::new(SchedulerStats::default())),
        })
    }

    /// Starts the loop. Calling it while running leaves the existing loop
    /// alone.
    pub async fn start(&self) -> SchedulerStatus {
        let mut state = self.state.lock().await;
        let alive = state
            .running
            .as_ref()
            .map(|task| !task.handle.is_finished())
            .unwrap_or(false);
        if alive {
            info!("payment scheduler already running");
        } else {
            self.spawn(&mut state);
        }
        self.status_of(&state).await
    }

    pub async fn stop(&self) -> SchedulerStatus {
        let mut state = self.state.lock().await;
        Self::halt(&mut state).await;
        self.status_of(&state).await
    }

    /// Changes the period. A running loop is stopped and started again with
    /// the new period.
    pub async fn reconfigure(&self, interval_minutes: u64) -> Result<SchedulerStatus, SchedulerError> {
        validate_interval(interval_minutes)?;
        let mut state = self.state.lock().await;
        let was_running = state.running.is_some();
        Self::halt(&mut state).await;
        state.interval_minutes = interval_minutes;
        info!(interval_minutes, "payment scheduler interval changed");
        if was_running {
            self.spawn(&mut state);
        }
        Ok(self.status_of(&state).await)
    }

    pub async fn status(&self) -> SchedulerStatus {
        let state = self.state.lock().await;
        self.status_of(&state).await
    }

    pub async fn is_running(&self) -> bool {
        let state = self.state.lock().await;
        state
            .running
            .as_ref()
            .map(|task| !task.handle.is_finished())
            .unwrap_or(false)
    }

    fn spawn(&self, state: &mut SchedulerState) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let period = Duration::from_secs(state.interval_minutes * 60);
        let handle = tokio::spawn(run_loop(
            self.job.clone(),
            self.stats.clone(),
            period,
            shutdown_rx,
        ));
        info!(interval_minutes = state.interval_minutes, "payment scheduler started");
        state.running = Some(RunningTask {
            shutdown_tx,
            handle,
            started_at: Utc::now(),
        });
    }

    async fn halt(state: &mut SchedulerState) {
        let Some(mut task) = state.running.take() else {
            return;
        };
        let _ = task.shutdown_tx.send(true);
        if tokio::time::timeout(STOP_GRACE, &mut task.handle).await.is_err() {
            warn!("payment scheduler cycle did not finish in time, aborting");
            task.handle.abort();
        }
        info!("payment scheduler stopped");
    }

    async fn status_of(&self, state: &SchedulerState) -> SchedulerStatus {
        let running = state.running.as_ref().filter(|task| !task.handle.is_finished());
        SchedulerStatus {
            running: running.is_some(),
            interval_minutes: state.interval_minutes,
            started_at: running.map(|task| task.started_at),
            stats: self.stats.lock().await.clone(),
        }
    }
}

async fn run_loop(
    job: Arc<dyn PollJob>,
    stats: Arc<Mutex<SchedulerStats>>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                run_cycle(job.as_ref(), &stats).await;
            }
        }
    }
}

/// Errors and panics from the job are recorded and logged; the loop always
/// survives them.
async fn run_cycle(job: &dyn PollJob, stats: &Mutex<SchedulerStats>) {
    let result = AssertUnwindSafe(job.poll_cycle()).catch_unwind().await;
    let mut stats = stats.lock().await;
    stats.last_run_at = Some(Utc::now());
    match result {
        Ok(Ok(summary)) => {
            stats.cycles_completed += 1;
            stats.last_summary = Some(summary);
            stats.last_error = None;
        }
        Ok(Err(e)) => {
            stats.cycles_failed += 1;
            stats.last_error = Some(e.to_string());
            error!(error = %e, "payment auto-poll cycle failed");
        }
        Err(_) => {
            stats.cycles_failed += 1;
            stats.last_error = Some("auto-poll cycle panicked".to_string());
            error!("payment auto-poll cycle panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_bounds_are_enforced() {
        assert!(validate_interval(0).is_err());
        assert!(validate_interval(1).is_ok());
        assert!(validate_interval(1440).is_ok());
        assert!(validate_interval(1441).is_err());
    }

    #[test]
    fn invalid_interval_maps_to_bad_request() {
        let err: AppError = SchedulerError::InvalidInterval { minutes: 0 }.into();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn default_config_polls_every_five_minutes() {
        let cfg = SchedulerConfig::default();
        assert!(cfg.enabled);
        assert_eq!(cfg.interval_minutes, 5);
        assert!(cfg.validate().is_ok());
    }
}
