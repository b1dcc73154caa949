//! Long-running trigger sources.
//!
//! The daemon feeds the coordinator from three loops: an optional daily
//! timer, periodic idle polls, and periodic nag checks (the first one at
//! startup, i.e. login). Each loop stops when the shared cancellation token
//! fires; errors are logged and the loop carries on.

use super::coordinator::{NagOutcome, RunCoordinator, RunOutcome};
use super::trigger::TriggerEvent;
use crate::config::UpkeepConfig;
use crate::error::Result;
use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Runs the trigger loops against one coordinator.
pub struct Daemon {
    coordinator: Arc<RunCoordinator>,
    cancel: CancellationToken,
    idle_poll_interval: Duration,
    nag_check_interval: Duration,
    daily_at: Option<(u8, u8)>,
}

impl Daemon {
    /// Create a daemon with the default cadences and no daily timer.
    ///
    /// The loops run until `cancel` is cancelled.
    pub fn new(coordinator: Arc<RunCoordinator>, cancel: CancellationToken) -> Self {
        let defaults = crate::config::DaemonConfig::default();
        Self {
            coordinator,
            cancel,
            idle_poll_interval: Duration::from_secs(defaults.idle_poll_interval_secs),
            nag_check_interval: Duration::from_secs(defaults.nag_check_interval_secs),
            daily_at: None,
        }
    }

    /// Apply the cadences and daily timer from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if `schedule.daily_at` is malformed.
    pub fn configured(mut self, config: &UpkeepConfig) -> Result<Self> {
        self.idle_poll_interval = Duration::from_secs(config.daemon.idle_poll_interval_secs);
        self.nag_check_interval = Duration::from_secs(config.daemon.nag_check_interval_secs);
        self.daily_at = config.schedule.daily_time()?;
        Ok(self)
    }

    pub fn with_idle_poll_interval(mut self, interval: Duration) -> Self {
        self.idle_poll_interval = interval;
        self
    }

    pub fn with_nag_check_interval(mut self, interval: Duration) -> Self {
        self.nag_check_interval = interval;
        self
    }

    /// Fire a scheduled trigger every day at `hour:minute` UTC.
    pub fn with_daily_at(mut self, hour: u8, minute: u8) -> Self {
        self.daily_at = Some((hour, minute));
        self
    }

    /// Run all loops until cancelled.
    pub async fn run(self) {
        info!(
            idle_poll_secs = self.idle_poll_interval.as_secs(),
            nag_check_secs = self.nag_check_interval.as_secs(),
            daily_at = ?self.daily_at,
            "daemon started"
        );
        tokio::join!(self.timer_loop(), self.idle_loop(), self.nag_loop());
        info!("daemon stopped");
    }

    async fn timer_loop(&self) {
        let Some((hour, minute)) = self.daily_at else {
            debug!("no daily timer configured");
            return;
        };
        loop {
            let now = Utc::now();
            let next = next_daily_occurrence(now, hour, minute);
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            debug!(next = %next.to_rfc3339(), "daily timer armed");
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(wait) => {
                    self.fire(TriggerEvent::Scheduled).await;
                }
            }
        }
    }

    async fn idle_loop(&self) {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(self.idle_poll_interval) => {
                    self.fire(TriggerEvent::IdlePoll).await;
                }
            }
        }
    }

    async fn nag_loop(&self) {
        loop {
            self.nag().await;
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(self.nag_check_interval) => {}
            }
        }
    }

    async fn fire(&self, event: TriggerEvent) {
        match self.coordinator.handle_trigger(event, &self.cancel).await {
            Ok(RunOutcome::Skipped(reason)) => {
                debug!(event = %event, reason = %reason, "trigger skipped");
            }
            Ok(outcome @ (RunOutcome::Failed(_) | RunOutcome::Incomplete)) => {
                warn!(event = %event, "trigger {outcome}");
            }
            Ok(outcome) => info!(event = %event, "trigger {outcome}"),
            Err(e) => error!(event = %event, "trigger evaluation failed: {e}"),
        }
    }

    async fn nag(&self) {
        match self.coordinator.check_nag().await {
            Ok(NagOutcome::Failed(reason)) => warn!("nag check: delivery failed: {reason}"),
            Ok(outcome) => debug!("nag check: {outcome}"),
            Err(e) => error!("nag check failed: {e}"),
        }
    }
}

/// The first `hour:minute` UTC strictly after `now`.
pub fn next_daily_occurrence(now: DateTime<Utc>, hour: u8, minute: u8) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(u32::from(hour), u32::from(minute), 0)
        .unwrap_or(NaiveTime::MIN);
    let today = now.date_naive().and_time(time).and_utc();
    if today > now {
        today
    } else {
        today + TimeDelta::days(1)
    }
}
