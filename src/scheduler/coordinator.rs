//! Run coordination.
//!
//! [`RunCoordinator`] is the single entry point for every trigger source. It
//! takes the maintenance lock, consults the evaluator, drives the actuator
//! and commits the outcome. The nag flow runs under its own lock.

use super::authority::NamedLock;
use super::gate::FrequencyGate;
use super::nag::{NagEscalator, NagKind, NagPolicy, delivered_delta};
use super::trigger::{Decision, SkipReason, TriggerEvaluator, TriggerEvent, TriggerPolicy};
use crate::actuator::{Actuator, CommandActuator};
use crate::clock::{SystemClock, TimeSource, elapsed_between};
use crate::config::UpkeepConfig;
use crate::error::{Result, UpkeepError};
use crate::idle::{CommandIdleProbe, IdleProbe, IdleReading};
use crate::state::{FileStateStore, MaintenanceState, StateDelta, StateStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Name of the lock serialising maintenance runs.
pub const MAINTENANCE_LOCK: &str = "maintenance";

/// Name of the lock serialising notification checks.
pub const NAG_LOCK: &str = "nag";

/// How long a run cancelled at its deadline gets to wind down before it is
/// detached.
const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// Result of one trigger evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Skipped(SkipReason),
    Completed { at: DateTime<Utc> },
    /// The actuator reported failure. Nothing was committed.
    Failed(String),
    /// The deadline passed before the run (or the lock wait) finished.
    Incomplete,
    Cancelled,
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Skipped(reason) => write!(f, "skipped: {reason}"),
            Self::Completed { at } => write!(f, "completed at {}", at.to_rfc3339()),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::Incomplete => write!(f, "incomplete: deadline reached"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of one nag check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NagOutcome {
    /// Nothing to say.
    Quiet,
    /// Another check holds the nag lock.
    Busy,
    Delivered(NagKind),
    /// Delivery failed. Nothing was committed.
    Failed(String),
}

impl std::fmt::Display for NagOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Quiet => write!(f, "nothing to report"),
            Self::Busy => write!(f, "another check in progress"),
            Self::Delivered(kind) => write!(f, "delivered {kind}"),
            Self::Failed(reason) => write!(f, "delivery failed: {reason}"),
        }
    }
}

/// Point-in-time view of the scheduler for status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub checked_at: DateTime<Utc>,
    #[serde(flatten)]
    pub state: MaintenanceState,
    pub is_due: bool,
    pub next_due_at: Option<DateTime<Utc>>,
    /// Time since the last run (or grace baseline), once past the overdue
    /// threshold.
    pub overdue_for_secs: Option<u64>,
    /// Notification the next nag check would deliver.
    pub pending_notice: Option<NagKind>,
}

/// Drives triggers and nag checks against the shared collaborators.
pub struct RunCoordinator {
    store: Arc<dyn StateStore>,
    actuator: Arc<dyn Actuator>,
    idle: Arc<dyn IdleProbe>,
    clock: Arc<dyn TimeSource>,
    maintenance_lock: NamedLock,
    nag_lock: NamedLock,
    evaluator: TriggerEvaluator,
    escalator: NagEscalator,
    stop_grace: Duration,
}

impl RunCoordinator {
    /// Create a coordinator with default policies and in-process locks.
    pub fn new(
        store: Arc<dyn StateStore>,
        actuator: Arc<dyn Actuator>,
        idle: Arc<dyn IdleProbe>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            store,
            actuator,
            idle,
            clock,
            maintenance_lock: NamedLock::in_process(MAINTENANCE_LOCK),
            nag_lock: NamedLock::in_process(NAG_LOCK),
            evaluator: TriggerEvaluator::default(),
            escalator: NagEscalator::default(),
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }

    /// Build the production wiring: file store, command actuator and idle
    /// probe, system clock, and lock files under `state_dir`.
    pub fn from_config(config: &UpkeepConfig, state_dir: &Path) -> Self {
        let clock: Arc<dyn TimeSource> = Arc::new(SystemClock::new());
        let stale_after = config.lock.stale_after();
        Self::new(
            Arc::new(FileStateStore::new(state_dir.join(crate::upkeep_dirs::STATE_FILE_NAME))),
            Arc::new(CommandActuator::new(config.actuator.clone())),
            Arc::new(CommandIdleProbe::new(&config.idle, Arc::clone(&clock))),
            clock,
        )
        .with_locks(
            NamedLock::new(MAINTENANCE_LOCK, state_dir, stale_after),
            NamedLock::new(NAG_LOCK, state_dir, stale_after),
        )
        .with_trigger_policy(TriggerPolicy::from(&config.schedule))
        .with_nag_policy(NagPolicy::from(&config.nag))
    }

    /// Replace the maintenance and nag locks.
    pub fn with_locks(mut self, maintenance: NamedLock, nag: NamedLock) -> Self {
        self.maintenance_lock = maintenance;
        self.nag_lock = nag;
        self
    }

    pub fn with_trigger_policy(mut self, policy: TriggerPolicy) -> Self {
        self.evaluator = TriggerEvaluator::new(policy);
        self
    }

    pub fn with_nag_policy(mut self, policy: NagPolicy) -> Self {
        self.escalator = NagEscalator::new(policy);
        self
    }

    /// How long a run cancelled at its deadline may take to stop. A run still
    /// going after that is detached and keeps the maintenance lock until it
    /// ends.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Evaluate `event` and run maintenance if it is due.
    ///
    /// Pre-suspend triggers wait for a contended lock and bound the whole
    /// attempt by the pre-suspend deadline. Other triggers treat a held lock
    /// as the work already being handled.
    ///
    /// # Errors
    ///
    /// Store and lock failures. Actuator failures are reported as
    /// [`RunOutcome::Failed`].
    pub async fn handle_trigger(
        &self,
        event: TriggerEvent,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        if cancel.is_cancelled() {
            return Ok(RunOutcome::Cancelled);
        }
        let started = tokio::time::Instant::now();

        let acquired = if event.waits_for_lock() {
            let wait = self.evaluator.policy().pre_suspend_deadline;
            tokio::select! {
                acquired = self.maintenance_lock.acquire_within(wait) => acquired?,
                () = cancel.cancelled() => return Ok(RunOutcome::Cancelled),
            }
        } else {
            self.maintenance_lock.try_acquire()?
        };
        let Some(guard) = acquired else {
            if event.waits_for_lock() {
                warn!(event = %event, "maintenance lock still held at deadline");
                return Ok(RunOutcome::Incomplete);
            }
            debug!(event = %event, "maintenance lock held elsewhere");
            return Ok(RunOutcome::Skipped(SkipReason::Busy));
        };

        let state = self.store.get()?;
        let idle = if event.needs_idle_reading() {
            Some(self.read_idle().await)
        } else {
            None
        };
        let now = self.clock.now();

        let decision = self.evaluator.evaluate(event, now, &state, idle.as_ref());
        if let Decision::Skip(reason) = decision {
            debug!(event = %event, reason = %reason, "maintenance skipped");
            return Ok(RunOutcome::Skipped(reason));
        }

        info!(event = %event, "starting maintenance");
        let run_cancel = cancel.child_token();
        let actuator = Arc::clone(&self.actuator);
        let token = run_cancel.clone();
        let mut run = Box::pin(async move { actuator.run_maintenance(token).await });
        let result = match decision.deadline() {
            Some(deadline) => match tokio::time::timeout_at(started + deadline, &mut run).await {
                Ok(result) => result,
                Err(_) => {
                    run_cancel.cancel();
                    match tokio::time::timeout(self.stop_grace, &mut run).await {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(_)) => Err(UpkeepError::DeadlineExceeded(deadline)),
                        Err(_) => {
                            warn!(
                                event = %event,
                                "maintenance ignored cancellation, holding the lock until it ends"
                            );
                            tokio::spawn(async move {
                                let _ = run.await;
                                drop(guard);
                            });
                            Err(UpkeepError::DeadlineExceeded(deadline))
                        }
                    }
                }
            },
            None => run.await,
        };

        match result {
            Ok(()) => {
                let at = self.clock.now().wall;
                self.commit(StateDelta::run_completed(at)).await?;
                info!(event = %event, "maintenance completed");
                Ok(RunOutcome::Completed { at })
            }
            Err(UpkeepError::DeadlineExceeded(deadline)) => {
                warn!(
                    event = %event,
                    deadline_secs = deadline.as_secs(),
                    "maintenance stopped at deadline"
                );
                Ok(RunOutcome::Incomplete)
            }
            Err(UpkeepError::Cancelled) => {
                info!(event = %event, "maintenance cancelled");
                Ok(RunOutcome::Cancelled)
            }
            Err(e @ (UpkeepError::Store(_) | UpkeepError::Lock(_))) => Err(e),
            Err(e) => {
                warn!(event = %event, "maintenance failed: {e}");
                Ok(RunOutcome::Failed(e.to_string()))
            }
        }
    }

    /// Deliver the first-run or overdue notification if one is due.
    ///
    /// # Errors
    ///
    /// Store and lock failures. Delivery failures are reported as
    /// [`NagOutcome::Failed`].
    pub async fn check_nag(&self) -> Result<NagOutcome> {
        let Some(_guard) = self.nag_lock.try_acquire()? else {
            debug!("nag lock held elsewhere");
            return Ok(NagOutcome::Busy);
        };

        let state = self.store.get()?;
        let decision = self.escalator.evaluate(self.clock.now().wall, &state);
        let (Some(kind), Some(notification)) =
            (decision.kind(), self.escalator.notification(&decision))
        else {
            return Ok(NagOutcome::Quiet);
        };

        if let Err(e) = self.actuator.send_notification(&notification).await {
            warn!(kind = %kind, "notification not delivered: {e}");
            return Ok(NagOutcome::Failed(e.to_string()));
        }

        self.commit(delivered_delta(kind, self.clock.now().wall)).await?;
        info!(kind = %kind, urgency = %notification.urgency, "notification delivered");
        Ok(NagOutcome::Delivered(kind))
    }

    /// Snapshot the state together with what the scheduler would do now.
    ///
    /// # Errors
    ///
    /// Store read failures.
    pub fn status(&self) -> Result<StatusReport> {
        let state = self.store.get()?;
        let now = self.clock.now().wall;
        let policy = self.evaluator.policy();

        let pending_notice = self.escalator.evaluate(now, &state).kind();
        let overdue_for = state
            .overdue_reference()
            .and_then(|reference| elapsed_between(reference, now))
            .filter(|elapsed| *elapsed > self.escalator.policy().overdue_threshold);

        Ok(StatusReport {
            checked_at: now,
            is_due: FrequencyGate::is_due(now, state.last_run_at, policy.min_interval),
            next_due_at: FrequencyGate::next_due_at(state.last_run_at, policy.min_interval),
            overdue_for_secs: overdue_for.map(|d| d.as_secs()),
            pending_notice,
            state,
        })
    }

    async fn commit(&self, delta: StateDelta) -> Result<MaintenanceState> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.commit(&delta))
            .await
            .map_err(|e| UpkeepError::Store(format!("commit task failed: {e}")))?
    }

    async fn read_idle(&self) -> IdleReading {
        match self.idle.read().await {
            Ok(reading) => reading,
            Err(e) => {
                warn!("idle probe failed, assuming active: {e}");
                IdleReading::active()
            }
        }
    }
}
