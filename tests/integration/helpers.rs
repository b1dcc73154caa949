//! Shared helpers for integration tests.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use upkeep::actuator::{Actuator, Notification};
use upkeep::clock::ManualClock;
use upkeep::idle::{FixedIdleProbe, IdleProbe, IdleReading};
use upkeep::scheduler::NamedLock;
use upkeep::scheduler::coordinator::{MAINTENANCE_LOCK, NAG_LOCK};
use upkeep::state::{FileStateStore, StateStore};
use upkeep::{RunCoordinator, UpkeepError};

/// Fixed starting instant for scenario clocks.
pub(crate) fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

/// Actuator recording every call. Runs take `run_time` and count how many
/// are in flight at once.
#[derive(Default)]
pub(crate) struct RecordingActuator {
    pub(crate) runs: AtomicUsize,
    in_flight: AtomicUsize,
    pub(crate) max_in_flight: AtomicUsize,
    pub(crate) fail_runs: AtomicBool,
    pub(crate) fail_notifications: AtomicBool,
    run_time: Duration,
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingActuator {
    pub(crate) fn with_run_time(run_time: Duration) -> Self {
        Self {
            run_time,
            ..Self::default()
        }
    }

    pub(crate) fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub(crate) fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }
}

#[async_trait]
impl Actuator for RecordingActuator {
    async fn run_maintenance(&self, cancel: CancellationToken) -> upkeep::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = tokio::select! {
            () = tokio::time::sleep(self.run_time) => {
                if self.fail_runs.load(Ordering::SeqCst) {
                    Err(UpkeepError::Actuator("maintenance script exited with 1".to_owned()))
                } else {
                    Ok(())
                }
            }
            () = cancel.cancelled() => Err(UpkeepError::Cancelled),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn send_notification(&self, notification: &Notification) -> upkeep::Result<()> {
        if self.fail_notifications.load(Ordering::SeqCst) {
            return Err(UpkeepError::Actuator("notify-send not found".to_owned()));
        }
        self.notifications.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Collaborators of one scenario, shared with its coordinators.
pub(crate) struct Scenario {
    pub(crate) store: Arc<FileStateStore>,
    pub(crate) actuator: Arc<RecordingActuator>,
    pub(crate) idle: Arc<FixedIdleProbe>,
    pub(crate) clock: ManualClock,
}

impl Scenario {
    /// A file-backed scenario rooted in `dir`.
    pub(crate) fn new(dir: &Path, actuator: RecordingActuator) -> Self {
        Self {
            store: Arc::new(FileStateStore::new(dir.join("state.json"))),
            actuator: Arc::new(actuator),
            idle: Arc::new(FixedIdleProbe::new(IdleReading::active())),
            clock: ManualClock::starting_at(epoch()),
        }
    }

    /// A coordinator with its own lock-file handles under `dir`, as a separate
    /// process would have.
    pub(crate) fn coordinator(&self, dir: &Path) -> RunCoordinator {
        let stale_after = Duration::from_secs(3600);
        RunCoordinator::new(
            Arc::clone(&self.store) as Arc<dyn StateStore>,
            Arc::clone(&self.actuator) as Arc<dyn Actuator>,
            Arc::clone(&self.idle) as Arc<dyn IdleProbe>,
            Arc::new(self.clock.clone()),
        )
        .with_locks(
            NamedLock::new(MAINTENANCE_LOCK, dir, stale_after),
            NamedLock::new(NAG_LOCK, dir, stale_after),
        )
    }

    /// Mark the session idle for `idle_for` as of the current clock.
    pub(crate) fn set_idle_for(&self, idle_for: Duration) {
        use upkeep::clock::TimeSource;
        let now = self.clock.now().monotonic;
        self.idle
            .set(Some(IdleReading::idle_since(now.saturating_sub(idle_for))));
    }
}
