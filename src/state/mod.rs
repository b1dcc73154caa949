//! Durable maintenance state.
//!
//! The [`StateStore`] is the sole owner of the [`MaintenanceState`] record.
//! Components never hold a mutable copy: they take a snapshot with
//! [`StateStore::get`] and write back through [`StateStore::commit`], which
//! applies a [`StateDelta`] as one atomic read-modify-write.

pub mod file;
pub mod memory;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The durable maintenance record, one per device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceState {
    /// Last successful maintenance completion. `None` means never run.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Last successfully delivered overdue notification.
    pub last_nag_at: Option<DateTime<Utc>>,
    /// Whether the one-time introduction notice has been delivered.
    pub first_run_notice_shown: bool,
    /// When the introduction notice was delivered. Serves as the overdue
    /// reference until the first successful run.
    pub nag_baseline_at: Option<DateTime<Utc>>,
}

impl MaintenanceState {
    /// The instant overdue-ness is measured from: the last run, or the
    /// first-run grace baseline when maintenance has never completed.
    pub fn overdue_reference(&self) -> Option<DateTime<Utc>> {
        self.last_run_at.or(self.nag_baseline_at)
    }
}

/// The field-set written by one commit. `None` fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateDelta {
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_nag_at: Option<DateTime<Utc>>,
    pub first_run_notice_shown: Option<bool>,
    pub nag_baseline_at: Option<DateTime<Utc>>,
}

impl StateDelta {
    /// Delta recording a successful maintenance run.
    pub fn run_completed(at: DateTime<Utc>) -> Self {
        Self {
            last_run_at: Some(at),
            ..Self::default()
        }
    }

    /// Delta recording delivery of the introduction notice, arming the
    /// overdue grace period at the same instant.
    pub fn first_run_notice_delivered(at: DateTime<Utc>) -> Self {
        Self {
            first_run_notice_shown: Some(true),
            nag_baseline_at: Some(at),
            ..Self::default()
        }
    }

    /// Delta recording delivery of an overdue notification.
    pub fn overdue_notice_delivered(at: DateTime<Utc>) -> Self {
        Self {
            last_nag_at: Some(at),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply this delta on top of `current`.
    ///
    /// Timestamps never move backward, `first_run_notice_shown` never returns
    /// to `false`, and the grace baseline is written at most once.
    pub fn apply(&self, current: &MaintenanceState) -> MaintenanceState {
        MaintenanceState {
            last_run_at: latest(current.last_run_at, self.last_run_at),
            last_nag_at: latest(current.last_nag_at, self.last_nag_at),
            first_run_notice_shown: current.first_run_notice_shown
                || self.first_run_notice_shown.unwrap_or(false),
            nag_baseline_at: current.nag_baseline_at.or(self.nag_baseline_at),
        }
    }
}

fn latest(
    current: Option<DateTime<Utc>>,
    proposed: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (current, proposed) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// Durable persistence for [`MaintenanceState`].
///
/// Both methods may block on file I/O and on other processes' commits. Async
/// callers run commits on the blocking pool.
pub trait StateStore: Send + Sync {
    /// Take a fresh snapshot of the record.
    fn get(&self) -> Result<MaintenanceState>;

    /// Atomically apply `delta` and return the resulting record.
    ///
    /// A failed commit leaves the previously committed record intact.
    fn commit(&self, delta: &StateDelta) -> Result<MaintenanceState>;
}
