//! Frequency throttle.
//!
//! The single authority on whether maintenance is due. Trigger-independent:
//! every trigger path asks the same question with the same inputs.

use crate::clock::{elapsed_between, wall_after};
use chrono::{DateTime, Utc};
use std::time::Duration;

pub struct FrequencyGate;

impl FrequencyGate {
    /// `true` when maintenance has never run, or at least `min_interval` has
    /// passed since the last successful run (inclusive).
    ///
    /// A wall clock that has jumped behind `last_run_at` yields `false`.
    pub fn is_due(
        now: DateTime<Utc>,
        last_run_at: Option<DateTime<Utc>>,
        min_interval: Duration,
    ) -> bool {
        let Some(last) = last_run_at else {
            return true;
        };
        elapsed_between(last, now).is_some_and(|elapsed| elapsed >= min_interval)
    }

    /// Earliest instant at which maintenance becomes due again. `None` when
    /// it has never run.
    pub fn next_due_at(
        last_run_at: Option<DateTime<Utc>>,
        min_interval: Duration,
    ) -> Option<DateTime<Utc>> {
        last_run_at.map(|last| wall_after(last, min_interval))
    }
}
