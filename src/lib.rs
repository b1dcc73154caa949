//! Upkeep: throttled, idle-aware system maintenance.
//!
//! Decides when to run a periodic maintenance job (updates, cleanup) and when
//! to tell the user it is overdue.
//!
//! # Architecture
//!
//! - **Clock**: wall time for persisted timestamps, monotonic time for idle
//! - **State**: one durable record, committed atomically through a [`StateStore`]
//! - **Scheduler**: frequency gate, trigger evaluator, nag escalator, and the
//!   coordinator that serialises runs under a named lock
//! - **Collaborators**: [`Actuator`] (run maintenance, notify) and [`IdleProbe`]
//!
//! [`StateStore`]: state::StateStore
//! [`Actuator`]: actuator::Actuator
//! [`IdleProbe`]: idle::IdleProbe

pub mod actuator;
pub mod clock;
pub mod config;
pub mod error;
pub mod idle;
pub mod scheduler;
pub mod state;
pub mod upkeep_dirs;

#[cfg(test)]
mod test_utils;

pub use config::UpkeepConfig;
pub use error::{Result, UpkeepError};
pub use scheduler::{NagOutcome, RunCoordinator, RunOutcome, TriggerEvent};
