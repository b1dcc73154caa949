//! Maintenance scheduling.
//!
//! Trigger sources (timer, pre-suspend hook, idle polls, operator) all funnel
//! into [`RunCoordinator::handle_trigger`]. The [`FrequencyGate`] alone decides
//! due-ness; the [`NagEscalator`] independently decides when to tell the user
//! that maintenance is overdue.

pub mod authority;
pub mod coordinator;
pub mod daemon;
pub mod gate;
pub mod nag;
pub mod trigger;

pub use authority::{NamedLock, NamedLockGuard};
pub use coordinator::{NagOutcome, RunCoordinator, RunOutcome, StatusReport};
pub use daemon::Daemon;
pub use gate::FrequencyGate;
pub use nag::{NagDecision, NagEscalator, NagKind, NagPolicy};
pub use trigger::{Decision, SkipReason, TriggerEvaluator, TriggerEvent, TriggerPolicy};
