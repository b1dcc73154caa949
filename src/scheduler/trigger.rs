//! Trigger evaluation.
//!
//! Every trigger source converges on [`TriggerEvaluator::evaluate`]. Due-ness
//! is decided once by the [`FrequencyGate`]; the event tag only selects the
//! blocking/urgency policy.
//!
//! | Event | Due | Decision |
//! |-------|-----|----------|
//! | any | no | `Skip(NotDue)` |
//! | `Manual`, `Scheduled` | yes | `RunBlocking`, no deadline |
//! | `PreSuspend` | yes | `RunBlocking` with the pre-suspend deadline |
//! | `IdlePoll` | yes | `RunBestEffort` if idle ≥ threshold, else `Skip` |

use super::gate::FrequencyGate;
use crate::clock::Now;
use crate::config::ScheduleConfig;
use crate::idle::IdleReading;
use crate::state::MaintenanceState;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The external event that asked for an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerEvent {
    /// The daily timer fired.
    Scheduled,
    /// The system is about to sleep.
    PreSuspend,
    /// Periodic idle check.
    IdlePoll,
    /// Operator asked for a run.
    Manual,
}

impl TriggerEvent {
    pub const ALL: [Self; 4] = [Self::Scheduled, Self::PreSuspend, Self::IdlePoll, Self::Manual];

    /// Only idle polls consult the idle probe.
    pub fn needs_idle_reading(self) -> bool {
        self == Self::IdlePoll
    }

    /// Whether a contended maintenance lock is waited for rather than
    /// treated as already handled. The sleep manager needs an answer.
    pub fn waits_for_lock(self) -> bool {
        self == Self::PreSuspend
    }
}

impl std::fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::PreSuspend => write!(f, "pre-suspend"),
            Self::IdlePoll => write!(f, "idle-poll"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for TriggerEvent {
    type Err = crate::error::UpkeepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|event| event.to_string() == s)
            .ok_or_else(|| {
                crate::error::UpkeepError::Config(format!("unknown trigger event {s:?}"))
            })
    }
}

/// Why a trigger did not run maintenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Maintenance already ran within the minimum interval.
    NotDue,
    /// The session is in use, or its idle state is unknown.
    NotIdle,
    /// The session is idle but not for long enough.
    IdleTooShort,
    /// Another trigger holds the maintenance lock.
    Busy,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotDue => write!(f, "not due"),
            Self::NotIdle => write!(f, "session not idle"),
            Self::IdleTooShort => write!(f, "idle below threshold"),
            Self::Busy => write!(f, "another run in progress"),
        }
    }
}

/// What to do about a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Skip(SkipReason),
    /// Run, holding the device available. A deadline bounds how long the
    /// caller may be kept waiting.
    RunBlocking { deadline: Option<Duration> },
    /// Run opportunistically.
    RunBestEffort,
}

impl Decision {
    pub fn deadline(&self) -> Option<Duration> {
        match self {
            Self::RunBlocking { deadline } => *deadline,
            _ => None,
        }
    }
}

/// Thresholds the evaluator applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerPolicy {
    pub min_interval: Duration,
    pub idle_threshold: Duration,
    pub pre_suspend_deadline: Duration,
}

impl Default for TriggerPolicy {
    fn default() -> Self {
        Self::from(&ScheduleConfig::default())
    }
}

impl From<&ScheduleConfig> for TriggerPolicy {
    fn from(config: &ScheduleConfig) -> Self {
        Self {
            min_interval: config.min_interval(),
            idle_threshold: config.idle_threshold(),
            pre_suspend_deadline: config.pre_suspend_deadline(),
        }
    }
}

/// Pure decision table mapping a trigger to a [`Decision`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerEvaluator {
    policy: TriggerPolicy,
}

impl TriggerEvaluator {
    pub fn new(policy: TriggerPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &TriggerPolicy {
        &self.policy
    }

    /// Decide what `event` should do. `idle` is only consulted for idle
    /// polls; a missing reading counts as not idle.
    pub fn evaluate(
        &self,
        event: TriggerEvent,
        now: Now,
        state: &MaintenanceState,
        idle: Option<&IdleReading>,
    ) -> Decision {
        if !FrequencyGate::is_due(now.wall, state.last_run_at, self.policy.min_interval) {
            return Decision::Skip(SkipReason::NotDue);
        }

        match event {
            TriggerEvent::Manual | TriggerEvent::Scheduled => {
                Decision::RunBlocking { deadline: None }
            }
            TriggerEvent::PreSuspend => Decision::RunBlocking {
                deadline: Some(self.policy.pre_suspend_deadline),
            },
            TriggerEvent::IdlePoll => match idle {
                Some(reading) if reading.is_idle => match reading.idle_for(now.monotonic) {
                    Some(idle_for) if idle_for >= self.policy.idle_threshold => {
                        Decision::RunBestEffort
                    }
                    _ => Decision::Skip(SkipReason::IdleTooShort),
                },
                _ => Decision::Skip(SkipReason::NotIdle),
            },
        }
    }
}
