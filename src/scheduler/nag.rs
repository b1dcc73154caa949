//! Overdue escalation.
//!
//! Decides whether to notify the user that maintenance has not completed for
//! too long. This throttle is independent of the [`FrequencyGate`]: the gate
//! uses a short window to decide whether to *act*, the escalator a long one
//! plus its own cooldown to decide whether to *alert*.
//!
//! [`FrequencyGate`]: super::gate::FrequencyGate

use crate::actuator::{Notification, Urgency};
use crate::clock::elapsed_between;
use crate::config::NagConfig;
use crate::state::{MaintenanceState, StateDelta};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which notification was (or would be) sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NagKind {
    /// One-time introduction that automatic maintenance is active.
    FirstRun,
    /// Maintenance is overdue.
    Overdue,
}

impl std::fmt::Display for NagKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FirstRun => write!(f, "first-run notice"),
            Self::Overdue => write!(f, "overdue notice"),
        }
    }
}

/// Escalation decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NagDecision {
    None,
    ShowFirstRunNotice,
    ShowOverdueNotice { overdue_for: Duration },
}

impl NagDecision {
    pub fn kind(&self) -> Option<NagKind> {
        match self {
            Self::None => None,
            Self::ShowFirstRunNotice => Some(NagKind::FirstRun),
            Self::ShowOverdueNotice { .. } => Some(NagKind::Overdue),
        }
    }
}

/// Thresholds the escalator applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NagPolicy {
    pub enabled: bool,
    pub overdue_threshold: Duration,
    pub cooldown: Duration,
}

impl Default for NagPolicy {
    fn default() -> Self {
        Self::from(&NagConfig::default())
    }
}

impl From<&NagConfig> for NagPolicy {
    fn from(config: &NagConfig) -> Self {
        Self {
            enabled: config.enabled,
            overdue_threshold: config.overdue_threshold(),
            cooldown: config.cooldown(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NagEscalator {
    policy: NagPolicy,
}

impl NagEscalator {
    pub fn new(policy: NagPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &NagPolicy {
        &self.policy
    }

    /// Decide whether to notify at `now`. First match wins:
    ///
    /// 1. never run, introduction not shown: first-run notice
    /// 2. never run, no grace baseline: nothing
    /// 3. within the overdue threshold of the last run (or baseline): nothing
    /// 4. nagged within the cooldown: nothing
    /// 5. overdue notice
    pub fn evaluate(&self, now: DateTime<Utc>, state: &MaintenanceState) -> NagDecision {
        if !self.policy.enabled {
            return NagDecision::None;
        }

        if state.last_run_at.is_none() && !state.first_run_notice_shown {
            return NagDecision::ShowFirstRunNotice;
        }

        let Some(reference) = state.overdue_reference() else {
            return NagDecision::None;
        };

        // A wall clock behind the reference is never overdue.
        let Some(overdue_for) = elapsed_between(reference, now) else {
            return NagDecision::None;
        };
        if overdue_for <= self.policy.overdue_threshold {
            return NagDecision::None;
        }

        if let Some(last_nag) = state.last_nag_at {
            // Skewed clocks count as still cooling down.
            let cooled =
                elapsed_between(last_nag, now).is_some_and(|since| since >= self.policy.cooldown);
            if !cooled {
                return NagDecision::None;
            }
        }

        NagDecision::ShowOverdueNotice { overdue_for }
    }

    /// The notification to deliver for `decision`.
    pub fn notification(&self, decision: &NagDecision) -> Option<Notification> {
        match decision {
            NagDecision::None => None,
            NagDecision::ShowFirstRunNotice => Some(Notification {
                title: "Automatic maintenance enabled".to_owned(),
                body: format!(
                    "Updates and cleanup now run automatically while the device is idle or \
                     before it sleeps. You will be reminded if maintenance has not completed \
                     for {}.",
                    describe_duration(self.policy.overdue_threshold)
                ),
                urgency: Urgency::Low,
            }),
            NagDecision::ShowOverdueNotice { overdue_for } => {
                let urgency = if *overdue_for >= self.policy.overdue_threshold.saturating_mul(2) {
                    Urgency::Critical
                } else {
                    Urgency::Normal
                };
                Some(Notification {
                    title: "System maintenance overdue".to_owned(),
                    body: format!(
                        "Maintenance has not completed for {}. Leave the device idle for a \
                         while or run `upkeep run` to catch up.",
                        describe_duration(*overdue_for)
                    ),
                    urgency,
                })
            }
        }
    }
}

/// State changes to commit after `kind` was delivered at `at`.
pub fn delivered_delta(kind: NagKind, at: DateTime<Utc>) -> StateDelta {
    match kind {
        NagKind::FirstRun => StateDelta::first_run_notice_delivered(at),
        NagKind::Overdue => StateDelta::overdue_notice_delivered(at),
    }
}

/// Coarse human description in the largest whole unit: days, hours or
/// minutes.
pub fn describe_duration(d: Duration) -> String {
    match d.as_secs() {
        secs if secs >= 86_400 => count_of(secs / 86_400, "day"),
        secs if secs >= 3_600 => count_of(secs / 3_600, "hour"),
        secs if secs >= 60 => count_of(secs / 60, "minute"),
        _ => "less than a minute".to_owned(),
    }
}

fn count_of(n: u64, unit: &str) -> String {
    if n == 1 {
        format!("1 {unit}")
    } else {
        format!("{n} {unit}s")
    }
}
