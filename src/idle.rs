//! Idle detection.
//!
//! The core only asks an [`IdleProbe`] "is the session idle, and since when".
//! [`CommandIdleProbe`] answers by running an external tool, either one that
//! prints milliseconds since the last input (`xprintidle`) or `loginctl`'s
//! `IdleHint`/`IdleSinceHintMonotonic` properties.

use crate::clock::{MonotonicTime, TimeSource};
use crate::config::{IdleConfig, IdleOutputFormat};
use crate::error::{Result, UpkeepError};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Longest an idle probe command may take.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// One reading of the session's idle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleReading {
    pub is_idle: bool,
    /// When the current idle period began, on the monotonic clock.
    pub idle_since: Option<MonotonicTime>,
}

impl IdleReading {
    /// The session is in use.
    pub const fn active() -> Self {
        Self {
            is_idle: false,
            idle_since: None,
        }
    }

    /// The session has been idle since `since`.
    pub const fn idle_since(since: MonotonicTime) -> Self {
        Self {
            is_idle: true,
            idle_since: Some(since),
        }
    }

    /// How long the session has been idle at `now`.
    ///
    /// `None` when not idle, when the start is unknown, or when the start lies
    /// after `now`.
    pub fn idle_for(&self, now: MonotonicTime) -> Option<Duration> {
        if !self.is_idle {
            return None;
        }
        now.checked_duration_since(self.idle_since?)
    }
}

/// Answers whether the user session is idle.
#[async_trait]
pub trait IdleProbe: Send + Sync {
    async fn read(&self) -> Result<IdleReading>;
}

/// Probe backed by an external command.
pub struct CommandIdleProbe {
    argv: Vec<String>,
    format: IdleOutputFormat,
    idle_after: Duration,
    clock: Arc<dyn TimeSource>,
}

impl CommandIdleProbe {
    pub fn new(config: &IdleConfig, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            argv: config.command.clone(),
            format: config.format,
            idle_after: Duration::from_secs(config.idle_after_secs),
            clock,
        }
    }
}

#[async_trait]
impl IdleProbe for CommandIdleProbe {
    async fn read(&self) -> Result<IdleReading> {
        let Some((program, args)) = self.argv.split_first() else {
            return Ok(IdleReading::active());
        };

        let output = tokio::time::timeout(
            PROBE_TIMEOUT,
            tokio::process::Command::new(program)
                .args(args)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| UpkeepError::Probe(format!("{program} timed out")))?
        .map_err(|e| UpkeepError::Probe(format!("cannot run {program}: {e}")))?;

        if !output.status.success() {
            return Err(UpkeepError::Probe(format!(
                "{program} exited with {}",
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let now = self.clock.now().monotonic;
        match self.format {
            IdleOutputFormat::Milliseconds => parse_idle_millis(&stdout, now, self.idle_after),
            IdleOutputFormat::Logind => parse_logind(&stdout),
        }
    }
}

/// Interpret a millisecond idle counter sampled at `now`.
pub fn parse_idle_millis(
    output: &str,
    now: MonotonicTime,
    idle_after: Duration,
) -> Result<IdleReading> {
    let millis: u64 = output
        .trim()
        .parse()
        .map_err(|e| {
            UpkeepError::Probe(format!("unexpected idle output {:?}: {e}", output.trim()))
        })?;
    let idle_for = Duration::from_millis(millis);
    if idle_for < idle_after {
        return Ok(IdleReading::active());
    }
    Ok(IdleReading::idle_since(now.saturating_sub(idle_for)))
}

/// Interpret `IdleHint=` / `IdleSinceHintMonotonic=` property lines.
///
/// The monotonic hint is in microseconds on `CLOCK_MONOTONIC`.
pub fn parse_logind(output: &str) -> Result<IdleReading> {
    let mut hint = None;
    let mut since_us = None;
    for line in output.lines() {
        match line.trim().split_once('=') {
            Some(("IdleHint", value)) => hint = Some(value.trim() == "yes"),
            Some(("IdleSinceHintMonotonic", value)) => since_us = value.trim().parse::<u64>().ok(),
            _ => {}
        }
    }

    let is_idle =
        hint.ok_or_else(|| UpkeepError::Probe("IdleHint missing from output".to_owned()))?;
    if !is_idle {
        return Ok(IdleReading::active());
    }
    Ok(IdleReading {
        is_idle: true,
        idle_since: since_us
            .filter(|us| *us > 0)
            .map(|us| MonotonicTime::from_duration(Duration::from_micros(us))),
    })
}

/// Probe returning a preset reading, or failing when none is set.
#[derive(Debug, Default)]
pub struct FixedIdleProbe {
    reading: Mutex<Option<IdleReading>>,
}

impl FixedIdleProbe {
    pub fn new(reading: IdleReading) -> Self {
        Self {
            reading: Mutex::new(Some(reading)),
        }
    }

    /// A probe whose every read fails.
    pub fn failing() -> Self {
        Self::default()
    }

    pub fn set(&self, reading: Option<IdleReading>) {
        *self.reading.lock().unwrap_or_else(|e| e.into_inner()) = reading;
    }
}

#[async_trait]
impl IdleProbe for FixedIdleProbe {
    async fn read(&self) -> Result<IdleReading> {
        self.reading
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .ok_or_else(|| UpkeepError::Probe("idle state unavailable".to_owned()))
    }
}
