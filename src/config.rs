//! Configuration types for the maintenance scheduler.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level scheduler configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpkeepConfig {
    /// When maintenance is due and how triggers are bounded.
    pub schedule: ScheduleConfig,
    /// Overdue escalation settings.
    pub nag: NagConfig,
    /// Daemon loop cadences.
    pub daemon: DaemonConfig,
    /// Named lock settings.
    pub lock: LockConfig,
    /// Commands backing the maintenance and notification actions.
    pub actuator: ActuatorConfig,
    /// How idle state is probed.
    pub idle: IdleConfig,
}

/// Maintenance cadence settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Minimum spacing between successful runs, in seconds.
    pub min_interval_secs: u64,
    /// How long the session must have been idle before an idle poll may run
    /// maintenance, in seconds.
    pub idle_threshold_secs: u64,
    /// Upper bound on how long a pre-suspend run may delay sleep, in seconds.
    pub pre_suspend_deadline_secs: u64,
    /// Optional daily timer, `"HH:MM"` in UTC, firing a scheduled trigger.
    pub daily_at: Option<String>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: 24 * 3600,
            idle_threshold_secs: 3600,
            pre_suspend_deadline_secs: 900,
            daily_at: None,
        }
    }
}

impl ScheduleConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }

    pub fn pre_suspend_deadline(&self) -> Duration {
        Duration::from_secs(self.pre_suspend_deadline_secs)
    }

    /// Parse [`daily_at`](Self::daily_at) into `(hour, minute)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a valid `HH:MM` time.
    pub fn daily_time(&self) -> crate::error::Result<Option<(u8, u8)>> {
        let Some(raw) = self.daily_at.as_deref() else {
            return Ok(None);
        };
        parse_hh_mm(raw)
            .map(Some)
            .ok_or_else(|| {
                crate::error::UpkeepError::Config(format!(
                    "invalid daily_at {raw:?}, expected HH:MM"
                ))
            })
    }
}

fn parse_hh_mm(raw: &str) -> Option<(u8, u8)> {
    let (hour, min) = raw.trim().split_once(':')?;
    let hour: u8 = hour.parse().ok()?;
    let min: u8 = min.parse().ok()?;
    (hour < 24 && min < 60).then_some((hour, min))
}

/// Overdue escalation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NagConfig {
    /// Whether overdue and first-run notifications are sent at all.
    pub enabled: bool,
    /// How long maintenance may go without a successful run before the user
    /// is notified, in seconds.
    pub overdue_threshold_secs: u64,
    /// Minimum spacing between overdue notifications, in seconds.
    pub cooldown_secs: u64,
}

impl Default for NagConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            overdue_threshold_secs: 7 * 24 * 3600,
            cooldown_secs: 7 * 24 * 3600,
        }
    }
}

impl NagConfig {
    pub fn overdue_threshold(&self) -> Duration {
        Duration::from_secs(self.overdue_threshold_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Daemon loop cadences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Seconds between idle polls.
    pub idle_poll_interval_secs: u64,
    /// Seconds between nag checks after the initial one at startup.
    pub nag_check_interval_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            idle_poll_interval_secs: 300,
            nag_check_interval_secs: 3600,
        }
    }
}

/// Named lock settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// A lock file older than this is considered abandoned even if its
    /// owner still appears alive, in seconds.
    pub stale_after_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 24 * 3600,
        }
    }
}

impl LockConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

/// Commands backing the actuator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    /// Program and arguments performing maintenance. Exit status 0 is success.
    pub maintenance_command: Vec<String>,
    /// Program and leading arguments for notifications; title and body are
    /// appended.
    pub notify_command: Vec<String>,
    /// Append `--urgency=<level>` before the title.
    pub notify_urgency_flag: bool,
    /// Longest a notification command may run, in seconds.
    pub notify_timeout_secs: u64,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            maintenance_command: Vec::new(),
            notify_command: vec!["notify-send".to_owned(), "--app-name=upkeep".to_owned()],
            notify_urgency_flag: true,
            notify_timeout_secs: 30,
        }
    }
}

/// Output format of the idle probe command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleOutputFormat {
    /// A single integer: milliseconds since the last input (`xprintidle`).
    #[default]
    Milliseconds,
    /// `loginctl show-session -p IdleHint -p IdleSinceHintMonotonic` output.
    Logind,
}

/// Idle probe settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleConfig {
    /// Program and arguments reporting idle state. Empty means the session
    /// is never considered idle.
    pub command: Vec<String>,
    /// How to interpret the command output.
    pub format: IdleOutputFormat,
    /// For millisecond output: inactivity after which the session counts as
    /// idle, in seconds.
    pub idle_after_secs: u64,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            format: IdleOutputFormat::Milliseconds,
            idle_after_secs: 60,
        }
    }
}

impl UpkeepConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| crate::error::UpkeepError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read, parsed or validated.
    pub fn load_or_default(path: &std::path::Path) -> crate::error::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::UpkeepError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the scheduler cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`UpkeepError::Config`](crate::error::UpkeepError::Config)
    /// naming the offending field.
    pub fn validate(&self) -> crate::error::Result<()> {
        let non_zero = [
            ("schedule.min_interval_secs", self.schedule.min_interval_secs),
            ("schedule.pre_suspend_deadline_secs", self.schedule.pre_suspend_deadline_secs),
            ("nag.overdue_threshold_secs", self.nag.overdue_threshold_secs),
            ("daemon.idle_poll_interval_secs", self.daemon.idle_poll_interval_secs),
            ("daemon.nag_check_interval_secs", self.daemon.nag_check_interval_secs),
            ("lock.stale_after_secs", self.lock.stale_after_secs),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(crate::error::UpkeepError::Config(format!(
                    "{field} must be greater than zero"
                )));
            }
        }
        self.schedule.daily_time()?;
        Ok(())
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> PathBuf {
        crate::upkeep_dirs::config_file()
    }
}
