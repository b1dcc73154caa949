//! Side-effecting collaborators.
//!
//! The scheduler treats "perform maintenance" and "show a notification" as
//! opaque actions with a success/failure outcome. [`CommandActuator`] backs
//! both with configured external commands.

use crate::config::ActuatorConfig;
use crate::error::{Result, UpkeepError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Notification urgency, mirroring desktop notification levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Normal,
    Critical,
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// A user-facing notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub urgency: Urgency,
}

/// Performs maintenance and delivers notifications.
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Run the maintenance job to completion.
    ///
    /// Implementations that can stop early should do so when `cancel` fires
    /// and return [`UpkeepError::Cancelled`] once the job has stopped. The
    /// caller keeps the maintenance lock until this returns.
    async fn run_maintenance(&self, cancel: CancellationToken) -> Result<()>;

    /// Deliver `notification` to the user session.
    async fn send_notification(&self, notification: &Notification) -> Result<()>;
}

/// Actuator running external commands.
#[derive(Debug, Clone)]
pub struct CommandActuator {
    config: ActuatorConfig,
}

impl CommandActuator {
    pub fn new(config: ActuatorConfig) -> Self {
        Self { config }
    }

    fn notify_args(&self, notification: &Notification) -> Vec<String> {
        let mut args: Vec<String> = self.config.notify_command.iter().skip(1).cloned().collect();
        if self.config.notify_urgency_flag {
            args.push(format!("--urgency={}", notification.urgency));
        }
        args.push(notification.title.clone());
        args.push(notification.body.clone());
        args
    }
}

#[async_trait]
impl Actuator for CommandActuator {
    async fn run_maintenance(&self, cancel: CancellationToken) -> Result<()> {
        let Some((program, args)) = self.config.maintenance_command.split_first() else {
            return Err(UpkeepError::Actuator(
                "no maintenance command configured".to_owned(),
            ));
        };

        info!(program = %program, "starting maintenance command");
        let mut child = tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| UpkeepError::Actuator(format!("cannot start {program}: {e}")))?;

        let finished = tokio::select! {
            status = child.wait() => Some(status),
            () = cancel.cancelled() => None,
        };

        let Some(status) = finished else {
            warn!(program = %program, "maintenance cancelled, stopping command");
            if let Err(e) = child.start_kill() {
                warn!("cannot signal maintenance command: {e}");
            }
            let _ = child.wait().await;
            return Err(UpkeepError::Cancelled);
        };
        let status = status
            .map_err(|e| UpkeepError::Actuator(format!("cannot wait for {program}: {e}")))?;

        if status.success() {
            info!(program = %program, "maintenance command finished");
            Ok(())
        } else {
            Err(UpkeepError::Actuator(format!("{program} exited with {status}")))
        }
    }

    async fn send_notification(&self, notification: &Notification) -> Result<()> {
        let Some(program) = self.config.notify_command.first() else {
            return Err(UpkeepError::Actuator(
                "no notify command configured".to_owned(),
            ));
        };

        debug!(
            title = %notification.title,
            urgency = %notification.urgency,
            "sending notification"
        );
        let timeout = Duration::from_secs(self.config.notify_timeout_secs.max(1));
        let output = tokio::time::timeout(
            timeout,
            tokio::process::Command::new(program)
                .args(self.notify_args(notification))
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| UpkeepError::Actuator(format!("{program} timed out")))?
        .map_err(|e| UpkeepError::Actuator(format!("cannot run {program}: {e}")))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(UpkeepError::Actuator(format!(
                "{program} exited with {}: {}",
                output.status,
                stderr.trim()
            )))
        }
    }
}
