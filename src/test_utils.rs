//! Shared test utilities used across multiple test modules.
//!
//! Consolidates the scripted actuator that `scheduler::coordinator::tests`
//! and `scheduler::daemon::tests` both drive.

use crate::actuator::{Actuator, Notification};
use crate::error::{Result, UpkeepError};
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Actuator that records calls and can be told to fail or dawdle.
#[derive(Debug, Default)]
pub struct ScriptedActuator {
    runs: AtomicUsize,
    fail_runs: AtomicBool,
    fail_notifications: AtomicBool,
    ignore_cancel: AtomicBool,
    run_delay: Mutex<Option<Duration>>,
    notifications: Mutex<Vec<Notification>>,
}

impl ScriptedActuator {
    /// An actuator whose runs take `delay` unless cancelled.
    pub fn slow(delay: Duration) -> Self {
        let actuator = Self::default();
        *actuator.run_delay.lock().expect("run delay") = Some(delay);
        actuator
    }

    /// Like [`ScriptedActuator::slow`], but the run ignores cancellation.
    pub fn stubborn(delay: Duration) -> Self {
        let actuator = Self::slow(delay);
        actuator.ignore_cancel.store(true, Ordering::SeqCst);
        actuator
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().expect("notifications").clone()
    }

    pub fn fail_runs(&self, fail: bool) {
        self.fail_runs.store(fail, Ordering::SeqCst);
    }

    pub fn fail_notifications(&self, fail: bool) {
        self.fail_notifications.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Actuator for ScriptedActuator {
    async fn run_maintenance(&self, cancel: CancellationToken) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let delay = *self.run_delay.lock().expect("run delay");
        if let Some(delay) = delay {
            if self.ignore_cancel.load(Ordering::SeqCst) {
                tokio::time::sleep(delay).await;
            } else {
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = cancel.cancelled() => return Err(UpkeepError::Cancelled),
                }
            }
        }
        if self.fail_runs.load(Ordering::SeqCst) {
            return Err(UpkeepError::Actuator("package manager locked".to_owned()));
        }
        Ok(())
    }

    async fn send_notification(&self, notification: &Notification) -> Result<()> {
        if self.fail_notifications.load(Ordering::SeqCst) {
            return Err(UpkeepError::Actuator("no session bus".to_owned()));
        }
        self.notifications
            .lock()
            .expect("notifications")
            .push(notification.clone());
        Ok(())
    }
}
