//! In-memory state store.
//!
//! Used for dry runs and tests. Reads and commits can be made to fail so the
//! coordinator's store-failure handling can be exercised.

use super::{MaintenanceState, StateDelta, StateStore};
use crate::error::{Result, UpkeepError};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<MaintenanceState>,
    fail_reads: AtomicBool,
    fail_commits: AtomicBool,
    commits: AtomicUsize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: MaintenanceState) -> Self {
        Self {
            state: Mutex::new(state),
            ..Self::default()
        }
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Number of successful commits so far.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MaintenanceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self) -> Result<MaintenanceState> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(UpkeepError::Store("injected read failure".to_owned()));
        }
        Ok(self.lock().clone())
    }

    fn commit(&self, delta: &StateDelta) -> Result<MaintenanceState> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(UpkeepError::Store("injected commit failure".to_owned()));
        }
        let mut state = self.lock();
        *state = delta.apply(&state);
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(state.clone())
    }
}
