//! JSON-file backed state store.
//!
//! The record lives at `state_dir()/state.json`. Commits run under an
//! in-process mutex plus an exclusive `state.json.lock` file, and replace the
//! record via write-to-temp then rename, so a failed write never corrupts
//! the previously committed state.

use super::{MaintenanceState, StateDelta, StateStore};
use crate::error::{Result, UpkeepError};
use crate::scheduler::authority::acquire_lock_file;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Longest a commit waits for another process's commit to finish.
const COMMIT_LOCK_TIMEOUT: Duration = Duration::from_millis(1500);

/// Commits take milliseconds; a lock file older than this is abandoned.
const COMMIT_LOCK_STALE_AFTER: Duration = Duration::from_secs(30);

fn default_state_version() -> u8 {
    1
}

/// On-disk layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedState {
    #[serde(default = "default_state_version")]
    version: u8,
    #[serde(flatten)]
    state: MaintenanceState,
}

/// State store persisting the record as pretty-printed JSON.
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    commit_guard: Mutex<()>,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            commit_guard: Mutex::new(()),
        }
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn read(&self) -> Result<MaintenanceState> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(MaintenanceState::default());
            }
            Err(e) => {
                return Err(UpkeepError::Store(format!(
                    "cannot read {}: {e}",
                    self.path.display()
                )));
            }
        };

        let persisted: PersistedState = serde_json::from_slice(&bytes).map_err(|e| {
            UpkeepError::Store(format!("cannot parse {}: {e}", self.path.display()))
        })?;
        Ok(persisted.state)
    }

    fn write(&self, state: &MaintenanceState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                UpkeepError::Store(format!("cannot create state dir {}: {e}", parent.display()))
            })?;
        }

        let persisted = PersistedState {
            version: default_state_version(),
            state: state.clone(),
        };
        let json = serde_json::to_string_pretty(&persisted)
            .map_err(|e| UpkeepError::Store(format!("cannot serialize state: {e}")))?;

        let tmp_path = self.tmp_path();
        let mut file = std::fs::File::create(&tmp_path)
            .map_err(|e| UpkeepError::Store(format!("cannot write state temp file: {e}")))?;
        file.write_all(json.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| UpkeepError::Store(format!("cannot write state temp file: {e}")))?;
        drop(file);

        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp_path);
            UpkeepError::Store(format!("cannot finalize {}: {e}", self.path.display()))
        })?;
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn get(&self) -> Result<MaintenanceState> {
        self.read()
    }

    fn commit(&self, delta: &StateDelta) -> Result<MaintenanceState> {
        let _local = self.commit_guard.lock().unwrap_or_else(|e| e.into_inner());
        let _file =
            acquire_lock_file(&self.lock_path(), COMMIT_LOCK_TIMEOUT, COMMIT_LOCK_STALE_AFTER)
                .map_err(|e| UpkeepError::Store(format!("cannot lock state for commit: {e}")))?;

        let current = self.read()?;
        let next = delta.apply(&current);
        if next != current {
            self.write(&next)?;
            debug!(path = %self.path.display(), "state committed");
        }
        Ok(next)
    }
}
