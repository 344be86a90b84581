//! ==============================================================================
//! status.rs - Run Status Store
//! ==============================================================================
//!
//! purpose:
//!     keeps the singleton "is the sampling loop alive" record. the file
//!     backed variant survives process restarts, so a crash that leaves
//!     `running=true` behind is detected by heartbeat age instead of
//!     blocking the next start forever.
//!
//! notes:
//!     - heartbeats carry the writer's owner token. once a newer loop
//!       instance owns the record, heartbeats from the old one are refused
//!       and it is expected to wind down.
//!     - a missing or unreadable file reads as stopped. the next write
//!       heals it.
//!
//! ==============================================================================

use crate::domain::{epoch_secs, RunStatus};
use crate::error::AppResult;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait StatusStore: Send + Sync {
    /// Current status. Absence of any record reads as stopped.
    fn get(&self) -> AppResult<RunStatus>;

    fn set(&self, status: &RunStatus) -> AppResult<()>;

    /// Refresh the heartbeat if `token` still owns the record. Returns
    /// false when ownership has moved on.
    fn heartbeat(&self, token: &str) -> AppResult<bool>;
}

// ------------------------------------------------------------------
// file backed
// ------------------------------------------------------------------

pub struct FileStatusStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStatusStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn read(&self) -> RunStatus {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!(
                        file = %self.path.display(),
                        "Unreadable status file ({}), treating as stopped", e
                    );
                    RunStatus::stopped()
                }
            },
            Err(_) => RunStatus::stopped(),
        }
    }

    fn write(&self, status: &RunStatus) -> AppResult<()> {
        let json = serde_json::to_string_pretty(status)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

impl StatusStore for FileStatusStore {
    fn get(&self) -> AppResult<RunStatus> {
        let _guard = self.lock.lock().unwrap();
        Ok(self.read())
    }

    fn set(&self, status: &RunStatus) -> AppResult<()> {
        let _guard = self.lock.lock().unwrap();
        self.write(status)
    }

    fn heartbeat(&self, token: &str) -> AppResult<bool> {
        let _guard = self.lock.lock().unwrap();
        let mut status = self.read();
        if !status.running || status.owner_token != token {
            return Ok(false);
        }
        status.last_heartbeat = epoch_secs();
        self.write(&status)?;
        Ok(true)
    }
}

// ------------------------------------------------------------------
// in memory (tests, and useful as a null store)
// ------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStatusStore {
    state: Mutex<Option<RunStatus>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatusStore for MemoryStatusStore {
    fn get(&self) -> AppResult<RunStatus> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(RunStatus::stopped))
    }

    fn set(&self, status: &RunStatus) -> AppResult<()> {
        *self.state.lock().unwrap() = Some(status.clone());
        Ok(())
    }

    fn heartbeat(&self, token: &str) -> AppResult<bool> {
        let mut state = self.state.lock().unwrap();
        match state.as_mut() {
            Some(status) if status.running && status.owner_token == token => {
                status.last_heartbeat = epoch_secs();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
