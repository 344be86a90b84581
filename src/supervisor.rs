//! ==============================================================================
//! supervisor.rs - Loop Lifecycle
//! ==============================================================================
//!
//! purpose:
//!     owns starting and stopping the sampling loop. start is idempotent
//!     against a live loop, confirms the first heartbeat before reporting
//!     success, and takes over from records whose heartbeat went stale.
//!     stop asks nicely first and aborts the task when the bounded wait
//!     runs out.
//!
//! notes:
//!     - every started instance gets a fresh owner token; heartbeats from
//!       superseded instances bounce off the status store.
//!     - a "running" record whose task does not exist in this process is a
//!       leftover of a dead process and never blocks a start.
//!
//! ==============================================================================

use crate::calibration::CalibrationStore;
use crate::config::HostConfig;
use crate::domain::{epoch_secs, RunStatus};
use crate::error::{AppError, AppResult};
use crate::looper::SamplingLoop;
use crate::relay::RelayCoordinator;
use crate::sensors::SensorService;
use crate::status::StatusStore;
use crate::store::Store;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// the loop ignored the stop signal and its task was aborted
    Forced,
    WasNotRunning,
}

struct LoopHandle {
    token: String,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct Supervisor {
    sensors: Arc<SensorService>,
    calibration: Arc<CalibrationStore>,
    coordinator: Arc<RelayCoordinator>,
    store: Arc<Store>,
    status: Arc<dyn StatusStore>,
    interval: Duration,
    startup_timeout: Duration,
    stop_timeout: Duration,
    liveness_timeout_secs: u64,
    slot: Mutex<Option<LoopHandle>>,
}

impl Supervisor {
    pub fn new(
        cfg: &HostConfig,
        sensors: Arc<SensorService>,
        calibration: Arc<CalibrationStore>,
        coordinator: Arc<RelayCoordinator>,
        store: Arc<Store>,
        status: Arc<dyn StatusStore>,
    ) -> Self {
        Self {
            sensors,
            calibration,
            coordinator,
            store,
            status,
            interval: Duration::from_secs(cfg.sampling.interval_secs),
            startup_timeout: Duration::from_secs(cfg.supervisor.startup_timeout_secs),
            stop_timeout: Duration::from_secs(cfg.supervisor.stop_timeout_secs),
            liveness_timeout_secs: cfg.supervisor.liveness_timeout_secs,
            slot: Mutex::new(None),
        }
    }

    /// Current status record plus the derived liveness verdict.
    pub fn liveness(&self) -> AppResult<(RunStatus, bool)> {
        let status = self.status.get()?;
        let live = status.is_live(epoch_secs(), self.liveness_timeout_secs);
        Ok((status, live))
    }

    /// Start the sampling loop. Returns AlreadyRunning when a live loop
    /// exists; succeeds only after the new loop's first heartbeat landed.
    pub async fn start(&self) -> AppResult<StartOutcome> {
        let mut slot = self.slot.lock().await;

        if let Some(handle) = slot.as_ref() {
            if handle.task.is_finished() {
                tracing::debug!(token = %handle.token, "Previous loop task already finished");
                *slot = None;
            }
        }

        let status = self.status.get()?;
        if slot.is_some() && status.is_live(epoch_secs(), self.liveness_timeout_secs) {
            tracing::info!("Start requested but the loop is already live");
            return Ok(StartOutcome::AlreadyRunning);
        }

        if let Some(handle) = slot.take() {
            // task still around but its record went stale: wind it down first
            tracing::warn!(token = %handle.token, "Replacing a loop with a stale heartbeat");
            self.wind_down(handle).await;
        }

        let token = new_owner_token();
        self.status.set(&RunStatus {
            running: true,
            last_heartbeat: 0,
            owner_token: token.clone(),
        })?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let looper = SamplingLoop::new(
            Arc::clone(&self.sensors),
            Arc::clone(&self.calibration),
            Arc::clone(&self.coordinator),
            Arc::clone(&self.store),
            Arc::clone(&self.status),
            self.interval,
            token.clone(),
            stop_rx,
        );
        let task = tokio::spawn(looper.run());

        // started means heartbeating, not merely spawned
        let deadline = Instant::now() + self.startup_timeout;
        loop {
            let current = self.status.get()?;
            if current.owner_token == token && current.last_heartbeat > 0 {
                break;
            }
            if Instant::now() >= deadline {
                tracing::error!("Loop never produced its first heartbeat, rolling back");
                task.abort();
                self.status.set(&RunStatus::stopped())?;
                return Err(AppError::SupervisorTimeout("startup"));
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        tracing::info!(token = %token, "Sampling loop confirmed running");
        *slot = Some(LoopHandle {
            token,
            stop_tx,
            task,
        });
        Ok(StartOutcome::Started)
    }

    /// Stop the loop and clear the status record. Safe to call when
    /// nothing runs; that also clears leftovers of a dead process.
    pub async fn stop(&self) -> AppResult<StopOutcome> {
        let mut slot = self.slot.lock().await;
        match slot.take() {
            None => {
                self.status.set(&RunStatus::stopped())?;
                Ok(StopOutcome::WasNotRunning)
            }
            Some(handle) => {
                let token = handle.token.clone();
                let forced = self.wind_down(handle).await;
                self.status.set(&RunStatus::stopped())?;
                tracing::info!(token = %token, forced, "Sampling loop stopped");
                Ok(if forced {
                    StopOutcome::Forced
                } else {
                    StopOutcome::Stopped
                })
            }
        }
    }

    /// Signal, wait out the grace period, then abort. Returns whether the
    /// abort hammer was needed.
    async fn wind_down(&self, mut handle: LoopHandle) -> bool {
        let _ = handle.stop_tx.send(true);
        match tokio::time::timeout(self.stop_timeout, &mut handle.task).await {
            Ok(_) => false,
            Err(_) => {
                tracing::warn!("Sampling loop ignored the stop signal, aborting its task");
                handle.task.abort();
                true
            }
        }
    }
}

static TOKEN_SEQ: AtomicU64 = AtomicU64::new(0);

/// Process-unique owner token for one loop instance.
fn new_owner_token() -> String {
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let seq = TOKEN_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("loop-{millis}-{seq}")
}
