//! Unified application error type.
//! Every module (store, drivers, coordinator, supervisor, web) returns
//! AppError to keep error handling consistent across the host.

use crate::domain::{RelayId, SensorChannel};
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    // ---------------------------
    // Sensor / driver failures
    // ---------------------------
    #[error("sensor read failed on {channel}: {reason}")]
    SensorRead {
        channel: SensorChannel,
        reason: String,
    },

    #[error("sensor read timed out on {0}")]
    SensorTimeout(SensorChannel),

    #[error("relay {relay} actuation failed: {reason}")]
    DriverActuation { relay: RelayId, reason: String },

    // ---------------------------
    // Calibration
    // ---------------------------
    #[error("soil channel is not calibrated (capture dry and wet references first)")]
    Uncalibrated,

    #[error("calibration rejected: {0}")]
    CalibrationRejected(String),

    // ---------------------------
    // Persistence
    // ---------------------------
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    // ---------------------------
    // Supervisor
    // ---------------------------
    #[error("supervisor timed out waiting for loop {0}")]
    SupervisorTimeout(&'static str),

    // ---------------------------
    // Control-surface input
    // ---------------------------
    #[error("invalid deletion request: {0}")]
    InvalidDeletion(String),

    #[error("unknown relay: {0}")]
    UnknownRelay(String),

    #[error("unknown sensor channel: {0}")]
    UnknownChannel(String),

    // ---------------------------
    // Config / IO
    // ---------------------------
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type AppResult<T> = Result<T, AppError>;
