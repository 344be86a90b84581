//! ==============================================================================
//! calibration.rs - Soil Probe Calibration
//! ==============================================================================
//!
//! purpose:
//!     maps raw ADS1115 counts from the soil probe onto a 0-100 moisture
//!     percent using two captured reference points (probe in dry air, probe
//!     in water). reference points survive restarts in a small JSON file.
//!
//! notes:
//!     - orientation agnostic: capacitive probes read HIGH when dry and LOW
//!       when wet, resistive ones the other way round. the linear map works
//!       for either as long as the two points differ.
//!     - an incomplete pair is an explicit error, never a silent guess.
//!
//! ==============================================================================

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Which reference point a capture targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationStep {
    Dry,
    Wet,
}

/// The persisted reference pair. Either side may still be unset.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CalibrationData {
    pub dry: Option<f64>,
    pub wet: Option<f64>,
}

impl CalibrationData {
    pub fn is_complete(&self) -> bool {
        self.dry.is_some() && self.wet.is_some()
    }

    /// Linear map of a raw reading onto 0-100, clamped at both ends.
    pub fn to_percent(&self, raw: f64) -> AppResult<f64> {
        let (dry, wet) = match (self.dry, self.wet) {
            (Some(d), Some(w)) => (d, w),
            _ => return Err(AppError::Uncalibrated),
        };
        let span = wet - dry;
        if span.abs() < f64::EPSILON {
            return Err(AppError::CalibrationRejected(
                "dry and wet reference points coincide".to_string(),
            ));
        }
        let percent = (raw - dry) / span * 100.0;
        Ok(percent.clamp(0.0, 100.0))
    }
}

/// Owns the reference pair and its backing file.
pub struct CalibrationStore {
    path: PathBuf,
    min_spread: f64,
    data: Mutex<CalibrationData>,
}

impl CalibrationStore {
    /// Load the persisted pair if the file exists, otherwise start empty.
    pub fn open<P: AsRef<Path>>(path: P, min_spread: f64) -> Self {
        let path = path.as_ref().to_path_buf();
        let data = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<CalibrationData>(&content) {
                Ok(data) => {
                    tracing::info!(file = %path.display(), complete = data.is_complete(), "Loaded soil calibration");
                    data
                }
                Err(e) => {
                    tracing::warn!(file = %path.display(), "Unreadable calibration file ({}), starting empty", e);
                    CalibrationData::default()
                }
            },
            Err(_) => {
                tracing::info!(file = %path.display(), "No calibration file yet");
                CalibrationData::default()
            }
        };
        Self {
            path,
            min_spread,
            data: Mutex::new(data),
        }
    }

    pub fn current(&self) -> CalibrationData {
        *self.data.lock().unwrap()
    }

    pub fn to_percent(&self, raw: f64) -> AppResult<f64> {
        self.current().to_percent(raw)
    }

    /// Record one reference point and persist immediately. A capture that
    /// would complete the pair with too little spread between the points is
    /// rejected and leaves both memory and file untouched.
    pub fn capture(&self, step: CalibrationStep, raw: f64) -> AppResult<CalibrationData> {
        let mut data = self.data.lock().unwrap();
        let mut next = *data;
        match step {
            CalibrationStep::Dry => next.dry = Some(raw),
            CalibrationStep::Wet => next.wet = Some(raw),
        }
        if let (Some(d), Some(w)) = (next.dry, next.wet) {
            let spread = (d - w).abs();
            if spread < self.min_spread {
                return Err(AppError::CalibrationRejected(format!(
                    "reference spread {:.1} is below the minimum {:.1}",
                    spread, self.min_spread
                )));
            }
        }
        let json = serde_json::to_string_pretty(&next)?;
        std::fs::write(&self.path, json)?;
        *data = next;
        tracing::info!(?step, raw, "Captured calibration reference");
        Ok(next)
    }
}
