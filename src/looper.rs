//! ==============================================================================
//! looper.rs - Sampling Loop
//! ==============================================================================
//!
//! purpose:
//!     the autonomous sense-decide-act cycle. every interval it reads all
//!     channels, persists one row, runs one automatic control pass, and
//!     heartbeats the run status.
//!
//! notes:
//!     - a failed channel never aborts the cycle; its column is NULL and
//!       the rest of the row still lands.
//!     - automatic control only acts on a settled, calibrated soil reading.
//!     - the loop heartbeats at the top of each cycle; a refused heartbeat
//!       means a newer instance owns the run status and this one winds
//!       down without writing anything further.
//!
//! ==============================================================================

use crate::calibration::CalibrationStore;
use crate::domain::{now_stamp, CycleSample};
use crate::error::AppError;
use crate::relay::RelayCoordinator;
use crate::sensors::SensorService;
use crate::status::StatusStore;
use crate::store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub struct SamplingLoop {
    sensors: Arc<SensorService>,
    calibration: Arc<CalibrationStore>,
    coordinator: Arc<RelayCoordinator>,
    store: Arc<Store>,
    status: Arc<dyn StatusStore>,
    interval: Duration,
    token: String,
    stop_rx: watch::Receiver<bool>,
}

impl SamplingLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sensors: Arc<SensorService>,
        calibration: Arc<CalibrationStore>,
        coordinator: Arc<RelayCoordinator>,
        store: Arc<Store>,
        status: Arc<dyn StatusStore>,
        interval: Duration,
        token: String,
        stop_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            sensors,
            calibration,
            coordinator,
            store,
            status,
            interval,
            token,
            stop_rx,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(token = %self.token, interval = ?self.interval, "Sampling loop started");
        loop {
            match self.status.heartbeat(&self.token) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(token = %self.token, "Run status ownership moved on, winding down");
                    break;
                }
                Err(e) => tracing::warn!("Heartbeat write failed: {e}"),
            }

            self.cycle().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = self.stop_rx.changed() => {
                    // a dropped sender counts as a stop request
                    if changed.is_err() || *self.stop_rx.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!(token = %self.token, "Sampling loop exited");
    }

    async fn cycle(&self) {
        let timestamp = now_stamp();

        let (air_temp, air_humidity) = match self.sensors.read_air().await {
            Ok((t, h)) => (Some(t), Some(h)),
            Err(e) => {
                tracing::warn!("Air probe read failed: {e}");
                (None, None)
            }
        };

        let soil_temp = match self.sensors.read_soil_temp().await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("Soil temperature read failed: {e}");
                None
            }
        };

        let (soil_raw, stable) = match self.sensors.soil_burst().await {
            Ok(burst) => (Some(burst.raw), burst.stable),
            Err(e) => {
                tracing::warn!("Soil probe read failed: {e}");
                (None, true)
            }
        };

        let lux = match self.sensors.read_lux().await {
            Ok(v) => Some(v),
            // the light sensor is optional hardware, absence is routine
            Err(e) => {
                tracing::debug!("Light read unavailable: {e}");
                None
            }
        };

        let soil_percent = match soil_raw {
            Some(raw) => match self.calibration.to_percent(raw) {
                Ok(p) => Some(p),
                Err(AppError::Uncalibrated) => {
                    tracing::debug!("Soil probe not calibrated, storing raw counts only");
                    None
                }
                Err(e) => {
                    tracing::warn!("Soil percent mapping failed: {e}");
                    None
                }
            },
            None => None,
        };

        let sample = CycleSample {
            timestamp,
            air_temp,
            air_humidity,
            soil_temp,
            soil_raw,
            soil_percent,
            lux,
            stable,
        };
        tracing::info!(
            air_temp = ?sample.air_temp,
            soil_raw = ?sample.soil_raw,
            soil_percent = ?sample.soil_percent,
            lux = ?sample.lux,
            stable = sample.stable,
            "Cycle sampled"
        );
        if let Err(e) = self.store.insert_sample(&sample) {
            tracing::error!("Failed to persist sample: {e}");
        }

        match (soil_percent, stable) {
            (Some(percent), true) => match self.coordinator.auto_decide(percent).await {
                Ok(outcome) => tracing::debug!(?outcome, percent, "Automatic control pass"),
                Err(e) => tracing::warn!("Automatic control failed: {e}"),
            },
            (Some(_), false) => {
                tracing::info!("Unstable soil reading, skipping automatic control")
            }
            (None, _) => {}
        }
    }
}
