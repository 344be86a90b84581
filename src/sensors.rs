//! ==============================================================================
//! sensors.rs - Sensor Read Service
//! ==============================================================================
//!
//! purpose:
//!     async face of the sensor drivers. every read runs on the blocking
//!     pool under a deadline, so a wedged probe (the DHT22 is notorious)
//!     can never stall the sampling loop or an HTTP request.
//!
//! notes:
//!     - a timed out blocking read keeps running on its pool thread; only
//!       its result is abandoned.
//!     - the soil probe is read in bursts: several consecutive readings
//!       must agree within a tolerance, otherwise the burst is retried and
//!       eventually accepted with `stable = false`.
//!
//! ==============================================================================

use crate::config::SamplingConfig;
use crate::domain::SensorChannel;
use crate::error::{AppError, AppResult};
use crate::hal::SensorDriver;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one jitter-rejected soil burst.
#[derive(Debug, Clone, Copy)]
pub struct SoilBurst {
    /// mean of the accepted burst
    pub raw: f64,
    pub stable: bool,
}

pub struct SensorService {
    driver: Arc<dyn SensorDriver>,
    read_timeout: Duration,
    soil_samples: u32,
    soil_tolerance: f64,
    soil_retries: u32,
}

impl SensorService {
    pub fn new(driver: Arc<dyn SensorDriver>, cfg: &SamplingConfig) -> Self {
        Self {
            driver,
            read_timeout: Duration::from_millis(cfg.read_timeout_ms),
            soil_samples: cfg.soil_samples.max(1),
            soil_tolerance: cfg.soil_jitter_tolerance,
            soil_retries: cfg.soil_retries,
        }
    }

    async fn with_timeout<T, F>(&self, channel: SensorChannel, op: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn SensorDriver) -> anyhow::Result<T> + Send + 'static,
    {
        let driver = Arc::clone(&self.driver);
        let task = tokio::task::spawn_blocking(move || op(driver.as_ref()));
        match tokio::time::timeout(self.read_timeout, task).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(AppError::SensorRead {
                channel,
                reason: e.to_string(),
            }),
            Ok(Err(join_err)) => Err(AppError::SensorRead {
                channel,
                reason: join_err.to_string(),
            }),
            Err(_) => Err(AppError::SensorTimeout(channel)),
        }
    }

    /// One DHT22 transaction serves both air channels.
    pub async fn read_air(&self) -> AppResult<(f64, f64)> {
        self.with_timeout(SensorChannel::AirTemp, |d| d.read_air())
            .await
    }

    pub async fn read_soil_temp(&self) -> AppResult<f64> {
        self.with_timeout(SensorChannel::SoilTemp, |d| d.read_soil_temp())
            .await
    }

    pub async fn read_soil_raw(&self) -> AppResult<f64> {
        self.with_timeout(SensorChannel::SoilMoisture, |d| d.read_soil_raw())
            .await
    }

    pub async fn read_lux(&self) -> AppResult<f64> {
        self.with_timeout(SensorChannel::Light, |d| d.read_lux())
            .await
    }

    /// Single fresh numeric for the on-demand read endpoint. The soil
    /// moisture channel reports raw counts; mapping to percent is the
    /// calibration store's business.
    pub async fn read_channel(&self, channel: SensorChannel) -> AppResult<f64> {
        match channel {
            SensorChannel::AirTemp => Ok(self.read_air().await?.0),
            SensorChannel::AirHumidity => Ok(self.read_air().await?.1),
            SensorChannel::SoilTemp => self.read_soil_temp().await,
            SensorChannel::SoilMoisture => self.read_soil_raw().await,
            SensorChannel::Light => self.read_lux().await,
        }
    }

    /// Burst-read the soil probe until the readings agree or the retries
    /// run out. A hard driver failure fails the whole burst.
    pub async fn soil_burst(&self) -> AppResult<SoilBurst> {
        let mut last: Vec<f64> = Vec::new();
        for attempt in 0..=self.soil_retries {
            let mut readings = Vec::with_capacity(self.soil_samples as usize);
            for _ in 0..self.soil_samples {
                readings.push(self.read_soil_raw().await?);
            }
            let spread = spread(&readings);
            if spread <= self.soil_tolerance {
                return Ok(SoilBurst {
                    raw: mean(&readings),
                    stable: true,
                });
            }
            tracing::debug!(attempt, spread, "Soil burst over jitter tolerance");
            last = readings;
        }
        tracing::warn!("Soil readings never settled, flagging row as unstable");
        Ok(SoilBurst {
            raw: mean(&last),
            stable: false,
        })
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn spread(values: &[f64]) -> f64 {
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    max - min
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use crate::hal::Hal;

    fn service(hal: &Hal, samples: u32, tolerance: f64, retries: u32) -> SensorService {
        let mut cfg = HostConfig::default().sampling;
        cfg.soil_samples = samples;
        cfg.soil_jitter_tolerance = tolerance;
        cfg.soil_retries = retries;
        cfg.read_timeout_ms = 200;
        SensorService::new(Arc::new(hal.clone()), &cfg)
    }

    #[tokio::test]
    async fn on_demand_reads_route_to_the_right_driver() {
        let hal = Hal::new(&HostConfig::default());
        hal.set_air(24.0, 61.0);
        hal.set_soil_temp(17.5);
        hal.set_soil_raw(310.0);
        hal.set_lux(Some(88.0));
        let svc = service(&hal, 3, 15.0, 2);

        assert_eq!(svc.read_channel(SensorChannel::AirTemp).await.unwrap(), 24.0);
        assert_eq!(
            svc.read_channel(SensorChannel::AirHumidity).await.unwrap(),
            61.0
        );
        assert_eq!(svc.read_channel(SensorChannel::SoilTemp).await.unwrap(), 17.5);
        assert_eq!(
            svc.read_channel(SensorChannel::SoilMoisture).await.unwrap(),
            310.0
        );
        assert_eq!(svc.read_channel(SensorChannel::Light).await.unwrap(), 88.0);
    }

    #[tokio::test]
    async fn steady_burst_is_stable_and_averaged() {
        let hal = Hal::new(&HostConfig::default());
        hal.queue_soil_raw([300.0, 304.0, 302.0]);
        let svc = service(&hal, 3, 15.0, 2);

        let burst = svc.soil_burst().await.unwrap();
        assert!(burst.stable);
        assert!((burst.raw - 302.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn jittery_burst_retries_then_recovers() {
        let hal = Hal::new(&HostConfig::default());
        // first burst disagrees, second settles
        hal.queue_soil_raw([100.0, 300.0, 120.0, 250.0, 252.0, 251.0]);
        let svc = service(&hal, 3, 15.0, 2);

        let burst = svc.soil_burst().await.unwrap();
        assert!(burst.stable);
        assert!((burst.raw - 251.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn exhausted_retries_flag_the_burst_unstable() {
        let hal = Hal::new(&HostConfig::default());
        hal.queue_soil_raw([
            100.0, 300.0, 100.0, // attempt 1
            90.0, 310.0, 95.0, // attempt 2
            80.0, 320.0, 110.0, // attempt 3 (accepted, unstable)
        ]);
        let svc = service(&hal, 3, 15.0, 2);

        let burst = svc.soil_burst().await.unwrap();
        assert!(!burst.stable);
        assert!((burst.raw - 170.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn slow_driver_maps_to_a_timeout_error() {
        let hal = Hal::new(&HostConfig::default());
        hal.set_read_delay(Duration::from_millis(500));
        let svc = service(&hal, 3, 15.0, 0);

        match svc.read_channel(SensorChannel::SoilTemp).await {
            Err(AppError::SensorTimeout(SensorChannel::SoilTemp)) => {}
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn driver_failure_carries_the_channel_tag() {
        let hal = Hal::new(&HostConfig::default());
        hal.set_fail_sensors(true);
        let svc = service(&hal, 3, 15.0, 0);

        match svc.read_channel(SensorChannel::Light).await {
            Err(AppError::SensorRead { channel, .. }) => {
                assert_eq!(channel, SensorChannel::Light)
            }
            other => panic!("expected read failure, got {other:?}"),
        }
    }
}
