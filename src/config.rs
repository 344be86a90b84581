//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `plantwatch.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - PathsConfig: durable files (sqlite db, calibration, run status).
//!     - RelaysConfig: GPIO pins and trigger polarity.
//!     - SensorsConfig: DHT22 pin, BH1750 address, 1-Wire base, ADS channel.
//!     - SamplingConfig: cycle interval, jitter rejection, read timeouts.
//!     - WateringConfig: hysteresis watermarks, guard intervals, cool-down.
//!     - SupervisorConfig: loop start/stop/liveness timeouts.
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HostConfig {
    pub paths: PathsConfig,
    pub http: HttpConfig,
    pub relays: RelaysConfig,
    pub sensors: SensorsConfig,
    pub sampling: SamplingConfig,
    pub watering: WateringConfig,
    pub supervisor: SupervisorConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PathsConfig {
    pub db_file: String,
    pub calibration_file: String,
    pub status_file: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RelaysConfig {
    /// BCM pin of the water pump relay
    pub pump_pin: u8,
    /// BCM pin of the auxiliary relay (grow light)
    pub aux_pin: u8,
    /// low-trigger boards energize on LOW; OFF is HIGH
    pub active_low: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SensorsConfig {
    /// BCM data pin of the DHT22 air temperature/humidity sensor
    pub dht22_pin: u8,
    /// I2C address of the BH1750 light sensor
    pub bh1750_addr: u8,
    /// I2C address of the ADS1115 analog converter
    pub ads_addr: u8,
    /// 1-Wire device directory scanned for a DS18B20 (28-*)
    pub w1_base_dir: String,
    /// ADS1115 input channel of the soil moisture probe
    pub ads_channel: u8,
    /// minimum |dry - wet| raw spread for a calibration to be accepted
    pub min_calibration_spread: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SamplingConfig {
    /// seconds between sampling cycles
    pub interval_secs: u64,
    /// consecutive raw soil readings taken per cycle for jitter rejection
    pub soil_samples: u32,
    /// max raw spread across those readings for the row to count as stable
    pub soil_jitter_tolerance: f64,
    /// how many times an unstable burst is retried before accepting it
    pub soil_retries: u32,
    /// per-read driver timeout
    pub read_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WateringConfig {
    pub auto_enabled: bool,
    /// pump goes ON at or below this soil percent
    pub low_watermark_percent: f64,
    /// pump goes OFF at or above this soil percent
    pub high_watermark_percent: f64,
    /// minimum time the pump stays ON before auto may switch it off
    pub min_on_secs: u64,
    /// minimum time the pump stays OFF before auto may switch it on
    pub min_off_secs: u64,
    /// how long a manual override suppresses automatic control
    pub manual_cooldown_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SupervisorConfig {
    /// how long start() waits for the first heartbeat
    pub startup_timeout_secs: u64,
    /// how long stop() waits before forcing the loop down
    pub stop_timeout_secs: u64,
    /// heartbeat age beyond which a "running" status is treated as dead
    pub liveness_timeout_secs: u64,
    /// start the sampling loop at process startup
    pub autostart: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl HostConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        let config: HostConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        config.validate()?;
        Ok(config)
    }

    /// Load with default fallback
    pub fn load_or_default() -> Self {
        let paths = [
            std::path::PathBuf::from("config").join("plantwatch.toml"),
            std::path::PathBuf::from("plantwatch.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        println!("[CONFIG] Warning: No config file found - using defaults");
        Self::default()
    }

    /// Reject configurations the control logic cannot operate under.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.watering.low_watermark_percent >= self.watering.high_watermark_percent {
            anyhow::bail!(
                "watering.low_watermark_percent ({}) must be below high_watermark_percent ({})",
                self.watering.low_watermark_percent,
                self.watering.high_watermark_percent
            );
        }
        if self.sampling.soil_samples == 0 {
            anyhow::bail!("sampling.soil_samples must be at least 1");
        }
        if self.sampling.interval_secs == 0 {
            anyhow::bail!("sampling.interval_secs must be at least 1");
        }
        if self.sensors.min_calibration_spread <= 0.0 {
            anyhow::bail!("sensors.min_calibration_spread must be positive");
        }
        Ok(())
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("┌─────────────────────────────────────────┐");
        println!("│          PLANTWATCH CONFIGURATION       │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Database: {}                   │", self.paths.db_file);
        println!("│ Bind: {}                     │", self.http.bind);
        println!("│ Cycle Interval: {}s                    │", self.sampling.interval_secs);
        println!(
            "│ Watermarks: on<={}%, off>={}%           │",
            self.watering.low_watermark_percent, self.watering.high_watermark_percent
        );
        println!("│ Log Level: {}                        │", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            http: HttpConfig::default(),
            relays: RelaysConfig::default(),
            sensors: SensorsConfig::default(),
            sampling: SamplingConfig::default(),
            watering: WateringConfig::default(),
            supervisor: SupervisorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            db_file: "sensors.db".to_string(),
            calibration_file: "soil_calibration.json".to_string(),
            status_file: "logger_status.json".to_string(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
        }
    }
}

impl Default for RelaysConfig {
    fn default() -> Self {
        Self {
            pump_pin: 12,
            aux_pin: 16,
            active_low: true,
        }
    }
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            dht22_pin: 27,
            bh1750_addr: 0x23,
            ads_addr: 0x48,
            w1_base_dir: "/sys/bus/w1/devices".to_string(),
            ads_channel: 0,
            min_calibration_spread: 50.0,
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            soil_samples: 3,
            soil_jitter_tolerance: 15.0,
            soil_retries: 2,
            read_timeout_ms: 3_000,
        }
    }
}

impl Default for WateringConfig {
    fn default() -> Self {
        Self {
            auto_enabled: true,
            low_watermark_percent: 40.0,
            high_watermark_percent: 55.0,
            min_on_secs: 30,
            min_off_secs: 600,
            manual_cooldown_secs: 900,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            startup_timeout_secs: 5,
            stop_timeout_secs: 10,
            liveness_timeout_secs: 900,
            autostart: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let c = HostConfig::default();
        assert!(c.watering.low_watermark_percent < c.watering.high_watermark_percent);
        assert!(c.sampling.soil_samples >= 1);
        assert!(c.sampling.interval_secs > 0);
        assert!(c.supervisor.liveness_timeout_secs >= c.sampling.interval_secs);
        c.validate().expect("defaults must validate");
    }

    #[test]
    fn inverted_watermarks_are_rejected() {
        let mut c = HostConfig::default();
        c.watering.low_watermark_percent = 70.0;
        c.watering.high_watermark_percent = 55.0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let c: HostConfig = toml::from_str(
            r#"
            [sampling]
            interval_secs = 60

            [watering]
            low_watermark_percent = 35.0
            "#,
        )
        .unwrap();
        assert_eq!(c.sampling.interval_secs, 60);
        assert_eq!(c.watering.low_watermark_percent, 35.0);
        // untouched sections keep their defaults
        assert_eq!(c.relays.pump_pin, 12);
        assert_eq!(c.paths.db_file, "sensors.db");
    }
}
