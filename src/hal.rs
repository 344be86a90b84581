//! ==============================================================================
//! hal.rs - Hardware Abstraction Layer
//! ==============================================================================
//!
//! purpose:
//!     provides a unified interface for the garden hardware (GPIO relays,
//!     I2C sensors, 1-Wire probe). abstracts away the difference between
//!     running on a real Raspberry Pi (using `rppal`) and a development
//!     machine (using mocks).
//!
//! design philosophy:
//!     - "Compile Anywhere": the daemon should compile on Windows/Mac/Linux.
//!     - blocking here, async above: drivers block; sensors.rs owns the
//!       timeout wrapping.
//!     - polarity lives here: callers speak logical ON/OFF, the Pi impl
//!       applies the relay board's active-low trigger.
//!
//! relationships:
//!     - used by: sensors.rs (reads), relay.rs (actuation)
//!     - uses: rppal (on feature="hardware")
//!     - uses: std::process::Command (for the Python DHT22 driver)
//!
//! ==============================================================================

use anyhow::Result;

/// Blocking access to the environmental sensors.
pub trait SensorDriver: Send + Sync {
    /// DHT22 air probe: (temperature C, relative humidity %).
    fn read_air(&self) -> Result<(f64, f64)>;
    /// DS18B20 soil temperature in C.
    fn read_soil_temp(&self) -> Result<f64>;
    /// ADS1115 raw conversion counts from the soil moisture probe.
    fn read_soil_raw(&self) -> Result<f64>;
    /// BH1750 ambient light in lux.
    fn read_lux(&self) -> Result<f64>;
}

/// Blocking access to the relay board.
pub trait RelayDriver: Send + Sync {
    /// Drive a relay to a logical state. `on` means energized.
    fn write_relay(&self, pin: u8, on: bool) -> Result<()>;
}

// ==============================================================================================
// MOCK IMPLEMENTATION (For Non-Hardware Build)
// ==============================================================================================
#[cfg(not(feature = "hardware"))]
use std::collections::{HashMap, VecDeque};
#[cfg(not(feature = "hardware"))]
use std::sync::{Arc, Mutex};

#[cfg(not(feature = "hardware"))]
#[derive(Clone)]
pub struct Hal {
    state: Arc<Mutex<MockState>>,
}

#[cfg(not(feature = "hardware"))]
struct MockState {
    air: (f64, f64),
    soil_temp: f64,
    soil_raw: f64,
    soil_queue: VecDeque<f64>,
    lux: Option<f64>,
    read_delay: std::time::Duration,
    relay_levels: HashMap<u8, bool>,
    relay_writes: u32,
    fail_relays: bool,
    fail_sensors: bool,
}

#[cfg(not(feature = "hardware"))]
impl Hal {
    pub fn new(_cfg: &crate::config::HostConfig) -> Self {
        tracing::info!("Using MOCK HAL (No hardware access)");
        Self {
            state: Arc::new(Mutex::new(MockState {
                air: (22.5, 48.0),
                soil_temp: 19.5,
                soil_raw: 220.0,
                soil_queue: VecDeque::new(),
                lux: Some(150.0),
                read_delay: std::time::Duration::ZERO,
                relay_levels: HashMap::new(),
                relay_writes: 0,
                fail_relays: false,
                fail_sensors: false,
            })),
        }
    }

    pub fn set_air(&self, temp_c: f64, humidity: f64) {
        self.state.lock().unwrap().air = (temp_c, humidity);
    }

    pub fn set_soil_temp(&self, temp_c: f64) {
        self.state.lock().unwrap().soil_temp = temp_c;
    }

    pub fn set_soil_raw(&self, raw: f64) {
        self.state.lock().unwrap().soil_raw = raw;
    }

    /// Queue raw soil readings returned one per read before falling back
    /// to the fixed value.
    pub fn queue_soil_raw<I: IntoIterator<Item = f64>>(&self, values: I) {
        self.state.lock().unwrap().soil_queue.extend(values);
    }

    /// `None` makes lux reads fail, as an absent BH1750 would.
    pub fn set_lux(&self, lux: Option<f64>) {
        self.state.lock().unwrap().lux = lux;
    }

    pub fn set_fail_relays(&self, fail: bool) {
        self.state.lock().unwrap().fail_relays = fail;
    }

    pub fn set_fail_sensors(&self, fail: bool) {
        self.state.lock().unwrap().fail_sensors = fail;
    }

    /// Make every sensor read block for `delay` first.
    pub fn set_read_delay(&self, delay: std::time::Duration) {
        self.state.lock().unwrap().read_delay = delay;
    }

    // sleeps outside the state lock so a stuck read cannot wedge the mock
    fn pause(&self) {
        let delay = self.state.lock().unwrap().read_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }

    /// Last logical state applied to a pin, if any write succeeded.
    pub fn relay_level(&self, pin: u8) -> Option<bool> {
        self.state.lock().unwrap().relay_levels.get(&pin).copied()
    }

    pub fn relay_write_count(&self) -> u32 {
        self.state.lock().unwrap().relay_writes
    }
}

#[cfg(not(feature = "hardware"))]
impl SensorDriver for Hal {
    fn read_air(&self) -> Result<(f64, f64)> {
        self.pause();
        let st = self.state.lock().unwrap();
        if st.fail_sensors {
            anyhow::bail!("mock sensor failure");
        }
        tracing::debug!("[MOCK DHT22] {}C / {}%", st.air.0, st.air.1);
        Ok(st.air)
    }

    fn read_soil_temp(&self) -> Result<f64> {
        self.pause();
        let st = self.state.lock().unwrap();
        if st.fail_sensors {
            anyhow::bail!("mock sensor failure");
        }
        tracing::debug!("[MOCK DS18B20] {}C", st.soil_temp);
        Ok(st.soil_temp)
    }

    fn read_soil_raw(&self) -> Result<f64> {
        self.pause();
        let mut st = self.state.lock().unwrap();
        if st.fail_sensors {
            anyhow::bail!("mock sensor failure");
        }
        let raw = st.soil_queue.pop_front().unwrap_or(st.soil_raw);
        tracing::debug!("[MOCK ADS1115] raw {}", raw);
        Ok(raw)
    }

    fn read_lux(&self) -> Result<f64> {
        self.pause();
        let st = self.state.lock().unwrap();
        if st.fail_sensors {
            anyhow::bail!("mock sensor failure");
        }
        match st.lux {
            Some(lux) => {
                tracing::debug!("[MOCK BH1750] {} lux", lux);
                Ok(lux)
            }
            None => anyhow::bail!("BH1750 not present"),
        }
    }
}

#[cfg(not(feature = "hardware"))]
impl RelayDriver for Hal {
    fn write_relay(&self, pin: u8, on: bool) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        if st.fail_relays {
            anyhow::bail!("mock relay failure");
        }
        tracing::debug!("[MOCK RELAY] Pin {} -> {}", pin, if on { "ON" } else { "OFF" });
        st.relay_levels.insert(pin, on);
        st.relay_writes += 1;
        Ok(())
    }
}

// ==============================================================================================
// REAL IMPLEMENTATION (For Raspberry Pi)
// ==============================================================================================
#[cfg(feature = "hardware")]
#[derive(Clone)]
pub struct Hal {
    dht22_pin: u8,
    bh1750_addr: u8,
    ads_addr: u8,
    ads_channel: u8,
    w1_base_dir: String,
    active_low: bool,
}

#[cfg(feature = "hardware")]
impl Hal {
    pub fn new(cfg: &crate::config::HostConfig) -> Self {
        tracing::info!("Using REAL HARDWARE HAL (rppal)");
        Self {
            dht22_pin: cfg.sensors.dht22_pin,
            bh1750_addr: cfg.sensors.bh1750_addr,
            ads_addr: cfg.sensors.ads_addr,
            ads_channel: cfg.sensors.ads_channel,
            w1_base_dir: cfg.sensors.w1_base_dir.clone(),
            active_low: cfg.relays.active_low,
        }
    }
}

#[cfg(feature = "hardware")]
impl SensorDriver for Hal {
    fn read_air(&self) -> Result<(f64, f64)> {
        // NOTE: Python subprocess for DHT22 stability on generic Linux kernels;
        // native bit-banging is notoriously flaky without a kernel driver.
        use std::process::Command;
        let script = format!(
            r#"
import adafruit_dht, board, json
try:
    dht = adafruit_dht.DHT22(board.D{})
    print(json.dumps({{"t": dht.temperature, "h": dht.humidity}}))
except Exception:
    print("null")
"#,
            self.dht22_pin
        );
        let output = Command::new("python3").args(["-c", &script]).output()?;
        parse_dht_json(&String::from_utf8_lossy(&output.stdout))
    }

    fn read_soil_temp(&self) -> Result<f64> {
        // first 28-* directory under the 1-Wire base is the DS18B20
        let mut device = None;
        for entry in std::fs::read_dir(&self.w1_base_dir)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with("28") {
                device = Some(entry.path());
                break;
            }
        }
        let device =
            device.ok_or_else(|| anyhow::anyhow!("no DS18B20 under {}", self.w1_base_dir))?;
        let payload = std::fs::read_to_string(device.join("w1_slave"))?;
        parse_w1_payload(&payload).ok_or_else(|| anyhow::anyhow!("DS18B20 CRC failure"))
    }

    fn read_soil_raw(&self) -> Result<f64> {
        use rppal::i2c::I2c;
        let mut i2c = I2c::new()?;
        i2c.set_slave_address(self.ads_addr as u16)?;
        // single-shot conversion, +-4.096V range, 128 SPS, comparator off
        let config_hi = 0xC3 | (self.ads_channel << 4);
        i2c.write(&[0x01, config_hi, 0x83])?;
        std::thread::sleep(std::time::Duration::from_millis(10));
        i2c.write(&[0x00])?;
        let mut buf = [0u8; 2];
        i2c.read(&mut buf)?;
        Ok(i16::from_be_bytes(buf) as f64)
    }

    fn read_lux(&self) -> Result<f64> {
        use rppal::i2c::I2c;
        let mut i2c = I2c::new()?;
        i2c.set_slave_address(self.bh1750_addr as u16)?;
        // one-time high-resolution measurement
        i2c.write(&[0x20])?;
        std::thread::sleep(std::time::Duration::from_millis(180));
        let mut buf = [0u8; 2];
        i2c.read(&mut buf)?;
        Ok(u16::from_be_bytes(buf) as f64 / 1.2)
    }
}

#[cfg(feature = "hardware")]
impl RelayDriver for Hal {
    fn write_relay(&self, pin: u8, on: bool) -> Result<()> {
        use rppal::gpio::Gpio;
        let gpio = Gpio::new()?;
        let mut p = gpio.get(pin)?.into_output();
        // CRITICAL: prevent the pin from resetting when the handle drops.
        // Without this the relay releases as soon as this function returns.
        p.set_reset_on_drop(false);
        let high = if self.active_low { !on } else { on };
        if high {
            p.set_high();
        } else {
            p.set_low();
        }
        Ok(())
    }
}

#[cfg(any(feature = "hardware", test))]
fn parse_dht_json(stdout: &str) -> Result<(f64, f64)> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() || trimmed == "null" {
        anyhow::bail!("DHT22 read failed");
    }
    let v: serde_json::Value = serde_json::from_str(trimmed)?;
    match (v["t"].as_f64(), v["h"].as_f64()) {
        (Some(t), Some(h)) => Ok((t, h)),
        _ => anyhow::bail!("DHT22 returned an incomplete reading"),
    }
}

/// Extract the temperature from a `w1_slave` payload, refusing payloads
/// whose CRC line does not end in YES.
#[cfg(any(feature = "hardware", test))]
fn parse_w1_payload(payload: &str) -> Option<f64> {
    let mut lines = payload.lines();
    let crc_line = lines.next()?;
    if !crc_line.trim_end().ends_with("YES") {
        return None;
    }
    let data_line = lines.next()?;
    let milli: i32 = data_line.split("t=").nth(1)?.trim().parse().ok()?;
    Some(milli as f64 / 1000.0)
}
