//! Shared value types: sensor channels, relay identities, log rows, relay
//! events, run status and deletion requests.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// timestamp format used everywhere (log rows, relay events, status text)
pub const STAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// current local time formatted for persistence
pub fn now_stamp() -> String {
    chrono::Local::now().format(STAMP_FORMAT).to_string()
}

// ------------------------------------------------------------------
// sensor channels
// ------------------------------------------------------------------

/// one logical sensor channel; a physical sensor may back several
/// (the DHT22 backs both air channels)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorChannel {
    AirTemp,
    AirHumidity,
    SoilTemp,
    SoilMoisture,
    Light,
}

impl SensorChannel {
    pub const ALL: [SensorChannel; 5] = [
        SensorChannel::AirTemp,
        SensorChannel::AirHumidity,
        SensorChannel::SoilTemp,
        SensorChannel::SoilMoisture,
        SensorChannel::Light,
    ];

    pub fn parse(s: &str) -> AppResult<Self> {
        match s {
            "air_temp" => Ok(Self::AirTemp),
            "air_humidity" => Ok(Self::AirHumidity),
            "soil_temp" => Ok(Self::SoilTemp),
            "soil_moisture" => Ok(Self::SoilMoisture),
            "light" => Ok(Self::Light),
            other => Err(AppError::UnknownChannel(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AirTemp => "air_temp",
            Self::AirHumidity => "air_humidity",
            Self::SoilTemp => "soil_temp",
            Self::SoilMoisture => "soil_moisture",
            Self::Light => "light",
        }
    }
}

impl fmt::Display for SensorChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ------------------------------------------------------------------
// relays
// ------------------------------------------------------------------

/// the two relay outputs: the water pump and the auxiliary channel
/// (grow light on the reference build)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayId {
    Pump,
    Aux,
}

impl RelayId {
    pub const ALL: [RelayId; 2] = [RelayId::Pump, RelayId::Aux];

    pub fn parse(s: &str) -> AppResult<Self> {
        match s {
            "pump" => Ok(Self::Pump),
            "aux" => Ok(Self::Aux),
            other => Err(AppError::UnknownRelay(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pump => "pump",
            Self::Aux => "aux",
        }
    }
}

impl fmt::Display for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// who asked for a relay transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelaySource {
    Auto,
    Manual,
}

impl RelaySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for RelaySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ------------------------------------------------------------------
// log rows
// ------------------------------------------------------------------

/// measurements captured during one sampling cycle, before persistence.
/// a None means the channel could not be read this cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleSample {
    pub timestamp: String,
    pub air_temp: Option<f64>,
    pub air_humidity: Option<f64>,
    pub soil_temp: Option<f64>,
    pub soil_raw: Option<f64>,
    pub soil_percent: Option<f64>,
    pub lux: Option<f64>,
    /// false when jitter rejection exhausted its retries on the soil channel
    pub stable: bool,
}

/// one persisted row of the `logs` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRow {
    pub id: i64,
    pub timestamp: String,
    pub air_temp: Option<f64>,
    pub air_humidity: Option<f64>,
    pub soil_temp: Option<f64>,
    pub soil_raw: Option<f64>,
    pub soil_percent: Option<f64>,
    pub lux: Option<f64>,
    pub stable: bool,
}

// ------------------------------------------------------------------
// relay events
// ------------------------------------------------------------------

/// one persisted relay state transition (append-only history)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayEvent {
    pub id: i64,
    pub timestamp: String,
    pub relay: RelayId,
    /// the state the transition attempted to reach
    pub value: bool,
    /// "on" or "off", with "-failed" appended when the driver refused
    pub action: String,
    pub source: RelaySource,
}

// ------------------------------------------------------------------
// run status
// ------------------------------------------------------------------

/// singleton record describing whether the sampling loop is alive.
/// `owner_token` identifies the loop instance that last wrote it, so a
/// crashed instance can be told apart from a freshly started one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub running: bool,
    /// epoch seconds of the last heartbeat
    pub last_heartbeat: u64,
    pub owner_token: String,
}

impl RunStatus {
    pub fn stopped() -> Self {
        Self {
            running: false,
            last_heartbeat: 0,
            owner_token: String::new(),
        }
    }

    /// liveness check: `running` alone is not trusted; a heartbeat older
    /// than the timeout means the loop died without clearing its flag
    pub fn is_live(&self, now_epoch: u64, liveness_timeout_secs: u64) -> bool {
        self.running && now_epoch.saturating_sub(self.last_heartbeat) <= liveness_timeout_secs
    }
}

/// epoch seconds right now
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ------------------------------------------------------------------
// deletion requests
// ------------------------------------------------------------------

/// raw deletion request as received from the control surface
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteRequest {
    #[serde(default)]
    pub ids: Option<Vec<i64>>,
    #[serde(default)]
    pub range: Option<String>,
    #[serde(default)]
    pub all: Option<bool>,
}

/// validated deletion selection, safe to hand to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteSelection {
    Ids(Vec<i64>),
    /// inclusive id range
    Range(i64, i64),
    All,
}

impl DeleteRequest {
    /// Validate the request into a selection. Exactly one of `ids`,
    /// `range`, `all=true` must be present; anything else is rejected
    /// before the store is touched.
    pub fn into_selection(self) -> AppResult<DeleteSelection> {
        let picked = [
            self.ids.is_some(),
            self.range.is_some(),
            self.all == Some(true),
        ]
        .iter()
        .filter(|p| **p)
        .count();
        if picked != 1 {
            return Err(AppError::InvalidDeletion(
                "specify exactly one of ids, range or all=true".to_string(),
            ));
        }

        if let Some(ids) = self.ids {
            if ids.is_empty() {
                return Err(AppError::InvalidDeletion("empty id list".to_string()));
            }
            if ids.iter().any(|id| *id < 1) {
                return Err(AppError::InvalidDeletion(
                    "ids must be positive".to_string(),
                ));
            }
            return Ok(DeleteSelection::Ids(ids));
        }

        if let Some(range) = self.range {
            return parse_id_range(&range);
        }

        Ok(DeleteSelection::All)
    }
}

/// parse an inclusive "a-b" id range
fn parse_id_range(s: &str) -> AppResult<DeleteSelection> {
    let malformed = || AppError::InvalidDeletion(format!("malformed range '{s}', expected 'a-b'"));
    let (a, b) = s.trim().split_once('-').ok_or_else(malformed)?;
    let start: i64 = a.trim().parse().map_err(|_| malformed())?;
    let end: i64 = b.trim().parse().map_err(|_| malformed())?;
    if start < 1 || end < start {
        return Err(AppError::InvalidDeletion(format!(
            "invalid range {start}-{end}: start must be >= 1 and <= end"
        )));
    }
    Ok(DeleteSelection::Range(start, end))
}

/// what a deletion removed: a row count, or everything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Count(usize),
    All,
}

impl Serialize for DeleteOutcome {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Count(n) => serializer.serialize_u64(*n as u64),
            Self::All => serializer.serialize_str("all"),
        }
    }
}
