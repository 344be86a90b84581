//! ==============================================================================
//! store.rs - SQLite Persistence
//! ==============================================================================
//!
//! purpose:
//!     durable home of everything the daemon measures and does: one `logs`
//!     row per sampling cycle, one `relay_log` row per relay transition.
//!
//! notes:
//!     - the schema setup is idempotent and additive; databases written by
//!       older builds gain missing columns in place, rows are never touched.
//!     - readers get the newest window in ascending id order, which is what
//!       the charts on the control surface want.
//!     - a single connection behind a mutex; every call is short.
//!
//! ==============================================================================

use crate::domain::{
    now_stamp, CycleSample, DeleteOutcome, DeleteSelection, LogRow, RelayEvent, RelayId,
    RelaySource,
};
use crate::error::AppResult;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

/// Filters for reading back log rows. A missing or zero limit means
/// "no limit", matching the export tooling this database grew up with.
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    pub limit: Option<u32>,
    pub since: Option<String>,
    pub until: Option<String>,
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        tracing::info!(db = %path.as_ref().display(), "Opened sensor database");
        Self::with_connection(conn)
    }

    /// In-memory database, used by the test suite.
    pub fn open_in_memory() -> AppResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> AppResult<Self> {
        ensure_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // --------------------------------------------------------------------------
    // sampling cycle rows
    // --------------------------------------------------------------------------

    pub fn insert_sample(&self, sample: &CycleSample) -> AppResult<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO logs (timestamp, dht22_air_temp, dht22_humidity, ds18b20_soil_temp, soil_raw, soil_percent, lux, stable)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                sample.timestamp,
                sample.air_temp,
                sample.air_humidity,
                sample.soil_temp,
                sample.soil_raw,
                sample.soil_percent,
                sample.lux,
                sample.stable,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Newest matching rows, returned oldest-first.
    pub fn query_logs(&self, q: &LogQuery) -> AppResult<Vec<LogRow>> {
        let conn = self.conn.lock().unwrap();
        let limit = i64::from(q.limit.unwrap_or(0));
        let mut sql = String::from(
            "SELECT id, timestamp, dht22_air_temp, dht22_humidity, ds18b20_soil_temp, soil_raw, soil_percent, lux, stable FROM logs",
        );
        let mut clauses: Vec<&str> = Vec::new();
        let mut params: Vec<&dyn rusqlite::ToSql> = Vec::new();
        if let Some(since) = q.since.as_ref() {
            clauses.push("timestamp >= ?");
            params.push(since);
        }
        if let Some(until) = q.until.as_ref() {
            clauses.push("timestamp <= ?");
            params.push(until);
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY id DESC");
        if limit > 0 {
            sql.push_str(" LIMIT ?");
            params.push(&limit);
        }

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt
            .query_map(&params[..], row_to_log)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.reverse();
        Ok(rows)
    }

    pub fn delete_logs(&self, selection: DeleteSelection) -> AppResult<DeleteOutcome> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let outcome = match selection {
            DeleteSelection::Ids(ids) => {
                let mut deleted = 0usize;
                {
                    let mut stmt = tx.prepare("DELETE FROM logs WHERE id = ?1")?;
                    for id in ids {
                        deleted += stmt.execute(params![id])?;
                    }
                }
                DeleteOutcome::Count(deleted)
            }
            DeleteSelection::Range(start, end) => {
                let deleted = tx.execute(
                    "DELETE FROM logs WHERE id BETWEEN ?1 AND ?2",
                    params![start, end],
                )?;
                DeleteOutcome::Count(deleted)
            }
            DeleteSelection::All => {
                tx.execute("DELETE FROM logs", [])?;
                // a fresh database has no sequence row to reset yet
                if let Err(e) = tx.execute("DELETE FROM sqlite_sequence WHERE name = 'logs'", []) {
                    tracing::debug!("sqlite_sequence reset skipped: {e}");
                }
                DeleteOutcome::All
            }
        };
        tx.commit()?;
        tracing::info!(?outcome, "Deleted log rows");
        Ok(outcome)
    }

    // --------------------------------------------------------------------------
    // relay transitions
    // --------------------------------------------------------------------------

    /// Append a relay transition and return it with its assigned id.
    /// `action` is "on"/"off", with "-failed" appended when the driver
    /// refused the write.
    pub fn record_relay(
        &self,
        relay: RelayId,
        action: &str,
        source: RelaySource,
    ) -> AppResult<RelayEvent> {
        let conn = self.conn.lock().unwrap();
        let timestamp = now_stamp();
        conn.execute(
            "INSERT INTO relay_log (timestamp, relay_name, action, source) VALUES (?1, ?2, ?3, ?4)",
            params![timestamp, relay.as_str(), action, source.as_str()],
        )?;
        Ok(RelayEvent {
            id: conn.last_insert_rowid(),
            timestamp,
            relay,
            value: action.starts_with("on"),
            action: action.to_string(),
            source,
        })
    }

    /// Most recent transitions first. Rows with an unrecognizable relay
    /// name are skipped rather than failing the whole read.
    pub fn relay_history(&self, limit: u32) -> AppResult<Vec<RelayEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, relay_name, action, source FROM relay_log ORDER BY id DESC LIMIT ?1",
        )?;
        let raw = stmt
            .query_map(params![limit], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut events = Vec::with_capacity(raw.len());
        for (id, timestamp, relay_name, action, source) in raw {
            let relay = match RelayId::parse(&relay_name) {
                Ok(relay) => relay,
                Err(_) => {
                    tracing::warn!(%relay_name, "Skipping relay event with unknown relay");
                    continue;
                }
            };
            events.push(RelayEvent {
                id,
                timestamp,
                relay,
                value: action.starts_with("on"),
                action,
                source: match source.as_str() {
                    "auto" => RelaySource::Auto,
                    _ => RelaySource::Manual,
                },
            });
        }
        Ok(events)
    }
}

fn ensure_schema(conn: &Connection) -> AppResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            dht22_air_temp REAL,
            dht22_humidity REAL,
            ds18b20_soil_temp REAL,
            soil_raw REAL,
            soil_percent REAL,
            lux REAL,
            stable INTEGER DEFAULT 1
        );
        CREATE TABLE IF NOT EXISTS relay_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            relay_name TEXT NOT NULL,
            action TEXT NOT NULL,
            source TEXT NOT NULL
        );",
    )?;
    // columns added after the first field deployment; older databases
    // gain them in place here
    ensure_column(conn, "logs", "lux", "REAL")?;
    ensure_column(conn, "logs", "stable", "INTEGER DEFAULT 1")?;
    Ok(())
}

fn ensure_column(conn: &Connection, table: &str, column: &str, decl: &str) -> AppResult<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    if !names.iter().any(|n| n == column) {
        conn.execute(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"), [])?;
        tracing::info!(table, column, "Added missing database column");
    }
    Ok(())
}

fn row_to_log(row: &rusqlite::Row<'_>) -> rusqlite::Result<LogRow> {
    Ok(LogRow {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        air_temp: row.get(2)?,
        air_humidity: row.get(3)?,
        soil_temp: row.get(4)?,
        soil_raw: row.get(5)?,
        soil_percent: row.get(6)?,
        lux: row.get(7)?,
        stable: row.get::<_, Option<bool>>(8)?.unwrap_or(true),
    })
}
