//! ==============================================================================
//! web.rs - HTTP Control Surface
//! ==============================================================================
//!
//! purpose:
//!     thin json api over the services: loop lifecycle, live sensor reads,
//!     manual relay control, log queries and deletion, soil calibration.
//!     every handler delegates to a service and converts AppError into an
//!     http status plus a json error body.
//!
//! routes:
//!     POST /api/run/start      start the sampling loop (idempotent)
//!     POST /api/run/stop       stop the sampling loop (idempotent)
//!     GET  /api/status         liveness verdict + relay states
//!     POST /api/relay          manual relay command {relay, state}
//!     GET  /api/sensor/read    one timed read of ?channel=
//!     GET  /api/logs           sample history ?limit&since&until
//!     GET  /api/relays/log     relay transition history ?limit
//!     POST /api/logs/delete    {ids:[..]} | {range:"a-b"} | {all:true}
//!     POST /api/calibrate      capture {step: "dry"|"wet"} reference
//!     GET  /api/calibration    current calibration record
//!
//! ==============================================================================

use crate::calibration::{CalibrationStep, CalibrationStore};
use crate::domain::{DeleteRequest, RelayId, SensorChannel};
use crate::error::{AppError, AppResult};
use crate::relay::RelayCoordinator;
use crate::sensors::SensorService;
use crate::store::{LogQuery, Store};
use crate::supervisor::{StartOutcome, StopOutcome, Supervisor};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// handles are cheap clones; every request task gets its own copy
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub coordinator: Arc<RelayCoordinator>,
    pub sensors: Arc<SensorService>,
    pub calibration: Arc<CalibrationStore>,
    pub store: Arc<Store>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::InvalidDeletion(_)
            | AppError::UnknownRelay(_)
            | AppError::UnknownChannel(_)
            | AppError::CalibrationRejected(_)
            | AppError::Config(_) => StatusCode::BAD_REQUEST,
            AppError::Uncalibrated => StatusCode::CONFLICT,
            AppError::SensorTimeout(_) | AppError::SupervisorTimeout(_) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            AppError::SensorRead { .. } | AppError::DriverActuation { .. } => {
                StatusCode::BAD_GATEWAY
            }
            AppError::Db(_) | AppError::Io(_) | AppError::Json(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

pub fn router(app: AppState) -> Router {
    Router::new()
        .route("/api/run/start", post(run_start))
        .route("/api/run/stop", post(run_stop))
        .route("/api/status", get(run_status))
        .route("/api/relay", post(relay_set))
        .route("/api/sensor/read", get(sensor_read))
        .route("/api/logs", get(logs_list))
        .route("/api/relays/log", get(relay_log))
        .route("/api/logs/delete", post(logs_delete))
        .route("/api/calibrate", post(calibrate_capture))
        .route("/api/calibration", get(calibration_current))
        .layer(CorsLayer::permissive())
        .with_state(app)
}

pub async fn run_server(app: AppState, bind: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(%bind, "Control api listening");
    axum::serve(listener, router(app)).await?;
    Ok(())
}

// ==============================================================================
// lifecycle
// ==============================================================================

async fn run_start(State(app): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let outcome = app.supervisor.start().await?;
    Ok(Json(serde_json::json!({
        "running": true,
        "started": outcome == StartOutcome::Started,
    })))
}

async fn run_stop(State(app): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let outcome = app.supervisor.stop().await?;
    Ok(Json(serde_json::json!({
        "running": false,
        "was_running": outcome != StopOutcome::WasNotRunning,
        "forced": outcome == StopOutcome::Forced,
    })))
}

async fn run_status(State(app): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let (record, live) = app.supervisor.liveness()?;
    let status_text = if live {
        "running"
    } else if record.running {
        // record claims running but the heartbeat aged out
        "stale"
    } else {
        "stopped"
    };
    let relays = app.coordinator.snapshot().await;
    Ok(Json(serde_json::json!({
        "status_text": status_text,
        "running": live,
        "last_heartbeat": record.last_heartbeat,
        "owner_token": record.owner_token,
        "relays": relays,
    })))
}

// ==============================================================================
// relays
// ==============================================================================

#[derive(Deserialize)]
struct RelayBody {
    relay: String,
    state: bool,
}

async fn relay_set(
    State(app): State<AppState>,
    Json(body): Json<RelayBody>,
) -> AppResult<Json<serde_json::Value>> {
    let relay = RelayId::parse(&body.relay)?;
    let event = app.coordinator.manual_set(relay, body.state).await?;
    Ok(Json(serde_json::json!({
        "relay": relay.as_str(),
        "applied": body.state,
        "changed": event.is_some(),
    })))
}

#[derive(Deserialize)]
struct RelayLogParams {
    limit: Option<u32>,
}

async fn relay_log(
    State(app): State<AppState>,
    Query(params): Query<RelayLogParams>,
) -> AppResult<Json<serde_json::Value>> {
    let events = app.store.relay_history(params.limit.unwrap_or(50))?;
    Ok(Json(serde_json::json!({ "events": events })))
}

// ==============================================================================
// sensors & calibration
// ==============================================================================

#[derive(Deserialize)]
struct SensorReadParams {
    channel: String,
}

async fn sensor_read(
    State(app): State<AppState>,
    Query(params): Query<SensorReadParams>,
) -> AppResult<Json<serde_json::Value>> {
    let channel = SensorChannel::parse(&params.channel)?;
    let value = app.sensors.read_channel(channel).await?;
    Ok(Json(serde_json::json!({
        "channel": channel.as_str(),
        "value": value,
    })))
}

#[derive(Deserialize)]
struct CalibrateBody {
    step: CalibrationStep,
}

async fn calibrate_capture(
    State(app): State<AppState>,
    Json(body): Json<CalibrateBody>,
) -> AppResult<Json<serde_json::Value>> {
    // one timed read; the operator holds the probe in the reference medium
    let raw = app.sensors.read_soil_raw().await?;
    let data = app.calibration.capture(body.step, raw)?;
    Ok(Json(serde_json::json!({
        "captured": body.step,
        "raw": raw,
        "calibration": data,
        "complete": data.is_complete(),
    })))
}

async fn calibration_current(State(app): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let data = app.calibration.current();
    Ok(Json(serde_json::json!({
        "calibration": data,
        "complete": data.is_complete(),
    })))
}

// ==============================================================================
// sample logs
// ==============================================================================

#[derive(Deserialize)]
struct LogsParams {
    limit: Option<u32>,
    since: Option<String>,
    until: Option<String>,
}

async fn logs_list(
    State(app): State<AppState>,
    Query(params): Query<LogsParams>,
) -> AppResult<Json<serde_json::Value>> {
    let query = LogQuery {
        // explicit limit=0 means the whole table
        limit: Some(params.limit.unwrap_or(100)),
        since: params.since,
        until: params.until,
    };
    let rows = app.store.query_logs(&query)?;
    Ok(Json(serde_json::json!({ "rows": rows })))
}

async fn logs_delete(
    State(app): State<AppState>,
    Json(body): Json<DeleteRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let selection = body.into_selection()?;
    let outcome = app.store.delete_logs(selection)?;
    Ok(Json(serde_json::json!({
        "ok": true,
        "deleted": outcome,
    })))
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use crate::domain::SensorChannel;
    use crate::error::AppError;
    use crate::hal::Hal;
    use crate::status::MemoryStatusStore;
    use crate::store::Store;

    struct Fixture {
        app: AppState,
        hal: Hal,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let mut cfg = HostConfig::default();
        cfg.sampling.interval_secs = 300;
        cfg.sampling.read_timeout_ms = 200;
        cfg.sampling.soil_retries = 0;
        cfg.watering.min_on_secs = 0;
        cfg.watering.min_off_secs = 0;
        cfg.watering.manual_cooldown_secs = 0;

        let dir = tempfile::tempdir().unwrap();
        let hal = Hal::new(&cfg);
        let store = Arc::new(Store::open_in_memory().unwrap());
        let sensors = Arc::new(SensorService::new(Arc::new(hal.clone()), &cfg.sampling));
        let calibration = Arc::new(CalibrationStore::open(
            dir.path().join("cal.json"),
            cfg.sensors.min_calibration_spread,
        ));
        let coordinator = Arc::new(RelayCoordinator::new(
            Arc::new(hal.clone()),
            Arc::clone(&store),
            cfg.relays.clone(),
            cfg.watering.clone(),
        ));
        let status = Arc::new(MemoryStatusStore::new());
        let supervisor = Arc::new(Supervisor::new(
            &cfg,
            Arc::clone(&sensors),
            Arc::clone(&calibration),
            Arc::clone(&coordinator),
            Arc::clone(&store),
            status,
        ));
        Fixture {
            app: AppState {
                supervisor,
                coordinator,
                sensors,
                calibration,
                store,
            },
            hal,
            _dir: dir,
        }
    }

    #[test]
    fn errors_map_to_the_documented_status_codes() {
        let cases: Vec<(AppError, StatusCode)> = vec![
            (
                AppError::UnknownRelay("heater".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::InvalidDeletion("empty".into()),
                StatusCode::BAD_REQUEST,
            ),
            (AppError::Uncalibrated, StatusCode::CONFLICT),
            (
                AppError::SensorTimeout(SensorChannel::SoilTemp),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                AppError::DriverActuation {
                    relay: crate::domain::RelayId::Pump,
                    reason: "gpio busy".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                AppError::Db(rusqlite::Error::QueryReturnedNoRows),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[tokio::test]
    async fn lifecycle_endpoints_report_the_liveness_verdict() {
        let f = fixture();

        let started = run_start(State(f.app.clone())).await.unwrap().0;
        assert_eq!(started["running"], true);
        assert_eq!(started["started"], true);

        let again = run_start(State(f.app.clone())).await.unwrap().0;
        assert_eq!(again["started"], false);

        let status = run_status(State(f.app.clone())).await.unwrap().0;
        assert_eq!(status["status_text"], "running");
        assert_eq!(status["running"], true);
        assert!(status["last_heartbeat"].as_u64().unwrap() > 0);

        let stopped = run_stop(State(f.app.clone())).await.unwrap().0;
        assert_eq!(stopped["running"], false);
        assert_eq!(stopped["was_running"], true);
        assert_eq!(stopped["forced"], false);

        let status = run_status(State(f.app.clone())).await.unwrap().0;
        assert_eq!(status["status_text"], "stopped");
    }

    #[tokio::test]
    async fn relay_endpoint_parses_validates_and_reports_change() {
        let f = fixture();

        let resp = relay_set(
            State(f.app.clone()),
            Json(RelayBody {
                relay: "pump".into(),
                state: true,
            }),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(resp["relay"], "pump");
        assert_eq!(resp["applied"], true);
        assert_eq!(resp["changed"], true);
        assert_eq!(f.hal.relay_level(12), Some(true));

        // same command again is a no-op
        let resp = relay_set(
            State(f.app.clone()),
            Json(RelayBody {
                relay: "pump".into(),
                state: true,
            }),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(resp["changed"], false);

        let err = relay_set(
            State(f.app.clone()),
            Json(RelayBody {
                relay: "heater".into(),
                state: true,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn sensor_read_endpoint_resolves_channels() {
        let f = fixture();
        f.hal.set_lux(Some(321.0));

        let resp = sensor_read(
            State(f.app.clone()),
            Query(SensorReadParams {
                channel: "light".into(),
            }),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(resp["channel"], "light");
        assert_eq!(resp["value"], 321.0);

        let err = sensor_read(
            State(f.app.clone()),
            Query(SensorReadParams {
                channel: "wind_speed".into(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn calibrate_endpoint_captures_both_references() {
        let f = fixture();

        f.hal.set_soil_raw(400.0);
        let resp = calibrate_capture(
            State(f.app.clone()),
            Json(CalibrateBody {
                step: CalibrationStep::Dry,
            }),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(resp["raw"], 400.0);
        assert_eq!(resp["complete"], false);

        f.hal.set_soil_raw(100.0);
        let resp = calibrate_capture(
            State(f.app.clone()),
            Json(CalibrateBody {
                step: CalibrationStep::Wet,
            }),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(resp["complete"], true);

        let current = calibration_current(State(f.app.clone())).await.unwrap().0;
        assert_eq!(current["complete"], true);
        assert_eq!(current["calibration"]["dry"], 400.0);
        assert_eq!(current["calibration"]["wet"], 100.0);
    }

    #[tokio::test]
    async fn log_endpoints_default_their_windows() {
        let f = fixture();
        for i in 0..110 {
            f.app
                .store
                .insert_sample(&crate::domain::CycleSample {
                    air_temp: Some(f64::from(i)),
                    ..Default::default()
                })
                .unwrap();
        }

        let resp = logs_list(
            State(f.app.clone()),
            Query(LogsParams {
                limit: None,
                since: None,
                until: None,
            }),
        )
        .await
        .unwrap()
        .0;
        let rows = resp["rows"].as_array().unwrap();
        assert_eq!(rows.len(), 100, "default window is the newest 100");
        assert_eq!(rows[0]["id"], 11, "window starts at the oldest kept row");

        let resp = logs_list(
            State(f.app.clone()),
            Query(LogsParams {
                limit: Some(0),
                since: None,
                until: None,
            }),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(resp["rows"].as_array().unwrap().len(), 110);
    }

    #[tokio::test]
    async fn delete_endpoint_reports_count_or_all() {
        let f = fixture();
        for _ in 0..3 {
            f.app
                .store
                .insert_sample(&crate::domain::CycleSample::default())
                .unwrap();
        }

        let resp = logs_delete(
            State(f.app.clone()),
            Json(DeleteRequest {
                ids: Some(vec![2]),
                range: None,
                all: None,
            }),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(resp["deleted"], 1);

        let resp = logs_delete(
            State(f.app.clone()),
            Json(DeleteRequest {
                ids: None,
                range: None,
                all: Some(true),
            }),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(resp["deleted"], "all");

        let err = logs_delete(
            State(f.app.clone()),
            Json(DeleteRequest {
                ids: None,
                range: None,
                all: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
