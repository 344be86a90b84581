//! ==============================================================================
//! main.rs - plantwatch host entry point
//! ==============================================================================
//!
//! purpose:
//!     boots the plant micro-environment host: reads sensors on a schedule,
//!     waters by soil-moisture hysteresis, and serves a small json control
//!     api for manual operation, history and calibration.
//!
//! responsibilities:
//!     - load configuration (config/plantwatch.toml, defaults otherwise)
//!     - build the hardware abstraction (mock HAL, or rppal with --features hardware)
//!     - open the sqlite store and the calibration / run-status files
//!     - force both relays off before anything else runs
//!     - start the control api, optionally autostart the sampling loop
//!     - stop the loop cleanly on ctrl-c
//!
//! relationships:
//!     - uses: supervisor.rs (loop lifecycle), looper.rs (sampling cycle)
//!     - uses: relay.rs (hysteresis + guards), sensors.rs (timed reads)
//!     - uses: store.rs (sqlite), calibration.rs, status.rs (json files)
//!     - serves: web.rs (axum control surface)
//!
//! architecture:
//!
//!     ┌─────────────────────────────────────────────────────────────┐
//!     │                     plantwatch host                         │
//!     │  ┌──────────────┐   ┌─────────────┐   ┌─────────────────┐   │
//!     │  │ sampling loop │   │ control api │   │ relay coordinator│  │
//!     │  │ (supervised)  │   │ (axum/json) │   │ (hysteresis)     │  │
//!     │  └──────┬───────┘   └──────┬──────┘   └────────┬────────┘   │
//!     │         │                 │                    │            │
//!     │         └────────┬────────┴──────────┬─────────┘            │
//!     │                  │                   │                      │
//!     │            ┌─────┴─────┐       ┌─────┴─────┐                │
//!     │            │  sensors  │       │   store   │                │
//!     │            │ (timed)   │       │ (sqlite)  │                │
//!     │            └─────┬─────┘       └───────────┘                │
//!     └──────────────────┼─────────────────────────────────────────┘
//!                        │ HAL trait boundary
//!              ┌─────────┴─────────┐
//!              ▼                   ▼
//!       ┌─────────────┐     ┌─────────────┐
//!       │  mock HAL   │     │ rppal (Pi)  │
//!       │ (dev/tests) │     │ gpio + i2c  │
//!       └─────────────┘     └─────────────┘
//!
//! ==============================================================================

use anyhow::Result;
use plantwatch::calibration::CalibrationStore;
use plantwatch::config::HostConfig;
use plantwatch::hal::Hal;
use plantwatch::relay::RelayCoordinator;
use plantwatch::sensors::SensorService;
use plantwatch::status::{FileStatusStore, StatusStore};
use plantwatch::store::Store;
use plantwatch::supervisor::Supervisor;
use plantwatch::web::{self, AppState};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // startup banner
    println!("===========================================================");
    println!("  Plantwatch - Plant Micro-environment Host");
    println!("  \"Sense, Decide, Water\"");
    println!("===========================================================");

    // step 1: load configuration
    let config = HostConfig::load_or_default();
    init_tracing(&config.logging.level);
    config.print_summary();

    // step 2: open the persistence layer
    println!("\n[STARTUP] Opening stores...");
    let store = Arc::new(Store::open(&config.paths.db_file)?);
    let calibration = Arc::new(CalibrationStore::open(
        &config.paths.calibration_file,
        config.sensors.min_calibration_spread,
    ));
    let status: Arc<dyn StatusStore> = Arc::new(FileStatusStore::new(&config.paths.status_file));
    println!("[STARTUP] ✓ Database ready at {}", config.paths.db_file);

    // step 3: build the hardware stack
    let hal = Hal::new(&config);
    let sensors = Arc::new(SensorService::new(Arc::new(hal.clone()), &config.sampling));
    let coordinator = Arc::new(RelayCoordinator::new(
        Arc::new(hal),
        Arc::clone(&store),
        config.relays.clone(),
        config.watering.clone(),
    ));

    // relays come up in an undefined state; force both off before anything
    // else is allowed to touch them
    coordinator.initialize().await?;
    println!("[STARTUP] ✓ Relays forced off (pump gpio{}, aux gpio{})",
        config.relays.pump_pin, config.relays.aux_pin);

    // step 4: loop supervisor
    let supervisor = Arc::new(Supervisor::new(
        &config,
        Arc::clone(&sensors),
        Arc::clone(&calibration),
        Arc::clone(&coordinator),
        Arc::clone(&store),
        status,
    ));

    if config.supervisor.autostart {
        match supervisor.start().await {
            Ok(_) => println!("[STARTUP] ✓ Sampling loop running"),
            Err(e) => eprintln!("[ERROR] Autostart failed: {e}"),
        }
    }

    // step 5: control api in background
    let app = AppState {
        supervisor: Arc::clone(&supervisor),
        coordinator,
        sensors,
        calibration,
        store,
    };
    let bind = config.http.bind.clone();
    tokio::spawn(async move {
        println!("[STARTUP] ✓ Control api live at http://{bind}");
        if let Err(e) = web::run_server(app, &bind).await {
            eprintln!("[ERROR] Web server error: {e}");
        }
    });

    // step 6: run until ctrl-c, then wind the loop down
    tokio::signal::ctrl_c().await?;
    println!("\n[SHUTDOWN] Stopping sampling loop...");
    supervisor.stop().await?;
    println!("[SHUTDOWN] Done");
    Ok(())
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}
