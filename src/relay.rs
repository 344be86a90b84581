//! ==============================================================================
//! relay.rs - Relay Coordinator
//! ==============================================================================
//!
//! purpose:
//!     single owner of the relay outputs. every transition, automatic or
//!     manual, passes through here: one driver write, one persisted event,
//!     one update of the last-known-applied state.
//!
//! control rules:
//!     - hysteresis on the pump: ON at/below the low watermark, OFF at/above
//!       the high one, no change inside the dead band.
//!     - min-on / min-off guard intervals defer automatic flips only.
//!     - a manual pump command bypasses the guards and suppresses automatic
//!       control for the cool-down window, even when it changed nothing.
//!     - a refused driver write keeps the last applied state and is recorded
//!       with a "-failed" action so the history shows the attempt.
//!     - the applied state always follows the hardware: a store failure can
//!       lose an event, never the bookkeeping of a write that happened.
//!
//! ==============================================================================

use crate::config::{RelaysConfig, WateringConfig};
use crate::domain::{RelayEvent, RelayId, RelaySource};
use crate::error::{AppError, AppResult};
use crate::hal::RelayDriver;
use crate::store::Store;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// What one automatic control pass did.
#[derive(Debug)]
pub enum AutoOutcome {
    /// automatic watering disabled in config
    Disabled,
    /// a recent manual pump command still suppresses automatic control
    Suppressed,
    /// reading sits in the dead band, or the pump is already where
    /// hysteresis wants it
    Hold,
    /// a flip is wanted but a guard interval defers it to a later cycle
    Deferred,
    /// transition applied and recorded
    Switched(RelayEvent),
}

/// Applied relay states, as reported on the control surface.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RelaySnapshot {
    pub pump: bool,
    pub aux: bool,
}

struct CoordinatorState {
    applied: HashMap<RelayId, bool>,
    /// pump guard/cool-down bookkeeping
    last_on: Option<Instant>,
    last_off: Option<Instant>,
    last_manual: Option<Instant>,
}

pub struct RelayCoordinator {
    driver: Arc<dyn RelayDriver>,
    store: Arc<Store>,
    relays: RelaysConfig,
    watering: WateringConfig,
    state: Mutex<CoordinatorState>,
}

impl RelayCoordinator {
    pub fn new(
        driver: Arc<dyn RelayDriver>,
        store: Arc<Store>,
        relays: RelaysConfig,
        watering: WateringConfig,
    ) -> Self {
        Self {
            driver,
            store,
            relays,
            watering,
            state: Mutex::new(CoordinatorState {
                applied: HashMap::new(),
                last_on: None,
                last_off: None,
                last_manual: None,
            }),
        }
    }

    fn pin_of(&self, relay: RelayId) -> u8 {
        match relay {
            RelayId::Pump => self.relays.pump_pin,
            RelayId::Aux => self.relays.aux_pin,
        }
    }

    /// Drive every relay to OFF so the applied map starts true to the
    /// hardware. No events are recorded; this is setup, not a transition.
    pub async fn initialize(&self) -> AppResult<()> {
        let mut st = self.state.lock().await;
        for relay in RelayId::ALL {
            let pin = self.pin_of(relay);
            let driver = Arc::clone(&self.driver);
            tokio::task::spawn_blocking(move || driver.write_relay(pin, false))
                .await
                .map_err(|e| AppError::DriverActuation {
                    relay,
                    reason: e.to_string(),
                })?
                .map_err(|e| AppError::DriverActuation {
                    relay,
                    reason: e.to_string(),
                })?;
            st.applied.insert(relay, false);
        }
        tracing::info!("Relays initialized to OFF");
        Ok(())
    }

    /// Manual command from the control surface. Returns None when the relay
    /// already sat in the requested state; a pump command arms the cool-down
    /// either way.
    pub async fn manual_set(&self, relay: RelayId, on: bool) -> AppResult<Option<RelayEvent>> {
        let mut st = self.state.lock().await;
        if relay == RelayId::Pump {
            st.last_manual = Some(Instant::now());
        }
        if st.applied.get(&relay).copied().unwrap_or(false) == on {
            tracing::debug!(%relay, on, "Manual request matches applied state");
            return Ok(None);
        }
        self.apply(&mut st, relay, on, RelaySource::Manual)
            .await
            .map(Some)
    }

    /// One automatic control pass over the pump, fed with the soil percent
    /// of a settled reading.
    pub async fn auto_decide(&self, soil_percent: f64) -> AppResult<AutoOutcome> {
        if !self.watering.auto_enabled {
            return Ok(AutoOutcome::Disabled);
        }
        let mut st = self.state.lock().await;
        let now = Instant::now();

        if let Some(t) = st.last_manual {
            let cooldown = Duration::from_secs(self.watering.manual_cooldown_secs);
            if now.duration_since(t) < cooldown {
                tracing::debug!("Manual cool-down active, skipping automatic control");
                return Ok(AutoOutcome::Suppressed);
            }
        }

        let applied = st.applied.get(&RelayId::Pump).copied().unwrap_or(false);
        let desired = if soil_percent <= self.watering.low_watermark_percent {
            true
        } else if soil_percent >= self.watering.high_watermark_percent {
            false
        } else {
            applied
        };
        if desired == applied {
            return Ok(AutoOutcome::Hold);
        }

        let guard_ok = if desired {
            elapsed_at_least(st.last_off, now, self.watering.min_off_secs)
        } else {
            elapsed_at_least(st.last_on, now, self.watering.min_on_secs)
        };
        if !guard_ok {
            tracing::info!(
                soil_percent,
                desired,
                "Hysteresis wants a pump flip but a guard interval defers it"
            );
            return Ok(AutoOutcome::Deferred);
        }

        let event = self
            .apply(&mut st, RelayId::Pump, desired, RelaySource::Auto)
            .await?;
        Ok(AutoOutcome::Switched(event))
    }

    pub async fn snapshot(&self) -> RelaySnapshot {
        let st = self.state.lock().await;
        RelaySnapshot {
            pump: st.applied.get(&RelayId::Pump).copied().unwrap_or(false),
            aux: st.applied.get(&RelayId::Aux).copied().unwrap_or(false),
        }
    }

    /// The one place a relay is actually written. Caller holds the state
    /// lock, so transitions are serialized.
    async fn apply(
        &self,
        st: &mut CoordinatorState,
        relay: RelayId,
        on: bool,
        source: RelaySource,
    ) -> AppResult<RelayEvent> {
        let pin = self.pin_of(relay);
        let driver = Arc::clone(&self.driver);
        let result = match tokio::task::spawn_blocking(move || driver.write_relay(pin, on)).await {
            Ok(r) => r,
            Err(join_err) => Err(anyhow::anyhow!(join_err)),
        };

        let base = if on { "on" } else { "off" };
        match result {
            Ok(()) => {
                // the relay physically moved; the applied map and the guard
                // clocks must record that before the event insert, which can
                // still fail
                st.applied.insert(relay, on);
                if relay == RelayId::Pump {
                    if on {
                        st.last_on = Some(Instant::now());
                    } else {
                        st.last_off = Some(Instant::now());
                    }
                }
                tracing::info!(%relay, state = base, %source, "Relay switched");
                match self.store.record_relay(relay, base, source) {
                    Ok(event) => Ok(event),
                    Err(e) => {
                        tracing::error!(%relay, error = %e, "Relay switched but its event was not persisted");
                        Err(e)
                    }
                }
            }
            Err(e) => {
                // the "-failed" event is best effort; the caller gets the
                // actuation error either way
                let action = format!("{base}-failed");
                if let Err(log_err) = self.store.record_relay(relay, &action, source) {
                    tracing::warn!(%relay, error = %log_err, "Could not persist the failed actuation event");
                }
                tracing::error!(%relay, error = %e, "Relay write refused, keeping last applied state");
                Err(AppError::DriverActuation {
                    relay,
                    reason: e.to_string(),
                })
            }
        }
    }
}

fn elapsed_at_least(since: Option<Instant>, now: Instant, secs: u64) -> bool {
    match since {
        // no history yet (boot state), nothing to guard against
        None => true,
        Some(t) => now.duration_since(t) >= Duration::from_secs(secs),
    }
}
