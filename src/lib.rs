//! Plantwatch host library.
//!
//! Exposes the services behind the binary so integration tests can wire
//! them together against the mock HAL. Real Raspberry Pi hardware access
//! is guarded by the `hardware` feature inside `hal`.

pub mod calibration;
pub mod config;
pub mod domain;
pub mod error;
pub mod hal;
pub mod looper;
pub mod relay;
pub mod sensors;
pub mod status;
pub mod store;
pub mod supervisor;
pub mod web;
