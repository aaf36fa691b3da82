//! PPM - Privacy Protection Module
//!
//! A one-way privacy filter for connected-vehicle telemetry: consume
//! Basic Safety Messages from one bus topic, apply the geofence and
//! redaction policy from `ppm_core`, and republish the survivors.
//!
//! This crate holds the pieces the binary is assembled from:
//! - [`engine`]: the long-lived consume → filter → produce loop
//! - [`logging`]: file-sink logger construction and verbosity mapping

pub mod engine;
pub mod logging;

pub use engine::{Counters, Engine, RECONNECT_PAUSE};
pub use logging::{LogError, LogSettings};
