//! PPM Core - Geofence Filter Engine for Connected-Vehicle Telemetry
//!
//! The decision-making half of the Privacy Protection Module:
//! 1. **Geometry**: great-circle distance, corridor tests, closed lat/lon boxes
//! 2. **Shapes**: circles, road-edge corridors, and grid cells from a mapfile
//! 3. **Quadtree**: an arena-backed spatial index over the shape catalog
//! 4. **BSM**: parse, inspect, redact, and re-emit Basic Safety Messages
//! 5. **Filter**: the retain / suppress / redact policy over all of the above
//!
//! The pipeline engine that drives these against a message bus lives in
//! the `ppm` binary crate; the bus abstraction lives in `ppm_env`.

pub mod bsm;
pub mod config;
pub mod filter;
pub mod geo;
pub mod quad;
pub mod shapes;

// Re-export key types for convenience
pub use bsm::{Bsm, ParseError};
pub use config::{ConfigError, KvConfig, OffsetSpec, Overrides, PolicyConfig};
pub use filter::{Decision, FilterPolicy, SuppressReason};
pub use geo::{haversine_m, BoundingBox, Point};
pub use quad::{QuadError, QuadStats, Quadtree, FANOUT, MAX_DEPTH};
pub use shapes::{read_mapfile, Shape, ShapeError, WayType};
