//! Prelude module for common re-exports.
//!
//! Convenient re-exports of the most commonly used types so that
//! consumers can do `use crossway_common::prelude::*;` without listing
//! individual paths.

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, SimConfig};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{NUM_LANES, NUM_QUADRANTS};

// ─── Vocabulary ─────────────────────────────────────────────────────
pub use crate::types::{
    AccessStrategy, LaneId, LaneState, Movement, Quadrants, SchedulingPolicy, SimTime, VehicleId,
};
