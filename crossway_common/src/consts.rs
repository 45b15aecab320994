//! System-wide constants for the Crossway workspace.
//!
//! Single source of truth for all numeric limits and defaults.
//! Imported by all crates — no duplication permitted.

/// Number of approaches (lanes) to the intersection.
pub const NUM_LANES: usize = 4;

/// Number of intersection quadrants (unit resources).
pub const NUM_QUADRANTS: usize = 4;

/// Default per-lane vehicle queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 20;

/// Hard upper bound on per-lane queue capacity (backing array size).
pub const QUEUE_CAPACITY_LIMIT: usize = 64;

/// Default scheduler time quantum [s].
pub const DEFAULT_TIME_QUANTUM_S: u64 = 3;

/// Artificial context-switch delay [ms].
pub const CONTEXT_SWITCH_DELAY_MS: u64 = 500;

/// Nominal time for one vehicle to cross the intersection [s].
pub const VEHICLE_CROSS_TIME_S: u64 = 3;

/// Default simulation duration [s].
pub const DEFAULT_SIMULATION_DURATION_S: u64 = 200;

/// Default minimum vehicle inter-arrival time [s].
pub const DEFAULT_MIN_ARRIVAL_S: u64 = 1;

/// Default maximum vehicle inter-arrival time [s].
pub const DEFAULT_MAX_ARRIVAL_S: u64 = 3;

/// Execution-history ring capacity [records].
pub const HISTORY_CAPACITY: usize = 1024;

/// Driver tick interval [ms].
pub const SIMULATION_UPDATE_INTERVAL_MS: u64 = 300;

/// Retry interval for timed crossing acquisition [ms].
pub const ACQUIRE_RETRY_INTERVAL_MS: u64 = 100;

/// Default timeout for timed crossing acquisition [s].
pub const DEFAULT_ACQUIRE_TIMEOUT_S: u64 = 5;

/// Priority value reserved for emergency-overridden lanes.
pub const EMERGENCY_PRIORITY: u8 = 1;

/// Priority value assigned to lanes at construction.
pub const DEFAULT_LANE_PRIORITY: u8 = 2;

/// Blocked/contending lane count at which a deadlock is declared.
pub const DEADLOCK_LANE_THRESHOLD: usize = 3;

// ─── Multilevel feedback queue ──────────────────────────────────────

/// Lane waiting time that earns a one-level promotion [s].
pub const MLFQ_PROMOTION_THRESHOLD_S: u64 = 10;

/// Time in the current level that forces promotion to HIGH [s].
pub const MLFQ_AGING_THRESHOLD_S: u64 = 15;

/// Consecutive running observations that earn a demotion.
pub const MLFQ_DEMOTION_THRESHOLD_RUNS: u32 = 5;

/// Per-level time quanta, HIGH → LOW [s].
pub const MLFQ_LEVEL_QUANTA_S: [u64; 3] = [2, 4, 6];

// ─── Priority round robin ───────────────────────────────────────────

/// Standard round-robin time quantum [s].
pub const RR_TIME_QUANTUM_S: u64 = 3;

/// Queue length above which a lane is classed as NORMAL rather than LOW.
pub const RR_NORMAL_QUEUE_THRESHOLD: usize = 3;

/// Idle time after which a LOW lane is boosted to NORMAL [s].
pub const RR_FAIRNESS_BOOST_S: u64 = 30;

/// Average ready-queue length above which the adaptive quantum tightens.
pub const RR_HEAVY_LOAD_QUEUE_LEN: f64 = 8.0;

/// Average ready-queue length below which the adaptive quantum loosens.
pub const RR_LIGHT_LOAD_QUEUE_LEN: f64 = 2.0;

/// Adaptive quantum under heavy load [s].
pub const RR_HEAVY_LOAD_QUANTUM_S: u64 = 2;

/// Adaptive quantum under light load [s].
pub const RR_LIGHT_LOAD_QUANTUM_S: u64 = 4;

// ─── Emergency subsystem ────────────────────────────────────────────

/// Default emergency draw odds: one detection per N scheduling ticks.
pub const DEFAULT_EMERGENCY_DRAW_ODDS: u32 = 200;

/// Emergency approach-time sampling range [s].
pub const EMERGENCY_APPROACH_RANGE_S: (u64, u64) = (5, 15);

/// Emergency crossing-duration sampling range [s].
pub const EMERGENCY_CROSSING_RANGE_S: (u64, u64) = (3, 6);
