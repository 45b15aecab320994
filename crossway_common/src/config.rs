//! Configuration loading and validation.
//!
//! Loads the optional `crossway.toml` simulation configuration with strict
//! (`deny_unknown_fields`) parsing, serde-supplied defaults, and
//! bounds-checked semantic validation. CLI flags override file values in
//! the driver binary; every section also works standalone with defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::{
    DEFAULT_ACQUIRE_TIMEOUT_S, DEFAULT_EMERGENCY_DRAW_ODDS, DEFAULT_MAX_ARRIVAL_S,
    DEFAULT_MIN_ARRIVAL_S, DEFAULT_QUEUE_CAPACITY, DEFAULT_SIMULATION_DURATION_S,
    DEFAULT_TIME_QUANTUM_S, CONTEXT_SWITCH_DELAY_MS, QUEUE_CAPACITY_LIMIT,
};
use crate::types::{AccessStrategy, SchedulingPolicy};

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Unknown field in TOML (strict parsing with `deny_unknown_fields`).
    #[error("Unknown field: {0}")]
    UnknownField(String),
}

// ─── [simulation] ───────────────────────────────────────────────────

fn default_duration_s() -> u64 {
    DEFAULT_SIMULATION_DURATION_S
}
fn default_min_arrival_s() -> u64 {
    DEFAULT_MIN_ARRIVAL_S
}
fn default_max_arrival_s() -> u64 {
    DEFAULT_MAX_ARRIVAL_S
}
fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

/// Simulation-run parameters (`[simulation]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationConfig {
    /// Total run duration [s] (1..=86_400).
    #[serde(default = "default_duration_s")]
    pub duration_s: u64,
    /// Minimum vehicle inter-arrival time [s].
    #[serde(default = "default_min_arrival_s")]
    pub min_arrival_s: u64,
    /// Maximum vehicle inter-arrival time [s].
    #[serde(default = "default_max_arrival_s")]
    pub max_arrival_s: u64,
    /// Per-lane vehicle queue capacity (1..=QUEUE_CAPACITY_LIMIT).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// RNG seed for reproducible runs (random when absent).
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            duration_s: default_duration_s(),
            min_arrival_s: default_min_arrival_s(),
            max_arrival_s: default_max_arrival_s(),
            queue_capacity: default_queue_capacity(),
            seed: None,
        }
    }
}

impl SimulationConfig {
    /// Validate all fields against allowed bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=86_400).contains(&self.duration_s) {
            return Err(ConfigError::ValidationError(format!(
                "simulation.duration_s={} out of range [1, 86400]",
                self.duration_s
            )));
        }
        if self.min_arrival_s == 0 {
            return Err(ConfigError::ValidationError(
                "simulation.min_arrival_s must be >= 1".to_string(),
            ));
        }
        if self.max_arrival_s < self.min_arrival_s {
            return Err(ConfigError::ValidationError(format!(
                "simulation.max_arrival_s={} must be >= min_arrival_s={}",
                self.max_arrival_s, self.min_arrival_s
            )));
        }
        if !(1..=QUEUE_CAPACITY_LIMIT).contains(&self.queue_capacity) {
            return Err(ConfigError::ValidationError(format!(
                "simulation.queue_capacity={} out of range [1, {QUEUE_CAPACITY_LIMIT}]",
                self.queue_capacity
            )));
        }
        Ok(())
    }
}

// ─── [scheduler] ────────────────────────────────────────────────────

fn default_time_quantum_s() -> u64 {
    DEFAULT_TIME_QUANTUM_S
}
fn default_context_switch_ms() -> u64 {
    CONTEXT_SWITCH_DELAY_MS
}

/// Scheduler parameters (`[scheduler]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Lane-selection policy: `"sjf"`, `"mlfq"`, or `"prr"`.
    #[serde(default)]
    pub algorithm: SchedulingPolicy,
    /// Base time quantum [s] (1..=30).
    #[serde(default = "default_time_quantum_s")]
    pub time_quantum_s: u64,
    /// Artificial context-switch delay [ms] (0..=5_000).
    #[serde(default = "default_context_switch_ms")]
    pub context_switch_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            algorithm: SchedulingPolicy::default(),
            time_quantum_s: default_time_quantum_s(),
            context_switch_ms: default_context_switch_ms(),
        }
    }
}

impl SchedulerConfig {
    /// Validate all fields against allowed bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=30).contains(&self.time_quantum_s) {
            return Err(ConfigError::ValidationError(format!(
                "scheduler.time_quantum_s={} out of range [1, 30]",
                self.time_quantum_s
            )));
        }
        if self.context_switch_ms > 5_000 {
            return Err(ConfigError::ValidationError(format!(
                "scheduler.context_switch_ms={} out of range [0, 5000]",
                self.context_switch_ms
            )));
        }
        Ok(())
    }
}

// ─── [intersection] ─────────────────────────────────────────────────

fn default_acquire_timeout_s() -> u64 {
    DEFAULT_ACQUIRE_TIMEOUT_S
}

/// Crossing-grant parameters (`[intersection]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IntersectionConfig {
    /// Grant strategy: `"fifo"`, `"bankers"`, or `"hybrid"`.
    #[serde(default)]
    pub strategy: AccessStrategy,
    /// Timed-acquisition timeout [s] (1..=60).
    #[serde(default = "default_acquire_timeout_s")]
    pub acquire_timeout_s: u64,
}

impl Default for IntersectionConfig {
    fn default() -> Self {
        Self {
            strategy: AccessStrategy::default(),
            acquire_timeout_s: default_acquire_timeout_s(),
        }
    }
}

impl IntersectionConfig {
    /// Validate all fields against allowed bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=60).contains(&self.acquire_timeout_s) {
            return Err(ConfigError::ValidationError(format!(
                "intersection.acquire_timeout_s={} out of range [1, 60]",
                self.acquire_timeout_s
            )));
        }
        Ok(())
    }
}

// ─── [emergency] ────────────────────────────────────────────────────

fn default_preempt_enabled() -> bool {
    true
}
fn default_auto_detect() -> bool {
    true
}
fn default_draw_odds() -> u32 {
    DEFAULT_EMERGENCY_DRAW_ODDS
}

/// Emergency-subsystem parameters (`[emergency]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmergencyConfig {
    /// Whether an emergency may forcibly clear the intersection.
    #[serde(default = "default_preempt_enabled")]
    pub preempt_enabled: bool,
    /// Whether random detection draws run each tick (manual injection
    /// still works when disabled).
    #[serde(default = "default_auto_detect")]
    pub auto_detect: bool,
    /// Detection odds: one draw in N per scheduling tick (2..=1_000_000).
    #[serde(default = "default_draw_odds")]
    pub draw_odds: u32,
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            preempt_enabled: default_preempt_enabled(),
            auto_detect: default_auto_detect(),
            draw_odds: default_draw_odds(),
        }
    }
}

impl EmergencyConfig {
    /// Validate all fields against allowed bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(2..=1_000_000).contains(&self.draw_odds) {
            return Err(ConfigError::ValidationError(format!(
                "emergency.draw_odds={} out of range [2, 1000000]",
                self.draw_odds
            )));
        }
        Ok(())
    }
}

// ─── SimConfig ──────────────────────────────────────────────────────

/// Top-level simulation configuration — loaded from `crossway.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimConfig {
    /// Simulation-run parameters.
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Scheduler parameters.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Crossing-grant parameters.
    #[serde(default)]
    pub intersection: IntersectionConfig,
    /// Emergency-subsystem parameters.
    #[serde(default)]
    pub emergency: EmergencyConfig,
}

impl SimConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.simulation.validate()?;
        self.scheduler.validate()?;
        self.intersection.validate()?;
        self.emergency.validate()?;
        Ok(())
    }
}

/// Load and validate a configuration file.
///
/// # Errors
///
/// Returns `ConfigError::FileNotFound` if the file does not exist,
/// `ParseError`/`UnknownField` for TOML problems, and
/// `ValidationError` for out-of-bounds values.
pub fn load_config_file(path: &Path) -> Result<SimConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound
        } else {
            ConfigError::ParseError(format!("{}: {}", path.display(), e))
        }
    })?;

    let config: SimConfig = toml::from_str(&content).map_err(|e| {
        let msg = e.to_string();
        if msg.contains("unknown field") {
            ConfigError::UnknownField(format!("{}: {}", path.display(), msg))
        } else {
            ConfigError::ParseError(format!("{}: {}", path.display(), msg))
        }
    })?;

    config.validate()?;
    Ok(config)
}
