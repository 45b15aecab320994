//! Performance metrics aggregation.
//!
//! Throughput, waiting times, utilization, Jain fairness, and the
//! system counters, maintained under the global-state mutex. All writes
//! come from the simulation thread; UI readers snapshot with try-lock
//! and skip the frame on contention.

use std::time::Duration;

use parking_lot::Mutex;

use crossway_common::consts::NUM_LANES;
use crossway_common::types::{LaneId, SimTime};

#[derive(Debug)]
struct MetricsCore {
    total_vehicles_processed: u64,
    lane_throughput: [u64; NUM_LANES],
    lane_wait_totals: [Duration; NUM_LANES],
    context_switches: u64,
    queue_overflows: u64,
    emergencies_handled: u64,
    total_emergency_response: Duration,
    deadlock_resets: u64,
    expected_arrival_interval: Duration,
}

impl MetricsCore {
    fn new(expected_arrival_interval: Duration) -> Self {
        Self {
            total_vehicles_processed: 0,
            lane_throughput: [0; NUM_LANES],
            lane_wait_totals: [Duration::ZERO; NUM_LANES],
            context_switches: 0,
            queue_overflows: 0,
            emergencies_handled: 0,
            total_emergency_response: Duration::ZERO,
            deadlock_resets: 0,
            expected_arrival_interval,
        }
    }
}

/// The metrics aggregator behind the global-state mutex.
#[derive(Debug)]
pub struct Metrics {
    core: Mutex<MetricsCore>,
}

impl Metrics {
    /// Create a zeroed aggregator.
    ///
    /// `expected_arrival_interval` is the mean vehicle inter-arrival
    /// time, used as the utilization denominator.
    pub fn new(expected_arrival_interval: Duration) -> Self {
        Self {
            core: Mutex::new(MetricsCore::new(expected_arrival_interval)),
        }
    }

    /// Charge one served vehicle and its waiting time to a lane.
    pub fn record_vehicle(&self, lane: LaneId, wait: Duration) {
        let mut core = self.core.lock();
        core.total_vehicles_processed += 1;
        core.lane_throughput[lane.index()] += 1;
        core.lane_wait_totals[lane.index()] += wait;
    }

    /// Count a context switch.
    pub fn record_context_switch(&self) {
        self.core.lock().context_switches += 1;
    }

    /// Count a rejected arrival.
    pub fn record_overflow(&self) {
        self.core.lock().queue_overflows += 1;
    }

    /// Fold one handled emergency into the running statistics.
    pub fn record_emergency(&self, response_time: Duration) {
        let mut core = self.core.lock();
        core.emergencies_handled += 1;
        core.total_emergency_response += response_time;
    }

    /// Count a last-resort deadlock reset.
    pub fn record_deadlock_reset(&self) {
        self.core.lock().deadlock_resets += 1;
    }

    /// Derive the full report at simulation time `now`.
    ///
    /// `deadlocks_prevented` comes from the Banker's state, which owns
    /// that counter.
    pub fn report(&self, now: SimTime, deadlocks_prevented: u64) -> MetricsReport {
        let core = self.core.lock();
        build_report(&core, now, deadlocks_prevented)
    }

    /// Non-blocking report for UI readers; `None` on contention.
    pub fn try_report(&self, now: SimTime, deadlocks_prevented: u64) -> Option<MetricsReport> {
        let core = self.core.try_lock()?;
        Some(build_report(&core, now, deadlocks_prevented))
    }

    /// Zero every counter, preserving the arrival-interval setting.
    pub fn reset(&self) {
        let mut core = self.core.lock();
        let interval = core.expected_arrival_interval;
        *core = MetricsCore::new(interval);
    }
}

fn build_report(core: &MetricsCore, now: SimTime, deadlocks_prevented: u64) -> MetricsReport {
    let elapsed_minutes = now.as_secs_f64() / 60.0;
    let vehicles_per_minute = if elapsed_minutes > 0.0 {
        core.total_vehicles_processed as f64 / elapsed_minutes
    } else {
        0.0
    };

    // Average wait: mean of per-lane averages over lanes that served
    // at least one vehicle.
    let mut wait_sum = 0.0;
    let mut active_lanes = 0usize;
    for lane in 0..NUM_LANES {
        if core.lane_throughput[lane] > 0 {
            wait_sum +=
                core.lane_wait_totals[lane].as_secs_f64() / core.lane_throughput[lane] as f64;
            active_lanes += 1;
        }
    }
    let avg_wait_s = if active_lanes > 0 {
        wait_sum / active_lanes as f64
    } else {
        0.0
    };

    // Utilization: processed over arrivals expected in the elapsed
    // time, clamped to [0, 1].
    let expected_arrivals = if core.expected_arrival_interval > Duration::ZERO {
        now.as_secs_f64() / core.expected_arrival_interval.as_secs_f64()
    } else {
        0.0
    };
    let utilization = if expected_arrivals > 0.0 {
        (core.total_vehicles_processed as f64 / expected_arrivals).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let average_emergency_response = if core.emergencies_handled > 0 {
        core.total_emergency_response / core.emergencies_handled as u32
    } else {
        Duration::ZERO
    };

    MetricsReport {
        vehicles_per_minute,
        avg_wait_s,
        utilization,
        fairness_index: jain_fairness(&core.lane_wait_totals),
        total_vehicles_processed: core.total_vehicles_processed,
        lane_throughput: core.lane_throughput,
        context_switches: core.context_switches,
        deadlocks_prevented,
        deadlock_resets: core.deadlock_resets,
        queue_overflows: core.queue_overflows,
        emergencies_handled: core.emergencies_handled,
        average_emergency_response,
        simulation_time: now,
    }
}

/// Jain's fairness index over lanes with positive cumulative wait:
/// `(Σ w_i)² / (n · Σ w_i²)`, 1.0 when nothing has waited.
pub fn jain_fairness(lane_waits: &[Duration; NUM_LANES]) -> f64 {
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut active = 0usize;
    for wait in lane_waits {
        let w = wait.as_secs_f64();
        if w > 0.0 {
            sum += w;
            sum_sq += w * w;
            active += 1;
        }
    }
    if sum > 0.0 && active > 0 {
        ((sum * sum) / (active as f64 * sum_sq)).min(1.0)
    } else {
        1.0
    }
}

/// Point-in-time metrics snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsReport {
    /// Vehicles processed per elapsed minute.
    pub vehicles_per_minute: f64,
    /// Mean of per-lane average waits [s].
    pub avg_wait_s: f64,
    /// Processed / expected arrivals, clamped to [0, 1].
    pub utilization: f64,
    /// Jain fairness over lanes with positive wait.
    pub fairness_index: f64,
    /// Total vehicles served.
    pub total_vehicles_processed: u64,
    /// Per-lane served counts.
    pub lane_throughput: [u64; NUM_LANES],
    /// Context switches performed.
    pub context_switches: u64,
    /// Requests rejected by the Banker's safety check.
    pub deadlocks_prevented: u64,
    /// Last-resort deadlock resets performed.
    pub deadlock_resets: u64,
    /// Arrivals rejected by full queues.
    pub queue_overflows: u64,
    /// Emergencies handled.
    pub emergencies_handled: u64,
    /// Mean emergency response time.
    pub average_emergency_response: Duration,
    /// Simulation time of the report.
    pub simulation_time: SimTime,
}

// ─── Tests ──────────────────────────────────────────────────────────
