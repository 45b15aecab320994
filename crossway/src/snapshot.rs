//! Read-only system snapshots for UI collaborators.
//!
//! Everything here is assembled with try-locks: if any subsystem is
//! contended the whole capture returns `None` and the reader skips the
//! frame rather than stalling the simulation.

use std::time::Duration;

use crossway_common::types::{LaneId, LaneState, SchedulingPolicy, SimTime};
use crossway_kernel::bankers::BankersSnapshot;
use crossway_kernel::emergency::EmergencyVehicle;
use crossway_kernel::intersection::OwnerSnapshot;
use crossway_kernel::metrics::MetricsReport;
use crossway_kernel::system::TrafficSystem;

/// Per-lane display state.
#[derive(Debug, Clone, Copy)]
pub struct LaneSnapshot {
    /// Lane identifier.
    pub id: LaneId,
    /// Process state.
    pub state: LaneState,
    /// Queued vehicles.
    pub queue_len: usize,
    /// Scheduling priority.
    pub priority: u8,
    /// Emergency marker.
    pub emergency: bool,
    /// Vehicles served.
    pub total_served: u64,
    /// Average per-vehicle wait.
    pub average_wait: Duration,
}

/// Full display snapshot, captured without blocking.
#[derive(Debug, Clone)]
pub struct SystemSnapshot {
    /// Active scheduling policy.
    pub policy: SchedulingPolicy,
    /// Per-lane states.
    pub lanes: [LaneSnapshot; 4],
    /// Intersection ownership.
    pub intersection: OwnerSnapshot,
    /// Banker's matrices.
    pub bankers: BankersSnapshot,
    /// Derived metrics (absent when the metrics lock was contended).
    pub metrics: Option<MetricsReport>,
    /// Active emergency, if any.
    pub emergency: Option<EmergencyVehicle>,
    /// Whether the simulation is paused.
    pub paused: bool,
}

impl SystemSnapshot {
    /// Capture a frame. Returns `None` when any core lock is contended;
    /// the caller skips the frame.
    pub fn capture(system: &TrafficSystem, now: SimTime) -> Option<Self> {
        let mut lanes = [LaneSnapshot {
            id: LaneId::North,
            state: LaneState::Waiting,
            queue_len: 0,
            priority: 0,
            emergency: false,
            total_served: 0,
            average_wait: Duration::ZERO,
        }; 4];

        for lane in system.lanes() {
            let core = lane.try_core()?;
            lanes[lane.id().index()] = LaneSnapshot {
                id: lane.id(),
                state: core.state(),
                queue_len: core.queue().len(),
                priority: core.priority(),
                emergency: core.emergency_override(),
                total_served: core.total_served(),
                average_wait: core.average_wait(),
            };
        }

        let intersection = system.intersection().try_snapshot()?;
        let bankers = system.bankers().try_snapshot()?;
        let metrics = system.try_report(now);

        Some(Self {
            policy: system.scheduler().policy(),
            lanes,
            intersection,
            bankers,
            metrics,
            emergency: system.emergency().current(),
            paused: system.is_paused(),
        })
    }
}
