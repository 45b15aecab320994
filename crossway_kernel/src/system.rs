//! The owned simulation context.
//!
//! `TrafficSystem` holds every subsystem — lanes, intersection lock,
//! Banker's state, scheduler, emergency handling, metrics — as one
//! value passed into every entry point. Thread handles share it behind
//! an `Arc`; interior mutability lives inside each subsystem.
//!
//! [`TrafficSystem::step`] is the periodic schedule/execute tick:
//! emergency clearance and detection, the deadlock sweep, lane
//! selection, crossing grant, and a one-vehicle time slice.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crossway_common::config::SimConfig;
use crossway_common::types::{LaneId, LaneState, Movement, SimTime, VehicleId};

use crate::access::{acquire_crossing, release_crossing};
use crate::bankers::BankersState;
use crate::emergency::{EmergencySystem, EmergencyVehicle};
use crate::intersection::{
    is_deadlocked, resolve_deadlock, DeadlockResolution, IntersectionLock,
};
use crate::lane::{build_lanes, LaneSet};
use crate::metrics::{Metrics, MetricsReport};
use crate::sched::{ExecutionRecord, Scheduler};

/// What one simulation tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    /// Lane selected by the scheduler.
    pub scheduled: Option<LaneId>,
    /// Whether the selection was a context switch (the driver incurs
    /// the artificial switch delay).
    pub switched: bool,
    /// Whether the crossing grant succeeded.
    pub granted: bool,
    /// Vehicle processed during the slice tick, if any.
    pub processed: Option<VehicleId>,
    /// Whether an emergency is in flight after this tick.
    pub emergency_active: bool,
    /// Deadlock resolution performed this tick, if any.
    pub deadlock_resolution: Option<DeadlockResolution>,
}

impl TickOutcome {
    const fn idle() -> Self {
        Self {
            scheduled: None,
            switched: false,
            granted: false,
            processed: None,
            emergency_active: false,
            deadlock_resolution: None,
        }
    }
}

/// All simulation subsystems as one owned value.
#[derive(Debug)]
pub struct TrafficSystem {
    config: SimConfig,
    lanes: LaneSet,
    intersection: IntersectionLock,
    bankers: BankersState,
    scheduler: Scheduler,
    emergency: EmergencySystem,
    metrics: Metrics,
    running: AtomicBool,
    paused: AtomicBool,
    next_vehicle_id: AtomicU32,
}

impl TrafficSystem {
    /// Build every subsystem from a validated configuration.
    pub fn new(config: SimConfig) -> Self {
        let mean_arrival = Duration::from_millis(
            (config.simulation.min_arrival_s + config.simulation.max_arrival_s) * 500,
        );
        let lanes = build_lanes(config.simulation.queue_capacity);
        let scheduler = Scheduler::new(
            config.scheduler.algorithm,
            Duration::from_secs(config.scheduler.time_quantum_s),
        );
        let emergency = EmergencySystem::new(
            config.emergency.preempt_enabled,
            config.emergency.draw_odds,
            config.simulation.seed,
        );
        let metrics = Metrics::new(mean_arrival);

        Self {
            config,
            lanes,
            intersection: IntersectionLock::new(),
            bankers: BankersState::new(),
            scheduler,
            emergency,
            metrics,
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            next_vehicle_id: AtomicU32::new(1),
        }
    }

    // ── Subsystem access ──

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn lanes(&self) -> &LaneSet {
        &self.lanes
    }

    pub fn intersection(&self) -> &IntersectionLock {
        &self.intersection
    }

    pub fn bankers(&self) -> &BankersState {
        &self.bankers
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn emergency(&self) -> &EmergencySystem {
        &self.emergency
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    // ── Lifecycle ──

    /// Start accepting ticks.
    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        self.scheduler.start();
    }

    /// Stop the simulation; subsequent ticks are no-ops.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.scheduler.stop();
        self.intersection.signal_all();
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Reinitialize every subsystem for a fresh run.
    pub fn reset(&self) {
        for lane in &self.lanes {
            lane.core().reset();
        }
        self.intersection.reset();
        self.bankers.reset();
        self.scheduler.reset();
        self.emergency.reset();
        self.metrics.reset();
    }

    // ── Admission ──

    /// Admit one generated vehicle into a lane queue.
    ///
    /// Returns the assigned vehicle id, or `None` when the queue
    /// overflowed (counted in metrics).
    pub fn admit_vehicle(&self, lane: LaneId, now: SimTime) -> Option<VehicleId> {
        let vehicle = self.next_vehicle_id.fetch_add(1, Ordering::Relaxed);
        if self.lanes[lane.index()].admit(vehicle, now) {
            Some(vehicle)
        } else {
            self.metrics.record_overflow();
            debug!(lane = %lane, vehicle, "arrival rejected: queue full");
            None
        }
    }

    // ── Emergencies ──

    /// Operator injection of an emergency on a lane.
    pub fn inject_emergency(&self, lane: LaneId, now: SimTime) -> Option<EmergencyVehicle> {
        let emergency = self.emergency.inject(lane, now)?;
        self.preempt_for(&emergency, now);
        Some(emergency)
    }

    /// Engage preemption for a freshly-detected emergency: clear the
    /// intersection and its holder's allocation, flag the target lane,
    /// and admit the emergency vehicle at the rear of its queue.
    ///
    /// With preemption disabled the emergency waits in-band; the lane
    /// is still flagged so it schedules like any priority-1 lane.
    fn preempt_for(&self, emergency: &EmergencyVehicle, now: SimTime) {
        if self.emergency.preempt_enabled() {
            warn!(lane = %emergency.lane, "preempting: clearing intersection for emergency");
            if let Some(displaced) = self.intersection.reset() {
                let lane = &self.lanes[displaced.index()];
                let mut core = lane.core();
                core.finish_slice();
                core.clear_quadrants();
                drop(core);
                self.bankers.release_all(displaced);
            }
            self.scheduler.clear_current_lane();
            self.intersection.signal_all();
        }

        let lane = &self.lanes[emergency.lane.index()];
        lane.core().mark_emergency();
        if !lane.admit(emergency.vehicle, now) {
            warn!(lane = %emergency.lane, "emergency vehicle arriving into a full queue");
        }
    }

    // ── The tick ──

    /// One schedule/execute tick at simulation time `now`.
    ///
    /// `movement` is the traversal the granted lane's front vehicle
    /// will make; the caller chooses it.
    pub fn step(&self, now: SimTime, movement: Movement) -> TickOutcome {
        if !self.is_running() || self.is_paused() {
            return TickOutcome::idle();
        }

        // 1. Emergency clearance.
        if let Some(cleared) = self.emergency.tick_clearance(now) {
            self.lanes[cleared.vehicle.lane.index()].core().clear_emergency();
            self.metrics.record_emergency(cleared.response_time);
            self.intersection.signal_all();
        }

        // 2. Emergency detection draw.
        if self.config.emergency.auto_detect {
            if let Some(emergency) = self.emergency.maybe_detect(now) {
                self.preempt_for(&emergency, now);
            }
        }

        // 3. Deadlock sweep.
        let deadlock_resolution = if is_deadlocked(&self.lanes, &self.bankers) {
            let resolution = resolve_deadlock(&self.lanes, &self.intersection, &self.bankers);
            if resolution == Some(DeadlockResolution::SystemReset) {
                self.metrics.record_deadlock_reset();
                self.scheduler.clear_current_lane();
            }
            resolution
        } else {
            None
        };

        // 4. Lane selection.
        let schedule = self.scheduler.schedule_next_lane(&self.lanes, now);
        if schedule.switched {
            self.metrics.record_context_switch();
        }

        // 5. Crossing grant and one-vehicle slice.
        let mut granted = false;
        let mut processed = None;
        let mut inversion_boost = None;
        if let Some(lane_id) = schedule.lane {
            let lane = &self.lanes[lane_id.index()];
            let strategy = self.config.intersection.strategy;
            granted = acquire_crossing(
                strategy,
                lane,
                movement,
                &self.intersection,
                &self.bankers,
                now,
            );

            if granted {
                if let Some((vehicle, wait)) = lane.core().take_vehicle(now) {
                    self.metrics.record_vehicle(lane_id, wait);
                    processed = Some(vehicle);
                }

                // A drained lane leaves Running; a busy lane keeps its
                // slice until the scheduler switches away.
                {
                    let mut core = lane.core();
                    if core.queue().is_empty() && core.state() == LaneState::Running {
                        core.set_state(LaneState::Waiting);
                    }
                }

                self.scheduler.record_execution(ExecutionRecord {
                    lane: lane_id,
                    start: now,
                    end: now,
                    vehicles: processed.is_some() as u32,
                });

                release_crossing(strategy, lane, &self.intersection, &self.bankers);
            } else {
                // Busy intersection: engage priority inheritance for
                // the remainder of the tick so the holder can finish.
                inversion_boost = self
                    .intersection
                    .handle_priority_inversion(&self.lanes, lane_id);
            }
        }

        let outcome = TickOutcome {
            scheduled: schedule.lane,
            switched: schedule.switched,
            granted,
            processed,
            emergency_active: self.emergency.is_active(),
            deadlock_resolution,
        };
        // The boost guard restores the holder's original priority here,
        // at the end of the slice window.
        drop(inversion_boost);
        outcome
    }

    /// Full metrics report at simulation time `now`.
    pub fn report(&self, now: SimTime) -> MetricsReport {
        self.metrics.report(now, self.bankers.deadlock_preventions())
    }

    /// Non-blocking report for UI readers.
    pub fn try_report(&self, now: SimTime) -> Option<MetricsReport> {
        let preventions = self.bankers.try_snapshot()?.deadlock_preventions;
        self.metrics.try_report(now, preventions)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crossway_common::config::EmergencyConfig;

    fn at(secs: u64) -> SimTime {
        Duration::from_secs(secs)
    }

    fn quiet_config() -> SimConfig {
        SimConfig {
            emergency: EmergencyConfig {
                auto_detect: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn running_system() -> TrafficSystem {
        let system = TrafficSystem::new(quiet_config());
        system.start();
        system
    }

    #[test]
    fn idle_before_start() {
        let system = TrafficSystem::new(quiet_config());
        system.admit_vehicle(LaneId::North, at(0));
        let outcome = system.step(at(1), Movement::Straight);
        assert_eq!(outcome, TickOutcome::idle());
    }

    #[test]
    fn tick_serves_one_vehicle() {
        let system = running_system();
        let vehicle = system.admit_vehicle(LaneId::North, at(0)).unwrap();

        let outcome = system.step(at(1), Movement::Straight);
        assert_eq!(outcome.scheduled, Some(LaneId::North));
        assert!(outcome.granted);
        assert_eq!(outcome.processed, Some(vehicle));

        // Slice drained the lane: back to Waiting, intersection free.
        assert_eq!(system.lanes()[LaneId::North.index()].state(), LaneState::Waiting);
        assert!(system.intersection().snapshot().available);
        assert!(system.bankers().snapshot().conserves_units());

        let report = system.report(at(1));
        assert_eq!(report.total_vehicles_processed, 1);
    }

    #[test]
    fn paused_system_does_nothing() {
        let system = running_system();
        system.admit_vehicle(LaneId::East, at(0));
        system.pause();
        assert_eq!(system.step(at(1), Movement::Straight), TickOutcome::idle());
        system.resume();
        assert!(system.step(at(2), Movement::Straight).granted);
    }

    #[test]
    fn fifo_per_lane_across_ticks() {
        let system = running_system();
        let first = system.admit_vehicle(LaneId::West, at(0)).unwrap();
        let second = system.admit_vehicle(LaneId::West, at(0)).unwrap();

        let a = system.step(at(1), Movement::Straight);
        let b = system.step(at(2), Movement::Straight);
        assert_eq!(a.processed, Some(first));
        assert_eq!(b.processed, Some(second));
    }

    #[test]
    fn injection_preempts_and_serves_emergency_lane() {
        let system = running_system();
        for _ in 0..5 {
            system.admit_vehicle(LaneId::North, at(0));
        }
        // North is mid-service.
        system.step(at(1), Movement::Straight);

        system.inject_emergency(LaneId::East, at(5));
        assert!(system.emergency().is_active());

        // The very next tick grants the emergency lane.
        let outcome = system.step(at(6), Movement::Straight);
        assert_eq!(outcome.scheduled, Some(LaneId::East));
        assert!(outcome.granted);
        assert!(outcome.emergency_active);
    }

    #[test]
    fn emergency_clears_and_normal_service_resumes() {
        let system = running_system();
        system.admit_vehicle(LaneId::North, at(0));
        let emergency = system.inject_emergency(LaneId::East, at(0)).unwrap();

        system.step(at(1), Movement::Straight);
        // Advance past the crossing duration.
        let after = at(1) + emergency.crossing + Duration::from_secs(1);
        let outcome = system.step(after, Movement::Straight);
        assert!(!outcome.emergency_active);

        let east = &system.lanes()[LaneId::East.index()];
        assert!(!east.core().emergency_override());

        let report = system.report(after);
        assert_eq!(report.emergencies_handled, 1);
        assert!(report.average_emergency_response > Duration::ZERO);
    }

    #[test]
    fn overflow_counted_in_metrics() {
        let mut config = quiet_config();
        config.simulation.queue_capacity = 2;
        let system = TrafficSystem::new(config);
        system.start();

        assert!(system.admit_vehicle(LaneId::South, at(0)).is_some());
        assert!(system.admit_vehicle(LaneId::South, at(0)).is_some());
        assert!(system.admit_vehicle(LaneId::South, at(0)).is_none());

        let report = system.report(at(1));
        assert_eq!(report.queue_overflows, 1);
    }

    #[test]
    fn context_switches_are_monotonic() {
        let system = running_system();
        let mut last = 0;
        for tick in 0..20u64 {
            if tick % 3 == 0 {
                system.admit_vehicle(LaneId::from_index((tick % 4) as usize).unwrap(), at(tick));
            }
            system.step(at(tick), Movement::Straight);
            let report = system.report(at(tick));
            assert!(report.context_switches >= last);
            last = report.context_switches;
        }
    }

    #[test]
    fn reset_returns_to_initial_state() {
        let system = running_system();
        system.admit_vehicle(LaneId::North, at(0));
        system.step(at(1), Movement::Straight);
        system.reset();

        let report = system.report(at(2));
        assert_eq!(report.total_vehicles_processed, 0);
        assert!(system.intersection().snapshot().available);
        for lane in system.lanes() {
            assert_eq!(lane.state(), LaneState::Waiting);
        }
    }

    #[test]
    fn stop_halts_ticks() {
        let system = running_system();
        system.admit_vehicle(LaneId::North, at(0));
        system.stop();
        assert_eq!(system.step(at(1), Movement::Straight), TickOutcome::idle());
    }
}
