//! End-to-end scheduling scenarios.
//!
//! Each test drives the full tick path — selection, grant, slice,
//! release — against synthetic simulation time; nothing here sleeps.

use std::time::Duration;

use crossway_common::config::{EmergencyConfig, SimConfig};
use crossway_common::types::{
    AccessStrategy, LaneId, Movement, SchedulingPolicy, SimTime,
};

use crossway_kernel::access::acquire_crossing;
use crossway_kernel::bankers::BankersState;
use crossway_kernel::intersection::IntersectionLock;
use crossway_kernel::lane::build_lanes;
use crossway_kernel::sched::mlfq::MlfqLevel;
use crossway_kernel::system::TrafficSystem;

// ── Helpers ─────────────────────────────────────────────────────────

fn at(secs: u64) -> SimTime {
    Duration::from_secs(secs)
}

fn quiet_config(policy: SchedulingPolicy) -> SimConfig {
    let mut config = SimConfig::default();
    config.scheduler.algorithm = policy;
    config.emergency = EmergencyConfig {
        auto_detect: false,
        ..Default::default()
    };
    config
}

fn running(policy: SchedulingPolicy) -> TrafficSystem {
    let system = TrafficSystem::new(quiet_config(policy));
    system.start();
    system
}

// ── Balanced load under SJF ─────────────────────────────────────────

#[test]
fn balanced_load_drains_evenly_under_sjf() {
    let system = running(SchedulingPolicy::Sjf);
    for lane in LaneId::ALL {
        for _ in 0..5 {
            system.admit_vehicle(lane, at(0));
        }
    }

    for tick in 1..=60u64 {
        system.step(at(tick), Movement::Straight);
    }

    let report = system.report(at(60));
    assert!(
        report.total_vehicles_processed >= 16,
        "processed = {}",
        report.total_vehicles_processed
    );

    let mean = report.lane_throughput.iter().sum::<u64>() as f64 / 4.0;
    for (index, served) in report.lane_throughput.iter().enumerate() {
        let deviation = (*served as f64 - mean).abs();
        assert!(
            deviation <= 2.0,
            "lane {index} served {served}, mean {mean}"
        );
    }
}

// ── Short queues first under SJF ────────────────────────────────────

#[test]
fn sjf_drains_short_queues_before_the_long_one() {
    let system = running(SchedulingPolicy::Sjf);
    for _ in 0..20 {
        system.admit_vehicle(LaneId::North, at(0));
    }
    for lane in [LaneId::South, LaneId::East, LaneId::West] {
        system.admit_vehicle(lane, at(0));
    }

    let mut short_drained_at = None;
    let mut north_drained_at = None;
    for tick in 1..=120u64 {
        system.step(at(tick), Movement::Straight);

        let shorts_empty = [LaneId::South, LaneId::East, LaneId::West]
            .iter()
            .all(|lane| system.lanes()[lane.index()].queue_len() == 0);
        if shorts_empty && short_drained_at.is_none() {
            short_drained_at = Some(tick);
        }
        if system.lanes()[LaneId::North.index()].queue_len() == 0 && north_drained_at.is_none() {
            north_drained_at = Some(tick);
        }
    }

    let short = short_drained_at.expect("short queues must drain");
    let north = north_drained_at.expect("north must eventually drain");
    assert!(short < north, "short drained at {short}, north at {north}");

    // Fairness over served lanes is well-defined and in (0, 1].
    let report = system.report(at(120));
    assert!(report.fairness_index > 0.0 && report.fairness_index <= 1.0);
}

// ── Emergency preemption ────────────────────────────────────────────

#[test]
fn ambulance_takes_the_intersection_within_one_tick() {
    let system = running(SchedulingPolicy::Sjf);
    for _ in 0..10 {
        system.admit_vehicle(LaneId::North, at(0));
    }

    // North is being served up to t=5.
    for tick in 1..=5u64 {
        let outcome = system.step(at(tick), Movement::Straight);
        assert_eq!(outcome.scheduled, Some(LaneId::North));
    }

    let emergency = system.inject_emergency(LaneId::East, at(5)).unwrap();
    assert_eq!(emergency.lane, LaneId::East);

    // Within one scheduling tick the emergency lane holds the slice.
    let outcome = system.step(at(6), Movement::Straight);
    assert_eq!(outcome.scheduled, Some(LaneId::East));
    assert!(outcome.granted);

    // Run past clearance and check the response time was recorded.
    let horizon = 6 + emergency.crossing.as_secs() + 2;
    for tick in 7..=horizon {
        system.step(at(tick), Movement::Straight);
    }
    let report = system.report(at(horizon));
    assert_eq!(report.emergencies_handled, 1);
    assert!(report.average_emergency_response > Duration::ZERO);
}

// ── Concurrent left turns against the Banker's gate ─────────────────

#[test]
fn simultaneous_left_turns_are_gated_for_safety() {
    let bankers = BankersState::new();
    let mut granted_masks = Vec::new();

    for lane in LaneId::ALL {
        let units = Movement::Left.claim_units(lane);
        if bankers.request(lane, units) {
            granted_masks.push(units);
            // Every committed grant leaves the system safe.
            assert!(bankers.is_safe_state());
        }
    }

    assert!(!granted_masks.is_empty());
    assert!(granted_masks.len() < 4, "all four left turns cannot coexist");
    assert!(bankers.deadlock_preventions() > 0);

    // No quadrant is shared between concurrent holders.
    for quad in 0..4 {
        let claims: u8 = granted_masks.iter().map(|units| units[quad]).sum();
        assert!(claims <= 1, "quadrant {quad} double-booked");
    }
    assert!(bankers.snapshot().conserves_units());
}

// ── MLFQ demotion and waiter service ────────────────────────────────

#[test]
fn mlfq_demotes_the_hog_and_serves_the_waiter() {
    let system = running(SchedulingPolicy::MultilevelFeedback);
    for _ in 0..15 {
        system.admit_vehicle(LaneId::North, at(0));
    }
    system.admit_vehicle(LaneId::South, at(0));

    let mut north_demoted_at = None;
    let mut south_served_at = None;
    for tick in 1..=20u64 {
        let outcome = system.step(at(tick), Movement::Straight);
        if outcome.scheduled == Some(LaneId::South) && south_served_at.is_none() {
            south_served_at = Some(tick);
        }
        if system.scheduler().mlfq_level(LaneId::North) == MlfqLevel::Low
            && north_demoted_at.is_none()
        {
            north_demoted_at = Some(tick);
        }
    }

    let demoted = north_demoted_at.expect("North must be demoted");
    let served = south_served_at.expect("South must be scheduled");
    assert!(demoted < 20, "North demoted at t={demoted}");
    assert!(served < 20, "South served at t={served}");
}

// ── Hybrid override under an active emergency ───────────────────────

#[test]
fn hybrid_override_grants_emergency_lane_past_unsafe_gate() {
    let lanes = build_lanes(20);
    let intersection = IntersectionLock::new();
    let bankers = BankersState::new();

    // South is mid-crossing: its straight-movement claim is committed
    // in the gate while the physical intersection is already clear.
    assert!(bankers.request(
        LaneId::South,
        Movement::Straight.claim_units(LaneId::South)
    ));

    // West carries an active emergency; its request would leave the
    // state unsafe and is rejected, which counts one prevention...
    let west = &lanes[LaneId::West.index()];
    west.core().mark_emergency();
    let granted = acquire_crossing(
        AccessStrategy::Hybrid,
        west,
        Movement::Straight,
        &intersection,
        &bankers,
        at(0),
    );

    // ...and then the override path grants without safety approval.
    assert!(granted);
    assert_eq!(bankers.deadlock_preventions(), 1);
    assert_eq!(
        intersection.snapshot().current_lane,
        Some(LaneId::West)
    );
    // The override bypassed the gate: no allocation was recorded.
    assert_eq!(
        bankers.snapshot().allocation[LaneId::West.index()],
        [0, 0, 0, 0]
    );
}

// ── Policy switching mid-run ────────────────────────────────────────

#[test]
fn policy_can_change_between_ticks() {
    let system = running(SchedulingPolicy::Sjf);
    for lane in LaneId::ALL {
        for _ in 0..3 {
            system.admit_vehicle(lane, at(0));
        }
    }

    for tick in 1..=4u64 {
        system.step(at(tick), Movement::Straight);
    }
    assert!(system.scheduler().set_policy(SchedulingPolicy::PriorityRoundRobin));
    for tick in 5..=8u64 {
        system.step(at(tick), Movement::Straight);
    }
    assert!(system.scheduler().set_policy(SchedulingPolicy::MultilevelFeedback));
    let mut processed_after_switch = 0;
    for tick in 9..=20u64 {
        if system.step(at(tick), Movement::Straight).processed.is_some() {
            processed_after_switch += 1;
        }
    }

    assert!(processed_after_switch > 0);
    let report = system.report(at(20));
    assert!(report.total_vehicles_processed >= 12);
}
