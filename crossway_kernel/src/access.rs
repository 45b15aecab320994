//! Hybrid crossing acquisition.
//!
//! Combines the intersection lock and the Banker's gate into a single
//! grant decision under one of three strategies, with timed-retry and
//! forced-preemption variants. Contention is not an error: every
//! operation reports success as `bool` and the caller retries on the
//! next tick.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crossway_common::consts::ACQUIRE_RETRY_INTERVAL_MS;
use crossway_common::types::{AccessStrategy, Movement, SimTime};

use crate::bankers::BankersState;
use crate::intersection::IntersectionLock;
use crate::lane::Lane;

/// Attempt a crossing grant for `lane` under the given strategy.
///
/// Computes and records the quadrant claim for the movement, then:
///
/// - **Fifo** — intersection lock only.
/// - **Bankers** — Banker's gate first; if the intersection turns out
///   busy the tentative allocation is rolled back.
/// - **Hybrid** — as Bankers, but a gate rejection may be overridden
///   when the lane carries the emergency flag or the system-wide state
///   is still safe.
///
/// On success the lane's `allocated_quadrants` mirrors the claim.
pub fn acquire_crossing(
    strategy: AccessStrategy,
    lane: &Lane,
    movement: Movement,
    intersection: &IntersectionLock,
    bankers: &BankersState,
    now: SimTime,
) -> bool {
    let claim = lane.core().prepare_request(movement);
    let units = claim.units();

    match strategy {
        AccessStrategy::Fifo => {
            if intersection.try_acquire(lane.id(), claim, now) {
                lane.core().set_allocated_quadrants(claim);
                true
            } else {
                false
            }
        }

        AccessStrategy::Bankers => {
            if !bankers.request(lane.id(), units) {
                return false;
            }
            if intersection.try_acquire(lane.id(), claim, now) {
                lane.core().set_allocated_quadrants(claim);
                true
            } else {
                // Intersection busy: the tentative allocation must not
                // outlive the failed grant.
                bankers.release_all(lane.id());
                false
            }
        }

        AccessStrategy::Hybrid => {
            if bankers.request(lane.id(), units) {
                if intersection.try_acquire(lane.id(), claim, now) {
                    lane.core().set_allocated_quadrants(claim);
                    return true;
                }
                bankers.release_all(lane.id());
                return false;
            }

            // Gate rejected. Emergency lanes may cross regardless.
            let emergency = {
                let core = lane.core();
                core.emergency_override() || core.priority() == 1
            };
            if emergency {
                info!(lane = %lane.id(), "emergency override past allocation gate");
                if intersection.try_acquire(lane.id(), claim, now) {
                    lane.core().set_allocated_quadrants(claim);
                    return true;
                }
                return false;
            }

            // Per-request rejection with a globally safe state: proceed
            // on the intersection lock alone.
            if bankers.is_safe_state() {
                debug!(lane = %lane.id(), "gate rejected request but state is safe, proceeding");
                if intersection.try_acquire(lane.id(), claim, now) {
                    lane.core().set_allocated_quadrants(claim);
                    return true;
                }
                return false;
            }

            debug!(lane = %lane.id(), "crossing denied: unsafe state");
            false
        }
    }
}

/// Release a crossing granted by [`acquire_crossing`].
///
/// Mirrors acquisition: intersection first, then the Banker's
/// deallocation, then the lane's quadrant masks.
pub fn release_crossing(
    strategy: AccessStrategy,
    lane: &Lane,
    intersection: &IntersectionLock,
    bankers: &BankersState,
) {
    intersection.release(lane.id());
    if strategy != AccessStrategy::Fifo {
        bankers.release_all(lane.id());
    }
    lane.core().clear_quadrants();
}

/// Timed-retry acquisition: retries the strategy at a fixed interval
/// until success or the timeout elapses.
///
/// This is a blocking utility for worker-thread callers; it measures
/// real elapsed time, sleeping between attempts.
pub fn acquire_crossing_with_timeout(
    strategy: AccessStrategy,
    lane: &Lane,
    movement: Movement,
    intersection: &IntersectionLock,
    bankers: &BankersState,
    now: SimTime,
    timeout: Duration,
) -> bool {
    let started = Instant::now();
    loop {
        if acquire_crossing(strategy, lane, movement, intersection, bankers, now) {
            return true;
        }
        if started.elapsed() >= timeout {
            debug!(
                lane = %lane.id(),
                timeout_s = timeout.as_secs_f64(),
                "crossing acquisition timed out"
            );
            return false;
        }
        std::thread::sleep(Duration::from_millis(ACQUIRE_RETRY_INTERVAL_MS));
    }
}

/// Preemptive acquisition: a sufficiently urgent lane (priority < 2)
/// forcibly clears a held intersection, signals all waiters, and then
/// proceeds with the normal hybrid grant.
pub fn acquire_crossing_with_preemption(
    lane: &Lane,
    movement: Movement,
    intersection: &IntersectionLock,
    bankers: &BankersState,
    now: SimTime,
) -> bool {
    let holder = intersection.snapshot().current_lane;
    if lane.priority() < 2 {
        if let Some(holder) = holder {
            if holder != lane.id() {
                info!(holder = %holder, preemptor = %lane.id(), "forcing intersection release");
                intersection.reset();
                intersection.signal_all();
            }
        }
    }
    acquire_crossing(
        AccessStrategy::Hybrid,
        lane,
        movement,
        intersection,
        bankers,
        now,
    )
}

// ─── Tests ──────────────────────────────────────────────────────────
