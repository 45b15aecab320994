//! Intersection ownership and waiter signalling.
//!
//! A single exclusive lock over the physical intersection with one
//! condition variable per lane, plus the priority-inversion handling and
//! deadlock detection/resolution primitives built on top of it.
//!
//! Ownership invariant: `available ⟺ current_lane == None`. Only the
//! current owner's allocated quadrants are physically active.

use std::thread::ThreadId;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crossway_common::consts::DEADLOCK_LANE_THRESHOLD;
use crossway_common::types::{LaneId, LaneState, Quadrants, SimTime};

use crate::bankers::BankersState;
use crate::lane::{Lane, LaneSet};

// ─── Owner state ────────────────────────────────────────────────────

/// Mutable ownership record guarded by the intersection mutex.
#[derive(Debug)]
struct OwnerState {
    available: bool,
    current_lane: Option<LaneId>,
    active_quadrants: Quadrants,
    holder_thread: Option<ThreadId>,
    acquired_at: Option<SimTime>,
}

impl OwnerState {
    const fn new() -> Self {
        Self {
            available: true,
            current_lane: None,
            active_quadrants: Quadrants::empty(),
            holder_thread: None,
            acquired_at: None,
        }
    }

    /// Grant predicate: free, or already held by this lane.
    #[inline]
    fn grantable_to(&self, lane: LaneId) -> bool {
        self.available || self.current_lane == Some(lane)
    }

    fn grant(&mut self, lane: LaneId, quadrants: Quadrants, now: SimTime) {
        self.available = false;
        self.current_lane = Some(lane);
        self.active_quadrants = quadrants;
        self.holder_thread = Some(std::thread::current().id());
        self.acquired_at = Some(now);
    }

    fn clear(&mut self) {
        self.available = true;
        self.current_lane = None;
        self.active_quadrants = Quadrants::empty();
        self.holder_thread = None;
        self.acquired_at = None;
    }
}

/// Read-only snapshot of the ownership record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerSnapshot {
    /// Whether the intersection is free.
    pub available: bool,
    /// Current owner, if any.
    pub current_lane: Option<LaneId>,
    /// Quadrants physically in use.
    pub active_quadrants: Quadrants,
    /// When the current grant was made.
    pub acquired_at: Option<SimTime>,
}

// ─── Intersection lock ──────────────────────────────────────────────

/// Exclusive intersection ownership with per-lane condition waiters.
#[derive(Debug)]
pub struct IntersectionLock {
    state: Mutex<OwnerState>,
    waiters: [Condvar; 4],
}

impl Default for IntersectionLock {
    fn default() -> Self {
        Self::new()
    }
}

impl IntersectionLock {
    /// Create an available intersection with no owner.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(OwnerState::new()),
            waiters: [Condvar::new(), Condvar::new(), Condvar::new(), Condvar::new()],
        }
    }

    /// Blocking acquisition for `lane`.
    ///
    /// Waits on the lane's condition variable until the intersection is
    /// free (or already held by this lane), then grants and records the
    /// holder and timestamp. Re-acquisition by the current owner
    /// succeeds immediately.
    pub fn acquire(&self, lane: LaneId, quadrants: Quadrants, now: SimTime) {
        let mut state = self.state.lock();
        while !state.grantable_to(lane) {
            self.waiters[lane.index()].wait(&mut state);
        }
        state.grant(lane, quadrants, now);
    }

    /// Non-blocking acquisition attempt. Returns `false` without
    /// waiting when the mutex is contended or another lane owns the
    /// intersection.
    pub fn try_acquire(&self, lane: LaneId, quadrants: Quadrants, now: SimTime) -> bool {
        let Some(mut state) = self.state.try_lock() else {
            return false;
        };
        if !state.grantable_to(lane) {
            return false;
        }
        state.grant(lane, quadrants, now);
        true
    }

    /// Release the intersection. Permitted only for the current owner;
    /// all four per-lane waiters are signalled before returning.
    ///
    /// Returns `false` when `lane` does not own the intersection.
    pub fn release(&self, lane: LaneId) -> bool {
        let mut state = self.state.lock();
        if state.current_lane != Some(lane) {
            return false;
        }
        state.clear();
        for waiter in &self.waiters {
            waiter.notify_all();
        }
        true
    }

    /// Whether `lane` could be granted right now.
    pub fn is_available_for(&self, lane: LaneId) -> bool {
        self.state.lock().grantable_to(lane)
    }

    /// Current ownership snapshot.
    pub fn snapshot(&self) -> OwnerSnapshot {
        let state = self.state.lock();
        OwnerSnapshot {
            available: state.available,
            current_lane: state.current_lane,
            active_quadrants: state.active_quadrants,
            acquired_at: state.acquired_at,
        }
    }

    /// Non-blocking snapshot for UI readers; `None` on contention.
    pub fn try_snapshot(&self) -> Option<OwnerSnapshot> {
        let state = self.state.try_lock()?;
        Some(OwnerSnapshot {
            available: state.available,
            current_lane: state.current_lane,
            active_quadrants: state.active_quadrants,
            acquired_at: state.acquired_at,
        })
    }

    /// Wake one lane's waiters.
    pub fn signal_lane(&self, lane: LaneId) {
        let _state = self.state.lock();
        self.waiters[lane.index()].notify_all();
    }

    /// Wake every lane's waiters.
    pub fn signal_all(&self) {
        let _state = self.state.lock();
        for waiter in &self.waiters {
            waiter.notify_all();
        }
    }

    /// Block until this lane is signalled. Bare primitive used by the
    /// emergency and deadlock paths.
    pub fn wait_for_signal(&self, lane: LaneId) {
        let mut state = self.state.lock();
        self.waiters[lane.index()].wait(&mut state);
    }

    /// Force the intersection back to available and wake all waiters.
    ///
    /// Used by emergency preemption and the deadlock last resort; the
    /// displaced holder (if any) is returned so the caller can walk it
    /// through its normal terminal state.
    pub fn reset(&self) -> Option<LaneId> {
        let mut state = self.state.lock();
        let displaced = state.current_lane;
        state.clear();
        for waiter in &self.waiters {
            waiter.notify_all();
        }
        displaced
    }

    /// Consistency check: `available ⟺ current_lane == None`.
    pub fn validate(&self) -> bool {
        let state = self.state.lock();
        state.available == state.current_lane.is_none()
    }
}

// ─── Priority inversion ─────────────────────────────────────────────

/// RAII priority boost: the holder's priority is raised to the waiter's
/// for the duration of the guard and restored on every exit path.
#[derive(Debug)]
pub struct PriorityBoost<'a> {
    holder: &'a Lane,
    original_priority: u8,
}

impl Drop for PriorityBoost<'_> {
    fn drop(&mut self) {
        self.holder.core().set_priority(self.original_priority);
    }
}

impl PriorityBoost<'_> {
    /// Lane whose priority is temporarily boosted.
    pub fn holder(&self) -> LaneId {
        self.holder.id()
    }
}

impl IntersectionLock {
    /// Priority-inheritance approximation: when a higher-priority lane
    /// finds the intersection held by a lower-priority lane, raise the
    /// holder to the waiter's priority until the returned guard drops.
    ///
    /// Returns `None` when there is no inversion (no holder, waiter is
    /// the holder, or the holder is already at least as urgent).
    pub fn handle_priority_inversion<'a>(
        &self,
        lanes: &'a LaneSet,
        waiter: LaneId,
    ) -> Option<PriorityBoost<'a>> {
        let holder_id = {
            let state = self.state.lock();
            state.current_lane?
        };
        if holder_id == waiter {
            return None;
        }

        let holder = &lanes[holder_id.index()];
        let waiter_priority = lanes[waiter.index()].priority();
        let mut core = holder.core();
        if waiter_priority >= core.priority() {
            return None;
        }

        let original_priority = core.priority();
        core.set_priority(waiter_priority);
        debug!(
            holder = %holder_id,
            waiter = %waiter,
            boosted_to = waiter_priority,
            "priority inheritance engaged"
        );
        Some(PriorityBoost {
            holder,
            original_priority,
        })
    }
}

// ─── Deadlock detection & resolution ────────────────────────────────

/// What the resolution ladder did for a declared deadlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlockResolution {
    /// An emergency-flagged blocked lane was unblocked.
    EmergencyUnblocked(LaneId),
    /// The first blocked lane of the Banker's safe sequence was unblocked.
    SafeSequenceUnblocked(LaneId),
    /// The lowest-priority blocked lane was unblocked as victim.
    VictimUnblocked(LaneId),
    /// Last resort: intersection and Banker's state were reset and all
    /// lanes marked Ready.
    SystemReset,
}

/// Circular-wait heuristic: three or more lanes in Blocked state.
pub fn detect_deadlock(lanes: &LaneSet) -> bool {
    lanes
        .iter()
        .filter(|lane| lane.state() == LaneState::Blocked)
        .count()
        >= DEADLOCK_LANE_THRESHOLD
}

/// Contention heuristic: three or more Ready lanes holding a non-empty
/// quadrant request.
pub fn circular_wait_detected(lanes: &LaneSet) -> bool {
    lanes
        .iter()
        .filter(|lane| {
            let core = lane.core();
            core.state() == LaneState::Ready && !core.requested_quadrants().is_empty()
        })
        .count()
        >= DEADLOCK_LANE_THRESHOLD
}

/// Combined detection: blocked count, circular wait, or an unsafe
/// Banker's state.
pub fn is_deadlocked(lanes: &LaneSet, bankers: &BankersState) -> bool {
    detect_deadlock(lanes) || circular_wait_detected(lanes) || !bankers.is_safe_state()
}

/// Run the resolution ladder for a declared deadlock.
///
/// 1. Unblock an emergency-flagged lane.
/// 2. Unblock the first blocked lane of the Banker's safe sequence.
/// 3. Unblock the lowest-priority blocked lane as victim.
/// 4. If three or more lanes are still blocked, reset intersection and
///    Banker's state and mark every lane Ready.
///
/// Returns what was done, or `None` when no step applied.
pub fn resolve_deadlock(
    lanes: &LaneSet,
    intersection: &IntersectionLock,
    bankers: &BankersState,
) -> Option<DeadlockResolution> {
    // Step 1: emergency lanes first.
    for lane in lanes {
        let mut core = lane.core();
        if core.is_blocked() && core.emergency_override() {
            core.set_state(LaneState::Ready);
            drop(core);
            intersection.signal_lane(lane.id());
            debug!(lane = %lane.id(), "deadlock resolution: emergency lane unblocked");
            return Some(DeadlockResolution::EmergencyUnblocked(lane.id()));
        }
    }

    // Step 2: follow the Banker's safe sequence.
    if let Some(sequence) = bankers.safe_sequence() {
        for id in sequence {
            let lane = &lanes[id.index()];
            let mut core = lane.core();
            if core.is_blocked() {
                core.set_state(LaneState::Ready);
                drop(core);
                intersection.signal_lane(id);
                debug!(lane = %id, "deadlock resolution: safe-sequence lane unblocked");
                return Some(DeadlockResolution::SafeSequenceUnblocked(id));
            }
        }
    }

    // Step 3: victim selection — least urgent blocked lane. No early
    // return: step 4 re-checks whether the unblock was enough.
    let victim = lanes
        .iter()
        .filter(|lane| lane.core().is_blocked())
        .max_by_key(|lane| lane.priority())
        .map(Lane::id);
    if let Some(id) = victim {
        lanes[id.index()].set_state(LaneState::Ready);
        intersection.signal_lane(id);
        debug!(lane = %id, "deadlock resolution: victim unblocked");
    }

    // Step 4: bounded last resort.
    if detect_deadlock(lanes) {
        warn!("unresolved deadlock: resetting intersection and allocation state");
        // Walk the displaced holder through its normal terminal state
        // before clearing ownership.
        if let Some(displaced) = intersection.reset() {
            lanes[displaced.index()].core().finish_slice();
        }
        bankers.reset();
        for lane in lanes {
            let mut core = lane.core();
            core.set_state(LaneState::Ready);
            core.clear_quadrants();
        }
        intersection.signal_all();
        return Some(DeadlockResolution::SystemReset);
    }

    victim.map(DeadlockResolution::VictimUnblocked)
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lane::build_lanes;
    use crossway_common::types::Movement;
    use std::sync::Arc;
    use std::time::Duration;

    fn at(secs: u64) -> SimTime {
        Duration::from_secs(secs)
    }

    #[test]
    fn acquire_release_round_trip() {
        let lock = IntersectionLock::new();
        lock.acquire(LaneId::North, Quadrants::SE, at(1));
        let snap = lock.snapshot();
        assert!(!snap.available);
        assert_eq!(snap.current_lane, Some(LaneId::North));
        assert_eq!(snap.active_quadrants, Quadrants::SE);
        assert_eq!(snap.acquired_at, Some(at(1)));

        assert!(lock.release(LaneId::North));
        assert!(lock.snapshot().available);

        // Second acquisition succeeds with no interleaving holder.
        lock.acquire(LaneId::North, Quadrants::SE, at(2));
        assert_eq!(lock.snapshot().current_lane, Some(LaneId::North));
        assert!(lock.release(LaneId::North));
    }

    #[test]
    fn try_acquire_fails_while_held_by_other() {
        let lock = IntersectionLock::new();
        assert!(lock.try_acquire(LaneId::East, Quadrants::NW, at(0)));
        assert!(!lock.try_acquire(LaneId::West, Quadrants::SE, at(0)));
        // Re-grant to the holder is a success.
        assert!(lock.try_acquire(LaneId::East, Quadrants::NW, at(1)));
        assert!(lock.release(LaneId::East));
        assert!(lock.try_acquire(LaneId::West, Quadrants::SE, at(2)));
    }

    #[test]
    fn release_by_non_holder_rejected() {
        let lock = IntersectionLock::new();
        lock.acquire(LaneId::South, Quadrants::NW, at(0));
        assert!(!lock.release(LaneId::North));
        assert_eq!(lock.snapshot().current_lane, Some(LaneId::South));
        assert!(lock.release(LaneId::South));
    }

    #[test]
    fn release_wakes_blocked_acquirer() {
        let lock = Arc::new(IntersectionLock::new());
        lock.acquire(LaneId::North, Quadrants::SE, at(0));

        let waiter = {
            let lock = Arc::clone(&lock);
            std::thread::spawn(move || {
                lock.acquire(LaneId::South, Quadrants::NW, at(1));
                lock.release(LaneId::South)
            })
        };

        // Give the waiter a moment to block, then release.
        std::thread::sleep(Duration::from_millis(50));
        assert!(lock.release(LaneId::North));
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn reset_returns_displaced_holder() {
        let lock = IntersectionLock::new();
        assert_eq!(lock.reset(), None);
        lock.acquire(LaneId::West, Quadrants::all(), at(3));
        assert_eq!(lock.reset(), Some(LaneId::West));
        assert!(lock.snapshot().available);
        assert!(lock.validate());
    }

    #[test]
    fn priority_boost_restores_on_drop() {
        let lanes = build_lanes(20);
        let lock = IntersectionLock::new();

        lanes[LaneId::South.index()].core().set_priority(3);
        lanes[LaneId::North.index()].core().set_priority(1);
        lock.acquire(LaneId::South, Quadrants::NW, at(0));

        {
            let boost = lock
                .handle_priority_inversion(&lanes, LaneId::North)
                .expect("inversion present");
            assert_eq!(boost.holder(), LaneId::South);
            assert_eq!(lanes[LaneId::South.index()].priority(), 1);
        }
        // Guard dropped — original priority restored.
        assert_eq!(lanes[LaneId::South.index()].priority(), 3);
    }

    #[test]
    fn no_boost_without_inversion() {
        let lanes = build_lanes(20);
        let lock = IntersectionLock::new();

        // No holder.
        assert!(lock.handle_priority_inversion(&lanes, LaneId::North).is_none());

        // Holder at least as urgent as waiter.
        lock.acquire(LaneId::East, Quadrants::NW, at(0));
        assert!(lock.handle_priority_inversion(&lanes, LaneId::North).is_none());

        // Waiter is the holder.
        assert!(lock.handle_priority_inversion(&lanes, LaneId::East).is_none());
    }

    #[test]
    fn deadlock_detection_thresholds() {
        let lanes = build_lanes(20);
        assert!(!detect_deadlock(&lanes));

        for id in [LaneId::North, LaneId::South, LaneId::East] {
            lanes[id.index()].set_state(LaneState::Blocked);
        }
        assert!(detect_deadlock(&lanes));
    }

    #[test]
    fn circular_wait_needs_requests() {
        let lanes = build_lanes(20);
        for id in [LaneId::North, LaneId::South, LaneId::East] {
            let lane = &lanes[id.index()];
            lane.admit(1, at(0));
            lane.core().prepare_request(Movement::Left);
        }
        assert!(circular_wait_detected(&lanes));

        lanes[LaneId::North.index()].core().clear_quadrants();
        assert!(!circular_wait_detected(&lanes));
    }

    #[test]
    fn resolution_prefers_emergency_lane() {
        let lanes = build_lanes(20);
        let lock = IntersectionLock::new();
        let bankers = BankersState::new();

        for id in [LaneId::North, LaneId::South, LaneId::East] {
            lanes[id.index()].set_state(LaneState::Blocked);
        }
        lanes[LaneId::East.index()].core().mark_emergency();

        let resolution = resolve_deadlock(&lanes, &lock, &bankers);
        assert_eq!(
            resolution,
            Some(DeadlockResolution::EmergencyUnblocked(LaneId::East))
        );
        assert_eq!(lanes[LaneId::East.index()].state(), LaneState::Ready);
    }

    #[test]
    fn resolution_follows_safe_sequence_when_all_blocked() {
        let lanes = build_lanes(20);
        let lock = IntersectionLock::new();
        let bankers = BankersState::new();

        for lane in &lanes {
            lane.set_state(LaneState::Blocked);
        }
        let first = resolve_deadlock(&lanes, &lock, &bankers).unwrap();
        assert!(matches!(
            first,
            DeadlockResolution::SafeSequenceUnblocked(_)
        ));
    }

    #[test]
    fn resolution_resets_without_safe_sequence() {
        let lanes = build_lanes(20);
        let lock = IntersectionLock::new();
        let bankers = BankersState::new();

        // Exhaust availability without recording allocations so that no
        // lane can finish and no safe sequence exists.
        bankers.set_available([0, 0, 0, 0]);
        assert!(bankers.safe_sequence().is_none());

        for lane in &lanes {
            lane.set_state(LaneState::Blocked);
        }
        lock.acquire(LaneId::North, Quadrants::all(), at(0));

        let resolution = resolve_deadlock(&lanes, &lock, &bankers).unwrap();
        assert_eq!(resolution, DeadlockResolution::SystemReset);
        assert!(lock.snapshot().available);
        assert!(lock.validate());
        assert!(bankers.is_safe_state());
        for lane in &lanes {
            assert_eq!(lane.state(), LaneState::Ready);
        }
    }
}
