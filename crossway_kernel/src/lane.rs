//! Lane process: per-approach schedulable state.
//!
//! Each of the four approaches is modelled as a process with a bounded
//! vehicle queue, a four-state lifecycle (Waiting/Ready/Running/Blocked),
//! a scheduling priority, service counters, and the quadrant masks used
//! by the allocation layers.
//!
//! `LaneCore` is the lock-free core; `Lane` is the thin thread-safe
//! wrapper that acquires the lane mutex once per operation. Compound
//! operations lock the core explicitly via [`Lane::core`].

use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tracing::trace;

use crossway_common::consts::{DEFAULT_LANE_PRIORITY, EMERGENCY_PRIORITY};
use crossway_common::types::{LaneId, LaneState, Movement, Quadrants, SimTime, VehicleId};

use crate::queue::VehicleQueue;

// ─── Core (caller holds lock) ───────────────────────────────────────

/// Mutable lane state. All methods assume the enclosing mutex is held.
#[derive(Debug)]
pub struct LaneCore {
    id: LaneId,
    queue: VehicleQueue,
    state: LaneState,
    priority: u8,
    emergency_override: bool,
    last_arrival: Option<SimTime>,
    last_service: Option<SimTime>,
    total_served: u64,
    total_waiting: Duration,
    requested_quadrants: Quadrants,
    allocated_quadrants: Quadrants,
}

impl LaneCore {
    fn new(id: LaneId, queue_capacity: usize) -> Self {
        Self {
            id,
            queue: VehicleQueue::new(queue_capacity),
            state: LaneState::Waiting,
            priority: DEFAULT_LANE_PRIORITY,
            emergency_override: false,
            last_arrival: None,
            last_service: None,
            total_served: 0,
            total_waiting: Duration::ZERO,
            requested_quadrants: Quadrants::empty(),
            allocated_quadrants: Quadrants::empty(),
        }
    }

    /// Lane identifier.
    #[inline]
    pub const fn id(&self) -> LaneId {
        self.id
    }

    /// Current process state.
    #[inline]
    pub const fn state(&self) -> LaneState {
        self.state
    }

    /// Force a state transition.
    #[inline]
    pub fn set_state(&mut self, state: LaneState) {
        self.state = state;
    }

    /// Scheduling priority (lower = more urgent; 1 is emergency).
    #[inline]
    pub const fn priority(&self) -> u8 {
        self.priority
    }

    #[inline]
    pub fn set_priority(&mut self, priority: u8) {
        self.priority = priority;
    }

    /// Out-of-band emergency marker, independent of the priority integer.
    #[inline]
    pub const fn emergency_override(&self) -> bool {
        self.emergency_override
    }

    /// Flag the lane for emergency service: sets the marker and raises
    /// the priority to the reserved emergency value.
    pub fn mark_emergency(&mut self) {
        self.emergency_override = true;
        self.priority = EMERGENCY_PRIORITY;
    }

    /// Clear the emergency marker and restore the default priority.
    pub fn clear_emergency(&mut self) {
        self.emergency_override = false;
        self.priority = DEFAULT_LANE_PRIORITY;
    }

    /// Enqueue an arriving vehicle.
    ///
    /// A vehicle landing on an empty Waiting lane transitions it to
    /// Ready. Returns `false` on queue overflow (counted in the queue).
    pub fn admit(&mut self, vehicle: VehicleId, now: SimTime) -> bool {
        if !self.queue.enqueue(vehicle) {
            return false;
        }
        self.last_arrival = Some(now);
        if self.state == LaneState::Waiting {
            self.state = LaneState::Ready;
        }
        true
    }

    /// Dequeue the front vehicle and charge its waiting time.
    ///
    /// The per-vehicle wait is `now − last_arrival`, accumulated into
    /// the lane totals. Returns the vehicle and its wait, or `None`
    /// when the queue is empty.
    pub fn take_vehicle(&mut self, now: SimTime) -> Option<(VehicleId, Duration)> {
        let vehicle = self.queue.dequeue()?;
        let wait = self
            .last_arrival
            .map(|arrival| now.saturating_sub(arrival))
            .unwrap_or(Duration::ZERO);
        self.total_waiting += wait;
        self.total_served += 1;
        self.last_service = Some(now);
        trace!(lane = %self.id, vehicle, wait_s = wait.as_secs_f64(), "vehicle served");
        Some((vehicle, wait))
    }

    /// End-of-slice transition: Running → Ready when vehicles remain,
    /// Running → Waiting when the queue drained.
    pub fn finish_slice(&mut self) {
        if self.state == LaneState::Running {
            self.state = if self.queue.is_empty() {
                LaneState::Waiting
            } else {
                LaneState::Ready
            };
        }
    }

    /// Eligible for selection: Ready or Running with a non-empty queue.
    #[inline]
    pub fn is_ready(&self) -> bool {
        matches!(self.state, LaneState::Ready | LaneState::Running) && !self.queue.is_empty()
    }

    #[inline]
    pub fn is_blocked(&self) -> bool {
        self.state == LaneState::Blocked
    }

    /// How long the lane has been waiting for service: time since the
    /// last service, or since the last arrival if never serviced.
    /// Zero when nothing is queued.
    pub fn waiting_time(&self, now: SimTime) -> Duration {
        if self.queue.is_empty() {
            return Duration::ZERO;
        }
        match self.last_service.or(self.last_arrival) {
            Some(since) => now.saturating_sub(since),
            None => Duration::ZERO,
        }
    }

    /// Record the quadrant claim for the lane's next movement.
    pub fn prepare_request(&mut self, movement: Movement) -> Quadrants {
        let claim = movement.claim(self.id);
        self.requested_quadrants = claim;
        claim
    }

    #[inline]
    pub const fn requested_quadrants(&self) -> Quadrants {
        self.requested_quadrants
    }

    #[inline]
    pub const fn allocated_quadrants(&self) -> Quadrants {
        self.allocated_quadrants
    }

    #[inline]
    pub fn set_allocated_quadrants(&mut self, quadrants: Quadrants) {
        self.allocated_quadrants = quadrants;
    }

    /// Drop both quadrant masks (after release or preemption).
    pub fn clear_quadrants(&mut self) {
        self.requested_quadrants = Quadrants::empty();
        self.allocated_quadrants = Quadrants::empty();
    }

    #[inline]
    pub fn queue(&self) -> &VehicleQueue {
        &self.queue
    }

    #[inline]
    pub fn queue_mut(&mut self) -> &mut VehicleQueue {
        &mut self.queue
    }

    /// Vehicles served over the lane's lifetime.
    #[inline]
    pub const fn total_served(&self) -> u64 {
        self.total_served
    }

    /// Cumulative per-vehicle waiting time.
    #[inline]
    pub const fn total_waiting(&self) -> Duration {
        self.total_waiting
    }

    #[inline]
    pub const fn last_arrival(&self) -> Option<SimTime> {
        self.last_arrival
    }

    #[inline]
    pub const fn last_service(&self) -> Option<SimTime> {
        self.last_service
    }

    /// Average per-vehicle wait, zero before the first service.
    pub fn average_wait(&self) -> Duration {
        if self.total_served == 0 {
            Duration::ZERO
        } else {
            self.total_waiting / self.total_served as u32
        }
    }

    /// Reset to the initial state, keeping the identity and capacity.
    pub fn reset(&mut self) {
        let capacity = self.queue.capacity();
        *self = Self::new(self.id, capacity);
    }

    /// Point-in-time view for the scheduling policies.
    pub fn view(&self, now: SimTime) -> LaneView {
        LaneView {
            id: self.id,
            state: self.state,
            queue_len: self.queue.len(),
            priority: self.priority,
            emergency: self.emergency_override,
            last_arrival: self.last_arrival,
            last_service: self.last_service,
            waiting: self.waiting_time(now),
            total_served: self.total_served,
            ready: self.is_ready(),
            blocked: self.is_blocked(),
        }
    }
}

// ─── Snapshot for policies ──────────────────────────────────────────

/// Immutable per-lane snapshot consumed by the scheduling policies.
#[derive(Debug, Clone, Copy)]
pub struct LaneView {
    /// Lane identifier.
    pub id: LaneId,
    /// Process state at snapshot time.
    pub state: LaneState,
    /// Queued vehicle count.
    pub queue_len: usize,
    /// Scheduling priority.
    pub priority: u8,
    /// Out-of-band emergency marker.
    pub emergency: bool,
    /// Last vehicle arrival.
    pub last_arrival: Option<SimTime>,
    /// Last vehicle service.
    pub last_service: Option<SimTime>,
    /// Time waiting for service.
    pub waiting: Duration,
    /// Vehicles served so far.
    pub total_served: u64,
    /// Eligible for selection.
    pub ready: bool,
    /// Marked by the deadlock detector.
    pub blocked: bool,
}

// ─── Thread-safe wrapper ────────────────────────────────────────────

/// A lane process behind its mutex.
#[derive(Debug)]
pub struct Lane {
    id: LaneId,
    core: Mutex<LaneCore>,
}

impl Lane {
    /// Create a lane in the Waiting state with an empty queue.
    pub fn new(id: LaneId, queue_capacity: usize) -> Self {
        Self {
            id,
            core: Mutex::new(LaneCore::new(id, queue_capacity)),
        }
    }

    /// Lane identifier (lock-free).
    #[inline]
    pub const fn id(&self) -> LaneId {
        self.id
    }

    /// Lock the core for a compound operation.
    #[inline]
    pub fn core(&self) -> MutexGuard<'_, LaneCore> {
        self.core.lock()
    }

    /// Non-blocking core access for snapshot readers.
    #[inline]
    pub fn try_core(&self) -> Option<MutexGuard<'_, LaneCore>> {
        self.core.try_lock()
    }

    /// Enqueue an arriving vehicle. See [`LaneCore::admit`].
    pub fn admit(&self, vehicle: VehicleId, now: SimTime) -> bool {
        self.core.lock().admit(vehicle, now)
    }

    /// Current process state.
    pub fn state(&self) -> LaneState {
        self.core.lock().state()
    }

    pub fn set_state(&self, state: LaneState) {
        self.core.lock().set_state(state);
    }

    pub fn priority(&self) -> u8 {
        self.core.lock().priority()
    }

    pub fn queue_len(&self) -> usize {
        self.core.lock().queue().len()
    }

    pub fn is_ready(&self) -> bool {
        self.core.lock().is_ready()
    }

    /// Point-in-time view for the scheduling policies.
    pub fn view(&self, now: SimTime) -> LaneView {
        self.core.lock().view(now)
    }
}

/// The four lane processes, indexed by [`LaneId`].
pub type LaneSet = [Lane; 4];

/// Build the four lanes with a shared queue capacity.
pub fn build_lanes(queue_capacity: usize) -> LaneSet {
    LaneId::ALL.map(|id| Lane::new(id, queue_capacity))
}

/// Snapshot all four lanes for the scheduling policies.
pub fn view_all(lanes: &LaneSet, now: SimTime) -> [LaneView; 4] {
    [
        lanes[0].view(now),
        lanes[1].view(now),
        lanes[2].view(now),
        lanes[3].view(now),
    ]
}
