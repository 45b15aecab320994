//! Time-sliced lane scheduling.
//!
//! Drives lane selection under one of three pluggable policies, performs
//! context-switch bookkeeping, and keeps a fixed-capacity execution
//! history. The policy adjuncts (MLFQ level tracking, round-robin
//! rotation) live inside the scheduler — no module-level globals.
//!
//! An emergency-flagged ready lane preempts policy selection outright:
//! the next scheduling decision grants it regardless of the active
//! policy.

pub mod mlfq;
pub mod priority_rr;
pub mod sjf;

use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crossway_common::consts::{DEFAULT_TIME_QUANTUM_S, HISTORY_CAPACITY};
use crossway_common::types::{LaneId, LaneState, SchedulingPolicy, SimTime};

use crate::lane::{view_all, LaneSet, LaneView};
use self::mlfq::MlfqTracker;
use self::priority_rr::RoundRobinTracker;

// ─── Execution history ──────────────────────────────────────────────

/// Immutable record of one completed time slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionRecord {
    /// Lane that held the slice.
    pub lane: LaneId,
    /// Slice start.
    pub start: SimTime,
    /// Slice end.
    pub end: SimTime,
    /// Vehicles processed during the slice.
    pub vehicles: u32,
}

impl ExecutionRecord {
    /// Slice duration.
    #[inline]
    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }
}

/// Fixed-capacity ring of execution records.
#[derive(Debug)]
struct ExecutionHistory {
    records: Vec<ExecutionRecord>,
    next: usize,
}

impl ExecutionHistory {
    fn new() -> Self {
        Self {
            records: Vec::with_capacity(HISTORY_CAPACITY),
            next: 0,
        }
    }

    fn push(&mut self, record: ExecutionRecord) {
        if self.records.len() < HISTORY_CAPACITY {
            self.records.push(record);
        } else {
            self.records[self.next] = record;
        }
        self.next = (self.next + 1) % HISTORY_CAPACITY;
    }

    /// Records in chronological order.
    fn snapshot(&self) -> Vec<ExecutionRecord> {
        if self.records.len() < HISTORY_CAPACITY {
            self.records.clone()
        } else {
            let mut out = Vec::with_capacity(HISTORY_CAPACITY);
            out.extend_from_slice(&self.records[self.next..]);
            out.extend_from_slice(&self.records[..self.next]);
            out
        }
    }

    fn clear(&mut self) {
        self.records.clear();
        self.next = 0;
    }
}

// ─── Scheduler ──────────────────────────────────────────────────────

/// Result of one scheduling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleOutcome {
    /// Chosen lane, or `None` when no lane is ready.
    pub lane: Option<LaneId>,
    /// Whether a context switch occurred (caller incurs the artificial
    /// switch delay).
    pub switched: bool,
    /// Slice quantum chosen by the policy.
    pub quantum: Duration,
}

#[derive(Debug)]
struct SchedulerCore {
    policy: SchedulingPolicy,
    base_quantum: Duration,
    time_quantum: Duration,
    current_lane: Option<LaneId>,
    history: ExecutionHistory,
    context_switches: u64,
    last_schedule: SimTime,
    running: bool,
    mlfq: MlfqTracker,
    rr: RoundRobinTracker,
}

impl SchedulerCore {
    fn new(policy: SchedulingPolicy, base_quantum: Duration) -> Self {
        Self {
            policy,
            base_quantum,
            time_quantum: base_quantum,
            current_lane: None,
            history: ExecutionHistory::new(),
            context_switches: 0,
            last_schedule: SimTime::ZERO,
            running: false,
            mlfq: MlfqTracker::new(),
            rr: RoundRobinTracker::new(),
        }
    }
}

/// The lane scheduler behind its mutex.
#[derive(Debug)]
pub struct Scheduler {
    core: Mutex<SchedulerCore>,
}

impl Scheduler {
    /// Create a stopped scheduler with the given policy and base quantum.
    pub fn new(policy: SchedulingPolicy, base_quantum: Duration) -> Self {
        Self {
            core: Mutex::new(SchedulerCore::new(policy, base_quantum)),
        }
    }

    /// Select the next lane to serve and perform the context switch.
    ///
    /// Snapshots all four lanes, lets the active policy choose among
    /// ready non-blocked lanes (an emergency-flagged ready lane wins
    /// outright), transitions the outgoing and incoming lane states,
    /// and counts the switch.
    pub fn schedule_next_lane(&self, lanes: &LaneSet, now: SimTime) -> ScheduleOutcome {
        let mut core = self.core.lock();
        let views = view_all(lanes, now);

        let pick = emergency_pick(&views).or_else(|| match core.policy {
            SchedulingPolicy::Sjf => {
                core.time_quantum = core.base_quantum;
                sjf::pick(&views)
            }
            SchedulingPolicy::MultilevelFeedback => {
                core.mlfq.update(&views, now);
                apply_mlfq_priorities(&core.mlfq, lanes, &views);
                let picked = core.mlfq.pick(&views);
                if let Some((lane, quantum)) = picked {
                    core.time_quantum = quantum;
                    Some(lane)
                } else {
                    None
                }
            }
            SchedulingPolicy::PriorityRoundRobin => {
                core.rr.update(&views);
                core.time_quantum = Duration::from_secs(crossway_common::consts::RR_TIME_QUANTUM_S);
                core.rr.pick(&views)
            }
        });

        let switched = pick.is_some() && pick != core.current_lane;
        if switched {
            context_switch(lanes, pick);
            core.current_lane = pick;
            core.context_switches += 1;
        } else if let Some(lane) = pick {
            // Same lane keeps the slice; make sure it is marked Running.
            let mut lane_core = lanes[lane.index()].core();
            if lane_core.state() == LaneState::Ready {
                lane_core.set_state(LaneState::Running);
            }
        }

        if let Some(lane) = pick {
            core.rr.note_service(lane, now);
        }
        core.last_schedule = now;

        ScheduleOutcome {
            lane: pick,
            switched,
            quantum: core.time_quantum,
        }
    }

    /// Swap the active policy. Called from the UI thread, so this uses
    /// try-lock and skips the frame on contention.
    ///
    /// Setting the already-active policy is a no-op.
    pub fn set_policy(&self, policy: SchedulingPolicy) -> bool {
        let Some(mut core) = self.core.try_lock() else {
            return false;
        };
        if core.policy == policy {
            return true;
        }
        debug!(policy = policy.name(), "scheduling policy changed");
        core.policy = policy;
        core.current_lane = None;
        core.time_quantum = core.base_quantum;
        core.mlfq.reset();
        core.rr.reset();
        true
    }

    /// Active policy (try-lock read; falls back to SJF on contention).
    pub fn policy(&self) -> SchedulingPolicy {
        self.core
            .try_lock()
            .map(|core| core.policy)
            .unwrap_or_default()
    }

    /// Lane currently holding the slice.
    pub fn current_lane(&self) -> Option<LaneId> {
        self.core.lock().current_lane
    }

    /// Forget the current selection (emergency preemption path).
    pub fn clear_current_lane(&self) {
        self.core.lock().current_lane = None;
    }

    /// Monotonically non-decreasing context-switch count.
    pub fn context_switches(&self) -> u64 {
        self.core.lock().context_switches
    }

    /// Quantum chosen by the last scheduling decision.
    pub fn time_quantum(&self) -> Duration {
        self.core.lock().time_quantum
    }

    /// Append a completed slice to the history ring.
    pub fn record_execution(&self, record: ExecutionRecord) {
        self.core.lock().history.push(record);
    }

    /// Chronological copy of the execution history.
    pub fn history_snapshot(&self) -> Vec<ExecutionRecord> {
        self.core.lock().history.snapshot()
    }

    /// Mark the scheduler running.
    pub fn start(&self) {
        self.core.lock().running = true;
    }

    /// Mark the scheduler stopped.
    pub fn stop(&self) {
        self.core.lock().running = false;
    }

    pub fn is_running(&self) -> bool {
        self.core.lock().running
    }

    /// Reinitialize selection state and history; the context-switch
    /// counter is preserved (it is monotonic by contract).
    pub fn reset(&self) {
        let mut core = self.core.lock();
        core.current_lane = None;
        core.time_quantum = core.base_quantum;
        core.history.clear();
        core.mlfq.reset();
        core.rr.reset();
    }

    /// MLFQ level for diagnostics.
    pub fn mlfq_level(&self, lane: LaneId) -> mlfq::MlfqLevel {
        self.core.lock().mlfq.level(lane)
    }
}

/// An emergency-flagged ready lane preempts policy selection.
fn emergency_pick(views: &[LaneView; 4]) -> Option<LaneId> {
    views
        .iter()
        .find(|view| view.emergency && view.ready && !view.blocked)
        .map(|view| view.id)
}

/// Write MLFQ-derived priorities back onto the lanes (levels map to
/// priorities 1..=3). Emergency-flagged lanes keep their reserved value.
fn apply_mlfq_priorities(tracker: &MlfqTracker, lanes: &LaneSet, views: &[LaneView; 4]) {
    for view in views {
        if view.emergency {
            continue;
        }
        lanes[view.id.index()]
            .core()
            .set_priority(tracker.lane_priority(view.id));
    }
}

/// Transition every outgoing lane out of Running and the incoming lane
/// into Running.
///
/// Demoting all running lanes (not just the tracked one) keeps the
/// single-RUNNING invariant even after the current selection was
/// cleared by a policy change or an emergency preemption.
fn context_switch(lanes: &LaneSet, to: Option<LaneId>) {
    for lane in lanes {
        let mut core = lane.core();
        if core.state() == LaneState::Running && Some(core.id()) != to {
            core.finish_slice();
        }
    }
    if let Some(to) = to {
        let mut core = lanes[to.index()].core();
        if core.state() == LaneState::Ready {
            core.set_state(LaneState::Running);
        }
    }
}

/// Default quantum helper for construction sites.
pub fn default_quantum() -> Duration {
    Duration::from_secs(DEFAULT_TIME_QUANTUM_S)
}

// ─── Tests ──────────────────────────────────────────────────────────
