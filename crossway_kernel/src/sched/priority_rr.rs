//! Priority Round Robin lane selection.
//!
//! Lanes are classified into three priority classes from runtime state
//! (EMERGENCY, NORMAL for busy lanes, LOW otherwise) and served
//! EMERGENCY → NORMAL → LOW with a rotating index inside each class.
//! A fairness refinement boosts lanes that have gone unserved too long;
//! an adaptive refinement tunes the quantum to the system load.

use std::time::Duration;

use crossway_common::consts::{
    RR_FAIRNESS_BOOST_S, RR_HEAVY_LOAD_QUANTUM_S, RR_HEAVY_LOAD_QUEUE_LEN,
    RR_LIGHT_LOAD_QUANTUM_S, RR_LIGHT_LOAD_QUEUE_LEN, RR_NORMAL_QUEUE_THRESHOLD,
    RR_TIME_QUANTUM_S,
};
use crossway_common::types::{LaneId, SimTime};

use crate::lane::LaneView;

/// Priority class for round-robin service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RrClass {
    /// Emergency vehicles present.
    Emergency,
    /// Busy lane (queue above the NORMAL threshold).
    Normal,
    /// Lightly-loaded lane.
    Low,
}

impl RrClass {
    /// Service order, most urgent first.
    pub const ORDER: [Self; 3] = [Self::Emergency, Self::Normal, Self::Low];
}

/// Per-lane round-robin bookkeeping.
#[derive(Debug, Clone, Copy)]
struct LaneRrInfo {
    class: RrClass,
    last_service: Option<SimTime>,
    service_count: u64,
}

impl LaneRrInfo {
    const fn new() -> Self {
        Self {
            class: RrClass::Normal,
            last_service: None,
            service_count: 0,
        }
    }
}

/// Round-robin tracking for the four lanes.
#[derive(Debug)]
pub struct RoundRobinTracker {
    info: [LaneRrInfo; 4],
    next_index: usize,
}

impl Default for RoundRobinTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundRobinTracker {
    pub const fn new() -> Self {
        Self {
            info: [LaneRrInfo::new(); 4],
            next_index: 0,
        }
    }

    /// Reclassify every lane from its current view.
    pub fn update(&mut self, views: &[LaneView; 4]) {
        for view in views {
            let info = &mut self.info[view.id.index()];
            info.class = if view.emergency || view.priority == 1 {
                RrClass::Emergency
            } else if view.queue_len > RR_NORMAL_QUEUE_THRESHOLD {
                RrClass::Normal
            } else {
                RrClass::Low
            };
        }
    }

    /// Next ready lane of the given class in rotation order, advancing
    /// the rotating index past it.
    fn next_in_class(&mut self, views: &[LaneView; 4], class: RrClass) -> Option<LaneId> {
        for offset in 0..4 {
            let index = (self.next_index + offset) % 4;
            let view = &views[index];
            if view.ready && !view.blocked && self.info[index].class == class {
                self.next_index = (index + 1) % 4;
                return Some(view.id);
            }
        }
        None
    }

    /// Scan EMERGENCY → NORMAL → LOW with per-class rotation.
    pub fn pick(&mut self, views: &[LaneView; 4]) -> Option<LaneId> {
        for class in RrClass::ORDER {
            if let Some(lane) = self.next_in_class(views, class) {
                return Some(lane);
            }
        }
        None
    }

    /// Fairness refinement: a LOW lane unserved for longer than the
    /// boost threshold is lifted to NORMAL before the scan.
    pub fn pick_fair(&mut self, views: &[LaneView; 4], now: SimTime) -> Option<LaneId> {
        for view in views {
            let info = &mut self.info[view.id.index()];
            let idle = now.saturating_sub(info.last_service.unwrap_or(SimTime::ZERO));
            if info.class == RrClass::Low && idle > Duration::from_secs(RR_FAIRNESS_BOOST_S) {
                info.class = RrClass::Normal;
            }
        }
        self.pick(views)
    }

    /// Adaptive quantum: tighten under heavy load, loosen when idle.
    pub fn adaptive_quantum(views: &[LaneView; 4]) -> Duration {
        let ready: Vec<&LaneView> = views.iter().filter(|v| v.ready).collect();
        if ready.is_empty() {
            return Duration::from_secs(RR_TIME_QUANTUM_S);
        }
        let avg_queue =
            ready.iter().map(|v| v.queue_len).sum::<usize>() as f64 / ready.len() as f64;
        let quantum_s = if avg_queue > RR_HEAVY_LOAD_QUEUE_LEN {
            RR_HEAVY_LOAD_QUANTUM_S
        } else if avg_queue < RR_LIGHT_LOAD_QUEUE_LEN {
            RR_LIGHT_LOAD_QUANTUM_S
        } else {
            RR_TIME_QUANTUM_S
        };
        Duration::from_secs(quantum_s)
    }

    /// Record a grant for fairness accounting.
    pub fn note_service(&mut self, lane: LaneId, now: SimTime) {
        let info = &mut self.info[lane.index()];
        info.last_service = Some(now);
        info.service_count += 1;
    }

    /// Grants recorded for a lane.
    #[inline]
    pub fn service_count(&self, lane: LaneId) -> u64 {
        self.info[lane.index()].service_count
    }

    /// Current class of a lane.
    #[inline]
    pub fn class(&self, lane: LaneId) -> RrClass {
        self.info[lane.index()].class
    }

    /// Back to the initial state with the rotation at lane 0.
    pub fn reset(&mut self) {
        self.info = [LaneRrInfo::new(); 4];
        self.next_index = 0;
    }
}
