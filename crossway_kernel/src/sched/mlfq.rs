//! Multilevel Feedback Queue lane selection.
//!
//! Three priority levels with per-level time quanta. Lanes are promoted
//! when they wait too long, force-promoted to HIGH once they have sat in
//! a level past the aging threshold (starvation guard), and demoted
//! after too many consecutive running observations. Selection scans
//! HIGH → LOW; within a level the longest-waiting lane wins.

use std::time::Duration;

use crossway_common::consts::{
    MLFQ_AGING_THRESHOLD_S, MLFQ_DEMOTION_THRESHOLD_RUNS, MLFQ_LEVEL_QUANTA_S,
    MLFQ_PROMOTION_THRESHOLD_S,
};
use crossway_common::types::{LaneId, LaneState, SimTime};

use crate::lane::LaneView;

/// MLFQ priority level. HIGH is served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum MlfqLevel {
    /// Served first, shortest quantum.
    High = 0,
    /// Default level for fresh lanes.
    Medium = 1,
    /// Served last, longest quantum.
    Low = 2,
}

impl MlfqLevel {
    /// All levels, highest first.
    pub const ALL: [Self; 3] = [Self::High, Self::Medium, Self::Low];

    /// Time quantum granted at this level.
    pub const fn quantum(self) -> Duration {
        Duration::from_secs(MLFQ_LEVEL_QUANTA_S[self as usize])
    }

    const fn promoted(self) -> Self {
        match self {
            Self::High | Self::Medium => Self::High,
            Self::Low => Self::Medium,
        }
    }

    const fn demoted(self) -> Self {
        match self {
            Self::High => Self::Medium,
            Self::Medium | Self::Low => Self::Low,
        }
    }
}

/// Per-lane feedback state.
#[derive(Debug, Clone, Copy)]
struct LanePriorityInfo {
    level: MlfqLevel,
    last_promotion: SimTime,
    consecutive_runs: u32,
}

impl LanePriorityInfo {
    const fn new() -> Self {
        Self {
            level: MlfqLevel::Medium,
            last_promotion: SimTime::ZERO,
            consecutive_runs: 0,
        }
    }
}

/// Feedback-queue tracking for the four lanes.
#[derive(Debug)]
pub struct MlfqTracker {
    info: [LanePriorityInfo; 4],
}

impl Default for MlfqTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl MlfqTracker {
    /// All lanes start at MEDIUM with zeroed counters.
    pub const fn new() -> Self {
        Self {
            info: [LanePriorityInfo::new(); 4],
        }
    }

    /// Apply promotion, aging, and demotion rules from the current views.
    pub fn update(&mut self, views: &[LaneView; 4], now: SimTime) {
        for view in views {
            let info = &mut self.info[view.id.index()];

            // Promotion: waited past the threshold.
            if view.waiting > Duration::from_secs(MLFQ_PROMOTION_THRESHOLD_S)
                && info.level > MlfqLevel::High
            {
                info.level = info.level.promoted();
                info.last_promotion = now;
                info.consecutive_runs = 0;
            }

            // Aging: force-promote to HIGH after too long in one level.
            let time_in_level = now.saturating_sub(info.last_promotion);
            if time_in_level > Duration::from_secs(MLFQ_AGING_THRESHOLD_S)
                && info.level > MlfqLevel::High
            {
                info.level = MlfqLevel::High;
                info.last_promotion = now;
                info.consecutive_runs = 0;
            }

            if view.state == LaneState::Running {
                info.consecutive_runs += 1;
                // Demotion: hogged the intersection for too many slices.
                if info.consecutive_runs > MLFQ_DEMOTION_THRESHOLD_RUNS
                    && info.level < MlfqLevel::Low
                {
                    info.level = info.level.demoted();
                    info.consecutive_runs = 0;
                }
            } else {
                info.consecutive_runs = 0;
            }
        }
    }

    /// Scan HIGH → LOW; within a level pick the longest-waiting ready
    /// lane. Returns the lane and the level's quantum.
    pub fn pick(&self, views: &[LaneView; 4]) -> Option<(LaneId, Duration)> {
        for level in MlfqLevel::ALL {
            let best = views
                .iter()
                .filter(|view| {
                    view.ready && !view.blocked && self.info[view.id.index()].level == level
                })
                .max_by_key(|view| view.waiting);
            if let Some(view) = best {
                return Some((view.id, level.quantum()));
            }
        }
        None
    }

    /// Current level of a lane.
    #[inline]
    pub fn level(&self, lane: LaneId) -> MlfqLevel {
        self.info[lane.index()].level
    }

    /// Lane priority derived from the level (1-based: HIGH=1 … LOW=3).
    #[inline]
    pub fn lane_priority(&self, lane: LaneId) -> u8 {
        self.info[lane.index()].level as u8 + 1
    }

    /// Consecutive running observations for a lane.
    #[inline]
    pub fn consecutive_runs(&self, lane: LaneId) -> u32 {
        self.info[lane.index()].consecutive_runs
    }

    /// Back to the initial all-MEDIUM state.
    pub fn reset(&mut self) {
        self.info = [LanePriorityInfo::new(); 4];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lane::{build_lanes, view_all, LaneSet};

    fn at(secs: u64) -> SimTime {
        Duration::from_secs(secs)
    }

    fn ticked(tracker: &mut MlfqTracker, lanes: &LaneSet, now: SimTime) {
        let views = view_all(lanes, now);
        tracker.update(&views, now);
    }

    #[test]
    fn fresh_lanes_start_medium() {
        let tracker = MlfqTracker::new();
        for lane in LaneId::ALL {
            assert_eq!(tracker.level(lane), MlfqLevel::Medium);
            assert_eq!(tracker.lane_priority(lane), 2);
        }
    }

    #[test]
    fn long_wait_earns_promotion() {
        let lanes = build_lanes(20);
        lanes[LaneId::South.index()].admit(1, at(0));
        let mut tracker = MlfqTracker::new();

        ticked(&mut tracker, &lanes, at(5));
        assert_eq!(tracker.level(LaneId::South), MlfqLevel::Medium);

        // Waiting exceeds the 10 s promotion threshold.
        ticked(&mut tracker, &lanes, at(11));
        assert_eq!(tracker.level(LaneId::South), MlfqLevel::High);
        assert_eq!(tracker.lane_priority(LaneId::South), 1);
    }

    #[test]
    fn aging_forces_promotion_without_wait_trigger() {
        let lanes = build_lanes(20);
        let mut tracker = MlfqTracker::new();
        // Demote West to LOW first so aging has distance to cover.
        tracker.info[LaneId::West.index()].level = MlfqLevel::Low;
        tracker.info[LaneId::West.index()].last_promotion = at(0);

        // Lane has nothing queued (waiting stays zero), but has sat in
        // LOW past the 15 s aging threshold.
        ticked(&mut tracker, &lanes, at(16));
        assert_eq!(tracker.level(LaneId::West), MlfqLevel::High);
    }

    #[test]
    fn sustained_running_earns_demotion() {
        let lanes = build_lanes(20);
        let north = &lanes[LaneId::North.index()];
        for v in 0..10 {
            north.admit(v, at(0));
        }
        north.set_state(LaneState::Running);

        let mut tracker = MlfqTracker::new();
        // Six consecutive running observations inside the aging window.
        for tick in 1..=6 {
            ticked(&mut tracker, &lanes, at(tick));
        }
        assert_eq!(tracker.level(LaneId::North), MlfqLevel::Low);
    }

    #[test]
    fn non_running_observation_resets_run_streak() {
        let lanes = build_lanes(20);
        let north = &lanes[LaneId::North.index()];
        north.admit(1, at(0));
        north.set_state(LaneState::Running);

        let mut tracker = MlfqTracker::new();
        ticked(&mut tracker, &lanes, at(1));
        ticked(&mut tracker, &lanes, at(2));
        assert_eq!(tracker.consecutive_runs(LaneId::North), 2);

        north.set_state(LaneState::Ready);
        ticked(&mut tracker, &lanes, at(3));
        assert_eq!(tracker.consecutive_runs(LaneId::North), 0);
    }

    #[test]
    fn selection_scans_high_to_low() {
        let lanes = build_lanes(20);
        lanes[LaneId::North.index()].admit(1, at(0));
        lanes[LaneId::East.index()].admit(2, at(0));

        let mut tracker = MlfqTracker::new();
        tracker.info[LaneId::North.index()].level = MlfqLevel::Low;
        tracker.info[LaneId::East.index()].level = MlfqLevel::High;

        let views = view_all(&lanes, at(1));
        let (lane, quantum) = tracker.pick(&views).unwrap();
        assert_eq!(lane, LaneId::East);
        assert_eq!(quantum, Duration::from_secs(2));
    }

    #[test]
    fn longest_waiting_wins_within_level() {
        let lanes = build_lanes(20);
        lanes[LaneId::North.index()].admit(1, at(4));
        lanes[LaneId::West.index()].admit(2, at(1));

        let tracker = MlfqTracker::new();
        let views = view_all(&lanes, at(5));
        let (lane, quantum) = tracker.pick(&views).unwrap();
        assert_eq!(lane, LaneId::West);
        // MEDIUM level quantum.
        assert_eq!(quantum, Duration::from_secs(4));
    }

    #[test]
    fn starvation_guard_schedules_waiter_within_deadline() {
        // One lane hogs the intersection while another waits: the hog is
        // demoted and the waiter promoted and selected before t=20 s.
        let lanes = build_lanes(20);
        let north = &lanes[LaneId::North.index()];
        let south = &lanes[LaneId::South.index()];
        for v in 0..15 {
            north.admit(v, at(0));
        }
        south.admit(100, at(0));
        north.set_state(LaneState::Running);

        let mut tracker = MlfqTracker::new();
        let mut south_selected_at = None;
        for tick in 1..=20u64 {
            let views = view_all(&lanes, at(tick));
            tracker.update(&views, at(tick));
            if let Some((lane, _)) = tracker.pick(&views) {
                if lane == LaneId::South {
                    south_selected_at = Some(tick);
                    break;
                }
            }
        }

        let selected_at = south_selected_at.expect("South must be scheduled");
        assert!(selected_at < 20, "selected at t={selected_at}");
        assert_eq!(tracker.level(LaneId::North), MlfqLevel::Low);
    }
}
