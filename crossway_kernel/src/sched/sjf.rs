//! Shortest Job First lane selection.
//!
//! The job length estimate is `queue_length × VEHICLE_CROSS_TIME`; ties
//! break by earliest last arrival (FIFO order between equal queues).
//! Two optional refinements are provided: aging (waiting time discounts
//! the estimate) and burst-time prediction from historical throughput.

use std::time::Duration;

use crossway_common::consts::VEHICLE_CROSS_TIME_S;
use crossway_common::types::{LaneId, SimTime};

use crate::lane::LaneView;

#[inline]
fn estimated_time(view: &LaneView) -> u64 {
    view.queue_len as u64 * VEHICLE_CROSS_TIME_S
}

#[inline]
fn eligible(view: &LaneView) -> bool {
    view.ready && !view.blocked
}

/// Pick the ready lane with the shortest estimated processing time.
pub fn pick(views: &[LaneView; 4]) -> Option<LaneId> {
    let mut best: Option<&LaneView> = None;

    for view in views.iter().filter(|v| eligible(v)) {
        best = match best {
            None => Some(view),
            Some(current) => {
                let (t_new, t_cur) = (estimated_time(view), estimated_time(current));
                if t_new < t_cur {
                    Some(view)
                } else if t_new == t_cur && arrival_key(view) < arrival_key(current) {
                    Some(view)
                } else {
                    Some(current)
                }
            }
        };
    }

    best.map(|view| view.id)
}

#[inline]
fn arrival_key(view: &LaneView) -> SimTime {
    view.last_arrival.unwrap_or(Duration::MAX)
}

/// SJF with aging: `score = estimated_time − 0.1 × waiting_time`, so a
/// long-waiting lane eventually beats a shorter queue.
pub fn pick_with_aging(views: &[LaneView; 4]) -> Option<LaneId> {
    let mut best: Option<(f64, LaneId)> = None;

    for view in views.iter().filter(|v| eligible(v)) {
        let score = estimated_time(view) as f64 - 0.1 * view.waiting.as_secs_f64();
        match best {
            Some((best_score, _)) if score >= best_score => {}
            _ => best = Some((score, view.id)),
        }
    }

    best.map(|(_, id)| id)
}

/// Predictive SJF: estimates per-vehicle service time from the lane's
/// historical throughput instead of the fixed cross time.
pub fn pick_predictive(views: &[LaneView; 4], elapsed: Duration) -> Option<LaneId> {
    let minutes = elapsed.as_secs_f64() / 60.0;
    let mut best: Option<(f64, LaneId)> = None;

    for view in views.iter().filter(|v| eligible(v)) {
        let throughput_per_min = if minutes > 0.0 {
            view.total_served as f64 / minutes
        } else {
            0.0
        };
        let avg_service = if throughput_per_min > 0.0 {
            60.0 / throughput_per_min
        } else {
            VEHICLE_CROSS_TIME_S as f64
        };
        let predicted = view.queue_len as f64 * avg_service;
        match best {
            Some((best_time, _)) if predicted >= best_time => {}
            _ => best = Some((predicted, view.id)),
        }
    }

    best.map(|(_, id)| id)
}
