//! Simulation tasks: vehicle generation and the schedule/execute tick.
//!
//! Two cooperating tasks share the [`TrafficSystem`] context:
//!
//! - the **generator** admits a vehicle to a random lane at a random
//!   interval inside the configured arrival window;
//! - the **driver** runs the periodic tick — emergency handling,
//!   deadlock sweep, lane selection, crossing grant, one-vehicle slice —
//!   and incurs the artificial context-switch delay when the running
//!   lane changes.
//!
//! Both observe the shared `keep_running` flag at the top of every
//! iteration and exit when the simulation duration elapses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crossway_common::consts::SIMULATION_UPDATE_INTERVAL_MS;
use crossway_common::types::{LaneId, Movement};
use crossway_kernel::system::TrafficSystem;

use crate::snapshot::SystemSnapshot;

/// Status-line cadence, in driver ticks.
const STATUS_EVERY_TICKS: u64 = 16;

fn task_rng(system: &TrafficSystem, stream: u64) -> SmallRng {
    match system.config().simulation.seed {
        Some(seed) => SmallRng::seed_from_u64(seed.wrapping_add(stream)),
        None => SmallRng::from_entropy(),
    }
}

/// Weighted movement choice for the vehicle at the head of a granted
/// lane: mostly straight-through, occasionally turning, rarely a U-turn.
fn random_movement(rng: &mut SmallRng) -> Movement {
    match rng.gen_range(0..100u32) {
        0..=49 => Movement::Straight,
        50..=74 => Movement::Right,
        75..=94 => Movement::Left,
        _ => Movement::UTurn,
    }
}

/// Vehicle-arrival task.
pub async fn run_generator(
    system: Arc<TrafficSystem>,
    keep_running: Arc<AtomicBool>,
    start: Instant,
    duration: Duration,
) {
    let mut rng = task_rng(&system, 1);
    let (min_s, max_s) = (
        system.config().simulation.min_arrival_s,
        system.config().simulation.max_arrival_s,
    );

    while keep_running.load(Ordering::SeqCst) && start.elapsed() < duration {
        let wait_s = rng.gen_range(min_s..=max_s);
        tokio::time::sleep(Duration::from_secs(wait_s)).await;
        if !keep_running.load(Ordering::SeqCst) {
            break;
        }

        let lane = LaneId::from_index(rng.gen_range(0..4)).unwrap_or(LaneId::North);
        let now = start.elapsed();
        if let Some(vehicle) = system.admit_vehicle(lane, now) {
            debug!(lane = %lane, vehicle, "vehicle arrived");
        }
    }
    debug!("vehicle generator finished");
}

/// Schedule/execute tick task.
pub async fn run_driver(
    system: Arc<TrafficSystem>,
    keep_running: Arc<AtomicBool>,
    start: Instant,
    duration: Duration,
) {
    let mut rng = task_rng(&system, 2);
    let context_switch_delay =
        Duration::from_millis(system.config().scheduler.context_switch_ms);
    let mut interval =
        tokio::time::interval(Duration::from_millis(SIMULATION_UPDATE_INTERVAL_MS));
    let mut ticks = 0u64;

    while keep_running.load(Ordering::SeqCst) && start.elapsed() < duration {
        interval.tick().await;
        if system.is_paused() {
            continue;
        }

        let now = start.elapsed();
        let movement = random_movement(&mut rng);
        let outcome = system.step(now, movement);

        if outcome.switched {
            // Artificial context-switch overhead.
            tokio::time::sleep(context_switch_delay).await;
        }

        ticks += 1;
        if ticks % STATUS_EVERY_TICKS == 0 {
            log_status(&system, now);
        }
    }

    system.stop();
    debug!("simulation driver finished");
}

/// Periodic status line assembled from try-lock snapshots; a contended
/// frame is simply skipped.
fn log_status(system: &TrafficSystem, now: Duration) {
    let Some(snapshot) = SystemSnapshot::capture(system, now) else {
        return;
    };
    let queues = snapshot
        .lanes
        .iter()
        .map(|lane| format!("{}:{}", lane.id, lane.queue_len))
        .collect::<Vec<String>>()
        .join(" ");
    let current = snapshot
        .intersection
        .current_lane
        .map(|lane| lane.to_string())
        .unwrap_or_else(|| "-".to_string());
    info!(
        t_s = now.as_secs(),
        policy = snapshot.policy.name(),
        current = %current,
        queues = %queues,
        processed = snapshot
            .metrics
            .map(|m| m.total_vehicles_processed)
            .unwrap_or_default(),
        emergency = snapshot.emergency.is_some(),
        "status"
    );
}
