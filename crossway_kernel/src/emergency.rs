//! Emergency-vehicle detection, preemption, and clearance tracking.
//!
//! A pseudo-random draw on each scheduling tick may produce an
//! emergency vehicle on a random lane. The subsystem holds a single
//! active emergency at a time; while one is in flight, further
//! detections are dropped. Clearance is time-based: once the crossing
//! duration has elapsed, normal scheduling resumes and the response
//! time is folded into the running statistics.

use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crossway_common::consts::{
    DEFAULT_EMERGENCY_DRAW_ODDS, EMERGENCY_APPROACH_RANGE_S, EMERGENCY_CROSSING_RANGE_S,
    EMERGENCY_PRIORITY,
};
use crossway_common::types::{LaneId, SimTime, VehicleId};

/// Kind of emergency vehicle. All kinds map to the reserved priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmergencyKind {
    /// Medical response.
    Ambulance,
    /// Fire response.
    FireTruck,
    /// Police response.
    Police,
}

impl EmergencyKind {
    const ALL: [Self; 3] = [Self::Ambulance, Self::FireTruck, Self::Police];

    /// Display name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ambulance => "Ambulance",
            Self::FireTruck => "Fire Truck",
            Self::Police => "Police",
        }
    }
}

/// An emergency vehicle in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmergencyVehicle {
    /// Vehicle kind.
    pub kind: EmergencyKind,
    /// Target lane.
    pub lane: LaneId,
    /// Vehicle identifier.
    pub vehicle: VehicleId,
    /// Sampled approach time.
    pub approach: Duration,
    /// Sampled crossing duration.
    pub crossing: Duration,
    /// Priority level (always the reserved emergency value).
    pub priority: u8,
    /// When the emergency was received.
    pub received_at: SimTime,
}

/// A completed emergency, reported at clearance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearedEmergency {
    /// The vehicle that crossed.
    pub vehicle: EmergencyVehicle,
    /// Receipt-to-clearance response time.
    pub response_time: Duration,
}

#[derive(Debug)]
struct EmergencyCore {
    current: Option<EmergencyVehicle>,
    emergency_mode: bool,
    started_at: Option<SimTime>,
    preempt_enabled: bool,
    draw_odds: u32,
    handled: u64,
    total_response: Duration,
    rng: SmallRng,
    next_vehicle_id: VehicleId,
}

impl EmergencyCore {
    fn sample(&mut self, lane: Option<LaneId>, now: SimTime) -> EmergencyVehicle {
        let kind = EmergencyKind::ALL[self.rng.gen_range(0..3)];
        let lane = lane.unwrap_or_else(|| {
            LaneId::from_index(self.rng.gen_range(0..4)).unwrap_or(LaneId::North)
        });
        let (app_min, app_max) = EMERGENCY_APPROACH_RANGE_S;
        let (cross_min, cross_max) = EMERGENCY_CROSSING_RANGE_S;
        let vehicle = self.next_vehicle_id;
        self.next_vehicle_id += 1;
        EmergencyVehicle {
            kind,
            lane,
            vehicle,
            approach: Duration::from_secs(self.rng.gen_range(app_min..app_max)),
            crossing: Duration::from_secs(self.rng.gen_range(cross_min..cross_max)),
            priority: EMERGENCY_PRIORITY,
            received_at: now,
        }
    }

    fn install(&mut self, emergency: EmergencyVehicle, now: SimTime) -> Option<EmergencyVehicle> {
        if self.current.is_some() {
            // Single-slot policy: a second emergency is dropped.
            debug!(
                kind = emergency.kind.name(),
                lane = %emergency.lane,
                "emergency already active, dropping new detection"
            );
            return None;
        }
        info!(
            kind = emergency.kind.name(),
            lane = %emergency.lane,
            vehicle = emergency.vehicle,
            crossing_s = emergency.crossing.as_secs_f64(),
            "emergency detected"
        );
        self.current = Some(emergency);
        self.emergency_mode = true;
        self.started_at = Some(now);
        Some(emergency)
    }
}

/// The emergency subsystem behind its mutex.
#[derive(Debug)]
pub struct EmergencySystem {
    core: Mutex<EmergencyCore>,
}

impl EmergencySystem {
    /// Create an idle subsystem.
    ///
    /// `seed` fixes the detection RNG for reproducible runs; `None`
    /// seeds from entropy.
    pub fn new(preempt_enabled: bool, draw_odds: u32, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Self {
            core: Mutex::new(EmergencyCore {
                current: None,
                emergency_mode: false,
                started_at: None,
                preempt_enabled,
                draw_odds: draw_odds.max(2),
                handled: 0,
                total_response: Duration::ZERO,
                rng,
                next_vehicle_id: 900_000,
            }),
        }
    }

    /// Defaults: preemption on, 1-in-200 odds, entropy-seeded.
    pub fn with_defaults() -> Self {
        Self::new(true, DEFAULT_EMERGENCY_DRAW_ODDS, None)
    }

    /// Per-tick detection draw. With probability `1/draw_odds` an
    /// emergency is generated on a random lane; it becomes the active
    /// emergency unless one is already in flight.
    pub fn maybe_detect(&self, now: SimTime) -> Option<EmergencyVehicle> {
        let mut core = self.core.lock();
        let odds = core.draw_odds;
        if core.rng.gen_range(0..odds) != 0 {
            return None;
        }
        let emergency = core.sample(None, now);
        core.install(emergency, now)
    }

    /// Operator injection of an emergency on a specific lane.
    pub fn inject(&self, lane: LaneId, now: SimTime) -> Option<EmergencyVehicle> {
        let mut core = self.core.lock();
        let emergency = core.sample(Some(lane), now);
        core.install(emergency, now)
    }

    /// Clearance tick: once the crossing duration has elapsed, clear
    /// the emergency, leave emergency mode, and fold the response time
    /// into the statistics.
    pub fn tick_clearance(&self, now: SimTime) -> Option<ClearedEmergency> {
        let mut core = self.core.lock();
        let emergency = core.current?;
        let started = core.started_at?;
        if now.saturating_sub(started) < emergency.crossing {
            return None;
        }

        let response_time = now.saturating_sub(emergency.received_at);
        core.current = None;
        core.emergency_mode = false;
        core.started_at = None;
        core.handled += 1;
        core.total_response += response_time;
        info!(
            kind = emergency.kind.name(),
            lane = %emergency.lane,
            response_s = response_time.as_secs_f64(),
            "emergency cleared, resuming normal scheduling"
        );
        Some(ClearedEmergency {
            vehicle: emergency,
            response_time,
        })
    }

    /// Whether an emergency is currently in flight.
    pub fn is_active(&self) -> bool {
        self.core.lock().current.is_some()
    }

    /// Whether emergency mode is engaged.
    pub fn emergency_mode(&self) -> bool {
        self.core.lock().emergency_mode
    }

    /// The active emergency, if any.
    pub fn current(&self) -> Option<EmergencyVehicle> {
        self.core.lock().current
    }

    /// Whether preemption may forcibly clear the intersection.
    pub fn preempt_enabled(&self) -> bool {
        self.core.lock().preempt_enabled
    }

    /// Emergencies handled and average response time.
    pub fn stats(&self) -> (u64, Duration) {
        let core = self.core.lock();
        let average = if core.handled == 0 {
            Duration::ZERO
        } else {
            core.total_response / core.handled as u32
        };
        (core.handled, average)
    }

    /// Drop any active emergency and zero the statistics.
    pub fn reset(&self) {
        let mut core = self.core.lock();
        core.current = None;
        core.emergency_mode = false;
        core.started_at = None;
        core.handled = 0;
        core.total_response = Duration::ZERO;
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
