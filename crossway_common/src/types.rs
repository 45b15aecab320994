//! Vocabulary types for the intersection kernel.
//!
//! All enums use `#[repr(u8)]` for compact layout and stable matrix
//! indexing. Includes the approach/lane identifiers, the quadrant
//! bitmask, vehicle movements with their canonical quadrant claims,
//! the lane process states, and the policy/strategy selectors.

use serde::{Deserialize, Serialize};

use crate::consts::NUM_QUADRANTS;

/// Opaque vehicle identifier. Carries no attributes beyond identity.
pub type VehicleId = u32;

/// Simulation-relative time: elapsed duration since simulation start.
///
/// The kernel never reads the wall clock; every time-dependent operation
/// takes an explicit `SimTime` supplied by the driver.
pub type SimTime = std::time::Duration;

// ─── Lanes ──────────────────────────────────────────────────────────

/// One of the four approaches to the intersection.
///
/// The discriminant doubles as the row index into the Banker's matrices
/// and the per-lane arrays everywhere in the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LaneId {
    /// Northbound approach.
    North = 0,
    /// Southbound approach.
    South = 1,
    /// Eastbound approach.
    East = 2,
    /// Westbound approach.
    West = 3,
}

impl LaneId {
    /// All lanes in index order.
    pub const ALL: [Self; 4] = [Self::North, Self::South, Self::East, Self::West];

    /// Array/matrix row index.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Convert from a raw index. Returns `None` for out-of-range values.
    #[inline]
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::North),
            1 => Some(Self::South),
            2 => Some(Self::East),
            3 => Some(Self::West),
            _ => None,
        }
    }
}

impl std::fmt::Display for LaneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::North => "North",
            Self::South => "South",
            Self::East => "East",
            Self::West => "West",
        };
        write!(f, "{name}")
    }
}

// ─── Quadrants ──────────────────────────────────────────────────────

bitflags::bitflags! {
    /// Physical sub-regions of the intersection, each a unit resource.
    ///
    /// Bit order matches the column index of the Banker's matrices:
    /// NE=0, NW=1, SW=2, SE=3.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Quadrants: u8 {
        /// North-east quadrant.
        const NE = 1 << 0;
        /// North-west quadrant.
        const NW = 1 << 1;
        /// South-west quadrant.
        const SW = 1 << 2;
        /// South-east quadrant.
        const SE = 1 << 3;
    }
}

impl Quadrants {
    /// Unit-resource vector form, indexed NE, NW, SW, SE.
    #[inline]
    pub fn units(self) -> [u8; NUM_QUADRANTS] {
        [
            self.contains(Self::NE) as u8,
            self.contains(Self::NW) as u8,
            self.contains(Self::SW) as u8,
            self.contains(Self::SE) as u8,
        ]
    }

    /// Rebuild a mask from a unit-resource vector (non-zero entries set).
    #[inline]
    pub fn from_units(units: [u8; NUM_QUADRANTS]) -> Self {
        let mut mask = Self::empty();
        if units[0] > 0 {
            mask |= Self::NE;
        }
        if units[1] > 0 {
            mask |= Self::NW;
        }
        if units[2] > 0 {
            mask |= Self::SW;
        }
        if units[3] > 0 {
            mask |= Self::SE;
        }
        mask
    }
}

// ─── Movements ──────────────────────────────────────────────────────

/// A vehicle's intended traversal, determining its quadrant claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Movement {
    /// Cross straight through.
    Straight = 0,
    /// Left turn — sweeps two quadrants.
    Left = 1,
    /// Right turn — hugs a single corner quadrant.
    Right = 2,
    /// U-turn — worst case, claims the whole intersection.
    UTurn = 3,
}

impl Movement {
    /// Canonical quadrant claim for this movement from the given approach.
    pub const fn claim(self, lane: LaneId) -> Quadrants {
        use LaneId::*;
        match (self, lane) {
            (Self::Straight, North) => Quadrants::SE,
            (Self::Straight, South) => Quadrants::NW,
            (Self::Straight, East) => Quadrants::NW,
            (Self::Straight, West) => Quadrants::SE,

            (Self::Left, North) => Quadrants::SW.union(Quadrants::SE),
            (Self::Left, South) => Quadrants::NE.union(Quadrants::NW),
            (Self::Left, East) => Quadrants::NE.union(Quadrants::SE),
            (Self::Left, West) => Quadrants::NW.union(Quadrants::SW),

            (Self::Right, North) => Quadrants::NE,
            (Self::Right, South) => Quadrants::SW,
            (Self::Right, East) => Quadrants::SE,
            (Self::Right, West) => Quadrants::NW,

            (Self::UTurn, _) => Quadrants::all(),
        }
    }

    /// Claim in unit-resource vector form.
    #[inline]
    pub fn claim_units(self, lane: LaneId) -> [u8; NUM_QUADRANTS] {
        self.claim(lane).units()
    }
}

// ─── Lane process state ─────────────────────────────────────────────

/// Lifecycle state of a lane process.
///
/// At most one lane is `Running` at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LaneState {
    /// Queue empty, nothing to schedule.
    Waiting = 0,
    /// Vehicles queued, eligible for selection.
    Ready = 1,
    /// Holding the current time slice.
    Running = 2,
    /// Marked by the deadlock detector; ineligible until resolved.
    Blocked = 3,
}

impl LaneState {
    /// Convert from raw `u8`. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Waiting),
            1 => Some(Self::Ready),
            2 => Some(Self::Running),
            3 => Some(Self::Blocked),
            _ => None,
        }
    }
}

impl Default for LaneState {
    fn default() -> Self {
        Self::Waiting
    }
}

// ─── Policy & strategy selectors ────────────────────────────────────

/// Lane-selection policy run by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulingPolicy {
    /// Shortest Job First.
    Sjf,
    /// Multilevel Feedback Queue with aging.
    #[serde(rename = "mlfq")]
    MultilevelFeedback,
    /// Priority Round Robin with preemption.
    #[serde(rename = "prr")]
    PriorityRoundRobin,
}

impl SchedulingPolicy {
    /// Human-readable policy name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sjf => "Shortest Job First",
            Self::MultilevelFeedback => "Multilevel Feedback Queue",
            Self::PriorityRoundRobin => "Priority Round Robin",
        }
    }
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        Self::Sjf
    }
}

/// How a crossing grant combines the intersection lock with the
/// Banker's safety gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessStrategy {
    /// Intersection lock only, first-come first-served.
    Fifo,
    /// Banker's gate first; roll back the allocation if the lock is busy.
    Bankers,
    /// Banker's gate with emergency / globally-safe overrides (DEFAULT).
    Hybrid,
}

impl Default for AccessStrategy {
    fn default() -> Self {
        Self::Hybrid
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
