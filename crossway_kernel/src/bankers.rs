//! Banker's-algorithm safety gate over intersection quadrants.
//!
//! Tracks the available/maximum/allocation/need matrices for the four
//! unit-resource quadrants and refuses any request that would leave the
//! system without a safe sequence.
//!
//! Locking discipline: the public wrappers on [`BankersState`] acquire
//! the single Banker's mutex exactly once and delegate to `*_unlocked`
//! internals on [`BankersCore`]; internals never re-acquire the lock.

use heapless::Vec as FixedVec;
use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use crossway_common::consts::{NUM_LANES, NUM_QUADRANTS};
use crossway_common::types::{LaneId, Movement, Quadrants};

/// Unit-resource vector indexed by quadrant (NE, NW, SW, SE).
pub type QuadrantUnits = [u8; NUM_QUADRANTS];

/// A safe sequence: lane ordering in which every lane can satisfy its
/// remaining need and finish.
pub type SafeSequence = FixedVec<LaneId, NUM_LANES>;

// ─── Core (caller holds lock) ───────────────────────────────────────

/// Matrix state. All methods assume the Banker's mutex is held.
#[derive(Debug)]
pub struct BankersCore {
    available: QuadrantUnits,
    maximum: [QuadrantUnits; NUM_LANES],
    allocation: [QuadrantUnits; NUM_LANES],
    need: [QuadrantUnits; NUM_LANES],
    deadlock_preventions: u64,
    safe: bool,
}

impl BankersCore {
    fn new() -> Self {
        // Every lane's stated maximum is the worst-case U-turn claim.
        let maximum =
            [LaneId::North, LaneId::South, LaneId::East, LaneId::West]
                .map(|lane| Movement::UTurn.claim_units(lane));
        let need = maximum;
        Self {
            available: [1; NUM_QUADRANTS],
            maximum,
            allocation: [[0; NUM_QUADRANTS]; NUM_LANES],
            need,
            deadlock_preventions: 0,
            safe: true,
        }
    }

    /// Request protocol, caller holds the lock.
    ///
    /// 1. Reject claims exceeding the lane's stated need.
    /// 2. Reject claims exceeding current availability.
    /// 3. Tentatively grant.
    /// 4. Commit if the result is safe, otherwise roll back and count a
    ///    prevented deadlock.
    pub fn request_unlocked(&mut self, lane: LaneId, request: QuadrantUnits) -> bool {
        let row = lane.index();

        for quad in 0..NUM_QUADRANTS {
            if request[quad] > self.need[row][quad] {
                debug!(lane = %lane, quad, "request exceeds stated maximum claim");
                return false;
            }
        }
        for quad in 0..NUM_QUADRANTS {
            if request[quad] > self.available[quad] {
                debug!(lane = %lane, quad, "insufficient free quadrants");
                return false;
            }
        }

        for quad in 0..NUM_QUADRANTS {
            self.available[quad] -= request[quad];
            self.allocation[row][quad] += request[quad];
            self.need[row][quad] -= request[quad];
        }

        if self.is_safe_unlocked() {
            debug!(lane = %lane, "safe allocation committed");
            true
        } else {
            debug!(lane = %lane, "unsafe allocation rolled back");
            self.deadlock_preventions += 1;
            for quad in 0..NUM_QUADRANTS {
                self.available[quad] += request[quad];
                self.allocation[row][quad] -= request[quad];
                self.need[row][quad] += request[quad];
            }
            false
        }
    }

    /// Return every quadrant held by `lane`, caller holds the lock.
    pub fn deallocate_unlocked(&mut self, lane: LaneId) -> QuadrantUnits {
        let row = lane.index();
        let freed = self.allocation[row];
        for quad in 0..NUM_QUADRANTS {
            self.available[quad] += self.allocation[row][quad];
            self.need[row][quad] += self.allocation[row][quad];
            self.allocation[row][quad] = 0;
        }
        freed
    }

    /// Safety check, caller holds the lock.
    ///
    /// work = available; repeatedly finish any lane whose need fits in
    /// work, folding its allocation back in. Safe iff all lanes finish.
    /// Iterations are bounded at 2·N as a non-termination guard.
    pub fn is_safe_unlocked(&mut self) -> bool {
        let safe = self.safe_sequence_unlocked().is_some();
        self.safe = safe;
        safe
    }

    /// Safety algorithm exposing the finish order, caller holds the lock.
    pub fn safe_sequence_unlocked(&self) -> Option<SafeSequence> {
        let mut work = self.available;
        let mut finish = [false; NUM_LANES];
        let mut sequence = SafeSequence::new();

        let max_iterations = 2 * NUM_LANES;
        for _ in 0..max_iterations {
            let mut found = None;
            for row in 0..NUM_LANES {
                if finish[row] {
                    continue;
                }
                let fits = (0..NUM_QUADRANTS).all(|quad| self.need[row][quad] <= work[quad]);
                if fits {
                    found = Some(row);
                    break;
                }
            }

            let Some(row) = found else {
                break;
            };
            finish[row] = true;
            for quad in 0..NUM_QUADRANTS {
                work[quad] += self.allocation[row][quad];
            }
            // NUM_LANES entries at most; push cannot fail.
            let _ = sequence.push(LaneId::from_index(row).unwrap_or(LaneId::North));
            if sequence.len() == NUM_LANES {
                return Some(sequence);
            }
        }

        None
    }

    /// Whether `request` fits into the currently available quadrants.
    pub fn fits_available_unlocked(&self, request: QuadrantUnits) -> bool {
        (0..NUM_QUADRANTS).all(|quad| request[quad] <= self.available[quad])
    }

    /// Whether `lane` could finish with what is available right now.
    pub fn can_finish_unlocked(&self, lane: LaneId) -> bool {
        let row = lane.index();
        (0..NUM_QUADRANTS).all(|quad| self.need[row][quad] <= self.available[quad])
    }

    #[inline]
    pub const fn available(&self) -> QuadrantUnits {
        self.available
    }

    #[inline]
    pub const fn allocation(&self, lane: LaneId) -> QuadrantUnits {
        self.allocation[lane.index()]
    }

    #[inline]
    pub const fn need(&self, lane: LaneId) -> QuadrantUnits {
        self.need[lane.index()]
    }

    #[inline]
    pub const fn maximum(&self, lane: LaneId) -> QuadrantUnits {
        self.maximum[lane.index()]
    }

    #[inline]
    pub const fn deadlock_preventions(&self) -> u64 {
        self.deadlock_preventions
    }
}

// ─── Public wrappers (acquire the lock once) ────────────────────────

/// The Banker's matrices behind their single mutex.
#[derive(Debug)]
pub struct BankersState {
    core: Mutex<BankersCore>,
}

impl Default for BankersState {
    fn default() -> Self {
        Self::new()
    }
}

impl BankersState {
    /// All quadrants available, zero allocations, need = maximum.
    pub fn new() -> Self {
        Self {
            core: Mutex::new(BankersCore::new()),
        }
    }

    /// Lock the core for a compound operation.
    #[inline]
    pub fn core(&self) -> MutexGuard<'_, BankersCore> {
        self.core.lock()
    }

    /// Atomic request; see [`BankersCore::request_unlocked`].
    pub fn request(&self, lane: LaneId, request: QuadrantUnits) -> bool {
        self.core.lock().request_unlocked(lane, request)
    }

    /// Return everything `lane` holds; the freed quadrants are reported
    /// as a mask.
    pub fn release_all(&self, lane: LaneId) -> Quadrants {
        Quadrants::from_units(self.core.lock().deallocate_unlocked(lane))
    }

    /// Whether a safe sequence currently exists.
    pub fn is_safe_state(&self) -> bool {
        self.core.lock().is_safe_unlocked()
    }

    /// The safe sequence, if one exists.
    pub fn safe_sequence(&self) -> Option<SafeSequence> {
        self.core.lock().safe_sequence_unlocked()
    }

    /// Rejected-because-unsafe request count.
    pub fn deadlock_preventions(&self) -> u64 {
        self.core.lock().deadlock_preventions()
    }

    /// Overwrite the availability vector (operator/fault-injection hook).
    pub fn set_available(&self, available: QuadrantUnits) {
        self.core.lock().available = available;
    }

    /// Reinitialize matrices; the prevention counter is preserved.
    pub fn reset(&self) {
        let mut core = self.core.lock();
        let preventions = core.deadlock_preventions;
        *core = BankersCore::new();
        core.deadlock_preventions = preventions;
    }

    /// Snapshot of all matrices for UI/diagnostic readers.
    pub fn snapshot(&self) -> BankersSnapshot {
        let core = self.core.lock();
        BankersSnapshot {
            available: core.available,
            maximum: core.maximum,
            allocation: core.allocation,
            need: core.need,
            deadlock_preventions: core.deadlock_preventions,
            safe: core.safe,
        }
    }

    /// Non-blocking snapshot; `None` on contention.
    pub fn try_snapshot(&self) -> Option<BankersSnapshot> {
        let core = self.core.try_lock()?;
        Some(BankersSnapshot {
            available: core.available,
            maximum: core.maximum,
            allocation: core.allocation,
            need: core.need,
            deadlock_preventions: core.deadlock_preventions,
            safe: core.safe,
        })
    }
}

/// Point-in-time copy of the Banker's matrices.
#[derive(Debug, Clone, Copy)]
pub struct BankersSnapshot {
    /// Free units per quadrant.
    pub available: QuadrantUnits,
    /// Stated maximum claim per lane.
    pub maximum: [QuadrantUnits; NUM_LANES],
    /// Current allocation per lane.
    pub allocation: [QuadrantUnits; NUM_LANES],
    /// Remaining need per lane.
    pub need: [QuadrantUnits; NUM_LANES],
    /// Rejected-because-unsafe request count.
    pub deadlock_preventions: u64,
    /// Last safety verdict.
    pub safe: bool,
}

impl BankersSnapshot {
    /// Conservation check: `available + Σ allocation == 1` per quadrant.
    pub fn conserves_units(&self) -> bool {
        (0..NUM_QUADRANTS).all(|quad| {
            let allocated: u8 = self.allocation.iter().map(|row| row[quad]).sum();
            self.available[quad] + allocated == 1
        })
    }

    /// Matrix identity: `need == maximum − allocation`, with
    /// `0 ≤ allocation ≤ maximum`.
    pub fn matrices_consistent(&self) -> bool {
        (0..NUM_LANES).all(|row| {
            (0..NUM_QUADRANTS).all(|quad| {
                self.allocation[row][quad] <= self.maximum[row][quad]
                    && self.need[row][quad]
                        == self.maximum[row][quad] - self.allocation[row][quad]
            })
        })
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
