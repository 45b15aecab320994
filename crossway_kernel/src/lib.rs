//! # Crossway Kernel
//!
//! The coupled scheduling/allocation kernel of the Crossway intersection
//! simulator. Four lane processes contend for a four-quadrant
//! intersection under a pluggable scheduling policy, gated by a Banker's
//! safety check, with emergency preemption layered on top.
//!
//! ## Layers
//!
//! 1. **Policy** — [`sched`]: SJF, multilevel feedback, priority
//!    round robin over the four lane processes.
//! 2. **Resource** — [`bankers`]: need/allocation/available matrices
//!    and the safety algorithm.
//! 3. **Synchronization** — [`intersection`]: exclusive ownership with
//!    per-lane waiters, priority inheritance, deadlock resolution.
//! 4. **Preemption** — [`emergency`]: detection, forced clearance,
//!    response statistics.
//!
//! [`system::TrafficSystem`] ties the layers together as one owned
//! context; [`system::TrafficSystem::step`] is the simulation tick.
//!
//! The kernel never reads the wall clock: every time-dependent
//! operation takes an explicit simulation-relative timestamp.

pub mod access;
pub mod bankers;
pub mod emergency;
pub mod intersection;
pub mod lane;
pub mod metrics;
pub mod queue;
pub mod sched;
pub mod system;
