//! Pure plan arithmetic: balances and settlement planning.
//!
//! # Responsibility
//! - Turn a consistent snapshot of participants, contributions and confirmed
//!   settlements into net positions.
//! - Reduce net positions to a deterministic minimal transfer list.
//!
//! # Invariants
//! - Functions here never touch storage and never cache results; every call
//!   recomputes from its inputs.
//! - `Σ net == 0` within `BALANCE_TOLERANCE` for every returned sheet.

pub mod balance;
pub mod planner;

/// Tolerance used for conservation checks and for "settled" classification.
pub const BALANCE_TOLERANCE: f64 = 1e-6;

/// Half of the smallest currency unit; scaled amounts below it round to zero.
pub const MINOR_UNIT_HALF: f64 = 0.005;
