//! Domain model for shared management plans.
//!
//! # Responsibility
//! - Define the plan, participant, contribution and settlement records used
//!   by every other layer.
//! - Own input validation that does not need storage access.
//!
//! # Invariants
//! - Every record is identified by a stable UUID.
//! - All amounts of one plan share a single currency; no FX happens here.
//! - Contribution sign convention: positive means the payer put money into
//!   the pool, negative means the payer took value out of it.

pub mod contribution;
pub mod participant;
pub mod plan;
pub mod settlement;
pub mod validation;

/// Current wall clock as Unix epoch milliseconds.
pub(crate) fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}
