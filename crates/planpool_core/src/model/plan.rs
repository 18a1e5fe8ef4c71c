//! Plan domain model.
//!
//! # Invariants
//! - `owner_account_id` always has a participant row in the plan.
//! - `title` is never blank.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of one shared plan.
pub type PlanId = Uuid;

/// How the pool total is split into per-participant fair shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionRule {
    /// Everyone owes `total / participant_count`.
    Equitable,
    /// Fair shares come from each participant's configured custom share.
    Custom,
}

impl DistributionRule {
    /// Stable string id used in storage and FFI payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equitable => "equitable",
            Self::Custom => "custom",
        }
    }

    /// Parses a stored or FFI-provided rule value.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "equitable" => Some(Self::Equitable),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

/// A named shared pool tracked collectively by its participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub uuid: PlanId,
    pub title: String,
    /// Account that created the plan; only this account may rename or delete it.
    pub owner_account_id: String,
    pub rule: DistributionRule,
    /// Bumped by every membership, share, rule or ledger-entry change.
    /// Confirmed settlements leave it untouched.
    pub ledger_revision: i64,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Epoch milliseconds.
    pub updated_at: i64,
}

impl Plan {
    /// Returns whether `account_id` owns this plan.
    pub fn is_owned_by(&self, account_id: &str) -> bool {
        self.owner_account_id == account_id
    }
}
