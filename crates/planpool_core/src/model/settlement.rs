//! Settlement proposal and record models.
//!
//! A proposal is recomputed on every read and never stored. It becomes a
//! `SettlementRecord` only when a participant confirms it.

use crate::model::participant::ParticipantId;
use crate::model::plan::PlanId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of a confirmed settlement.
pub type SettlementId = Uuid;

/// Directed transfer that moves `amount` from a debtor to a creditor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SettlementProposal {
    pub from: ParticipantId,
    pub to: ParticipantId,
    /// Always strictly positive.
    pub amount: f64,
}

/// Lifecycle of a settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    /// Computed by the planner, not persisted.
    Proposed,
    /// Acknowledged by a participant. Terminal.
    Confirmed,
}

impl SettlementStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Confirmed => "confirmed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "proposed" => Some(Self::Proposed),
            "confirmed" => Some(Self::Confirmed),
            _ => None,
        }
    }
}

/// Persisted, confirmed settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub uuid: SettlementId,
    pub plan_uuid: PlanId,
    pub from: ParticipantId,
    pub to: ParticipantId,
    pub amount: f64,
    pub status: SettlementStatus,
    pub confirmed_by: ParticipantId,
    /// Plan ledger revision the transfer was computed against. A repeated
    /// confirmation only counts as a duplicate at the same revision.
    pub ledger_revision: i64,
    /// Mirrored debit on the payer's personal history, when posted.
    pub from_transaction_id: Option<String>,
    /// Mirrored credit on the payee's personal history, when posted.
    pub to_transaction_id: Option<String>,
    /// Epoch milliseconds.
    pub confirmed_at: i64,
}

impl SettlementRecord {
    /// Returns whether this record acknowledges the given transfer triple.
    pub fn matches(&self, proposal: &SettlementProposal, tolerance: f64) -> bool {
        self.from == proposal.from
            && self.to == proposal.to
            && (self.amount - proposal.amount).abs() <= tolerance
    }
}
