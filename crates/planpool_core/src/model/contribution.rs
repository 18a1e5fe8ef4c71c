//! Contribution (ledger entry) domain model.
//!
//! # Invariants
//! - `amount` is finite and non-zero.
//! - `payer_uuid` references a participant of `plan_uuid`.
//! - A contribution is only rewritten by the removal coordinator
//!   (payer reassignment or amount rescale).

use crate::model::participant::ParticipantId;
use crate::model::plan::PlanId;
use crate::model::validation::{validate_signed_amount, ValidationError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of one ledger entry.
pub type ContributionId = Uuid;

/// Link to the personal transaction that mirrors an entry on the payer's own account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalLink {
    /// `None` when the transaction was queued for later categorization.
    pub card_id: Option<String>,
    pub transaction_id: String,
}

/// One signed monetary entry attributed to a participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub uuid: ContributionId,
    pub plan_uuid: PlanId,
    pub payer_uuid: ParticipantId,
    pub description: String,
    /// Positive: payer put money into the pool. Negative: payer took value out.
    pub amount: f64,
    /// Epoch milliseconds of the real-world spending/funding.
    pub occurred_at: i64,
    pub personal_link: Option<PersonalLink>,
}

impl Contribution {
    /// Creates an unlinked entry with a generated id.
    pub fn new(
        plan_uuid: PlanId,
        payer_uuid: ParticipantId,
        description: impl Into<String>,
        amount: f64,
        occurred_at: i64,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            plan_uuid,
            payer_uuid,
            description: description.into(),
            amount,
            occurred_at,
            personal_link: None,
        }
    }

    /// Validates entry-local invariants.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.description.trim().is_empty() {
            return Err(ValidationError::EmptyDescription);
        }
        validate_signed_amount(self.amount)
    }
}
