//! Plan use-case services.
//!
//! # Responsibility
//! - Orchestrate store and gateway calls into the operations the UI needs.
//! - Enforce permission and membership rules the store cannot express.
//! - Announce committed writes on the live feed.
//!
//! # Invariants
//! - Services hold no mutable state; everything is re-read from the store.
//! - Feed notifications are published only after the write committed.

pub mod error;
pub mod ledger_service;
pub mod plan_service;
pub mod registry_service;
pub mod removal_service;
pub mod settlement_service;

pub use error::{PlanError, PlanResult};
pub use ledger_service::{LedgerService, SelfContribution};
pub use plan_service::PlanService;
pub use registry_service::{dedupe_on_membership_change, RegistryService, RemoveOutcome};
pub use removal_service::{ContributionPreview, RemovalOutcome, RemovalService};
pub use settlement_service::{ConfirmOutcome, SettlementOptions, SettlementService};

use crate::model::participant::{Participant, ParticipantId};
use crate::model::plan::PlanId;
use crate::model::validation::ValidationError;
use crate::repo::ParticipantRepository;
use crate::sync::{PlanChange, PlanFeed};
use std::sync::Arc;

fn publish(feed: &Option<Arc<PlanFeed>>, plan_uuid: PlanId, changes: &[PlanChange]) {
    if let Some(feed) = feed {
        for change in changes {
            feed.publish(plan_uuid, *change);
        }
    }
}

/// Loads a participant and checks it belongs to `plan_uuid`.
fn member_of<S: ParticipantRepository>(
    store: &S,
    plan_uuid: PlanId,
    participant_uuid: ParticipantId,
) -> PlanResult<Participant> {
    let participant = store
        .get_participant(participant_uuid)?
        .ok_or_else(|| error::not_found("participant", participant_uuid))?;
    if participant.plan_uuid != plan_uuid {
        return Err(ValidationError::ForeignParticipant.into());
    }
    Ok(participant)
}

/// Finds the participant row of `account_id` in a plan.
fn participant_for_account<S: ParticipantRepository>(
    store: &S,
    plan_uuid: PlanId,
    account_id: &str,
) -> PlanResult<Participant> {
    store
        .list_participants(plan_uuid)?
        .into_iter()
        .find(|participant| participant.account_id.as_deref() == Some(account_id))
        .ok_or_else(|| ValidationError::NotParticipant(account_id.to_string()).into())
}
