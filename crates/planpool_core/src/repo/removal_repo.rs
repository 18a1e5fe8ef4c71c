//! Atomic participant removal.
//!
//! # Responsibility
//! - Apply a precomputed removal plan and the participant delete as one
//!   transaction.
//!
//! # Invariants
//! - The plan is applied only if the participant's ledger still matches the
//!   entries it was computed from; otherwise `Conflict` and nothing changes.
//! - The participant row is deleted last, after every reference is gone.

use crate::ledger::BALANCE_TOLERANCE;
use crate::model::contribution::{Contribution, ContributionId};
use crate::model::participant::ParticipantId;
use crate::model::plan::PlanId;
use crate::repo::contribution_repo::list_participant_contributions_in;
use crate::repo::participant_repo::{load_participant, reassign_ledger_refs, reassign_settlements};
use crate::repo::store::{RepoError, RepoResult, SqlitePlanStore};
use crate::repo::ContributionRepository;
use rusqlite::Connection;
use std::collections::HashMap;

/// Ledger steps for one removal.
#[derive(Debug, Clone, PartialEq)]
pub enum RemovalSteps {
    /// Every entry and settlement moves to `target`.
    ReassignAll { target: ParticipantId },
    /// `transfer_entry` is booked for `target`, the participant's own entries
    /// leave with them, and settlements move to `target`.
    PartialTransfer {
        target: ParticipantId,
        transfer_entry: Contribution,
    },
    /// Entries and settlements of the participant are deleted.
    DeleteAll,
}

/// Removal computed from a ledger read, applied optimistically.
#[derive(Debug, Clone, PartialEq)]
pub struct RemovalPlan {
    pub plan_uuid: PlanId,
    pub participant_uuid: ParticipantId,
    /// `(entry, amount)` pairs the steps were computed from.
    pub expected: Vec<(ContributionId, f64)>,
    pub steps: RemovalSteps,
}

/// Repository interface for atomic participant retirement.
pub trait RemovalRepository {
    /// Applies `plan` and deletes the participant, or changes nothing.
    fn apply_removal(&self, plan: &RemovalPlan) -> RepoResult<()>;
}

impl RemovalRepository for SqlitePlanStore<'_> {
    fn apply_removal(&self, plan: &RemovalPlan) -> RepoResult<()> {
        let tx = self.write_tx()?;
        ensure_member(&tx, plan.plan_uuid, plan.participant_uuid)?;

        let current = list_participant_contributions_in(&tx, plan.participant_uuid)?;
        if !ledger_matches(&current, &plan.expected) {
            return Err(RepoError::Conflict("participant ledger changed during removal"));
        }

        let participant = plan.participant_uuid.to_string();
        match &plan.steps {
            RemovalSteps::ReassignAll { target } => {
                ensure_member(&tx, plan.plan_uuid, *target)?;
                reassign_ledger_refs(&tx, plan.participant_uuid, *target)?;
            }
            RemovalSteps::PartialTransfer {
                target,
                transfer_entry,
            } => {
                ensure_member(&tx, plan.plan_uuid, *target)?;
                tx.execute(
                    "DELETE FROM contributions WHERE participant_uuid = ?1;",
                    [participant.as_str()],
                )?;
                SqlitePlanStore { conn: &tx }.insert_contribution(transfer_entry)?;
                reassign_settlements(&tx, plan.participant_uuid, *target)?;
            }
            RemovalSteps::DeleteAll => {
                tx.execute(
                    "DELETE FROM contributions WHERE participant_uuid = ?1;",
                    [participant.as_str()],
                )?;
                tx.execute(
                    "DELETE FROM settlement_records
                     WHERE from_participant_uuid = ?1 OR to_participant_uuid = ?1;",
                    [participant.as_str()],
                )?;
            }
        }

        tx.execute(
            "DELETE FROM participants WHERE uuid = ?1;",
            [participant.as_str()],
        )?;
        tx.commit()?;
        Ok(())
    }
}

fn ensure_member(
    conn: &Connection,
    plan_uuid: PlanId,
    participant_uuid: ParticipantId,
) -> RepoResult<()> {
    match load_participant(conn, participant_uuid)? {
        Some(participant) if participant.plan_uuid == plan_uuid => Ok(()),
        _ => Err(RepoError::not_found("participant", participant_uuid)),
    }
}

fn ledger_matches(current: &[Contribution], expected: &[(ContributionId, f64)]) -> bool {
    if current.len() != expected.len() {
        return false;
    }
    let expected = expected.iter().copied().collect::<HashMap<_, _>>();
    current.iter().all(|entry| {
        expected
            .get(&entry.uuid)
            .is_some_and(|amount| (amount - entry.amount).abs() <= BALANCE_TOLERANCE)
    })
}
