//! Participant removal coordinator.
//!
//! # Responsibility
//! - Preview a participant's ledger so the UI can pick a strategy.
//! - Retire a participant by transferring or deleting their ledger, then
//!   deleting the participant, as one atomic unit.
//!
//! # Invariants
//! - No contribution or settlement ever references a deleted participant.
//! - Removal is computed from a ledger read and applied only if that ledger
//!   is unchanged; a concurrent entry cancels the attempt, which is retried
//!   from a fresh read.
//! - `Σ net == 0` holds before and after every removal.

use crate::ledger::{BALANCE_TOLERANCE, MINOR_UNIT_HALF};
use crate::model::contribution::Contribution;
use crate::model::now_epoch_ms;
use crate::model::participant::{Participant, ParticipantId};
use crate::model::plan::PlanId;
use crate::model::validation::{validate_positive_amount, ValidationError};
use crate::repo::{ContributionRepository, PlanStore, RemovalPlan, RemovalSteps, RepoError};
use crate::service::error::{PlanError, PlanResult};
use crate::service::{member_of, publish};
use crate::sync::{PlanChange, PlanFeed};
use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;

/// Attempts before a removal that keeps racing new entries gives up.
pub const MAX_REMOVAL_ATTEMPTS: usize = 3;

/// Read-only view of a participant's ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContributionPreview {
    pub participant_uuid: ParticipantId,
    pub entries: Vec<Contribution>,
    /// Signed sum of `entries`.
    pub total: f64,
}

/// What a completed removal did to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemovalOutcome {
    pub removed: ParticipantId,
    /// Amount now attributed to the transfer target (0 for delete-all).
    pub transferred: f64,
    /// Rescaled remainder of the participant's entries that left the plan
    /// with them. Reported only; the underlying entries are deleted, never
    /// rewritten. Entries that scaled below half a minor unit are omitted.
    pub written_off: Vec<Contribution>,
}

/// Removal coordinator facade.
pub struct RemovalService<S: PlanStore> {
    store: S,
    feed: Option<Arc<PlanFeed>>,
}

impl<S: PlanStore> RemovalService<S> {
    /// Creates service from store implementation.
    pub fn new(store: S) -> Self {
        Self { store, feed: None }
    }

    /// Publishes committed changes on `feed`.
    pub fn with_feed(mut self, feed: Arc<PlanFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Returns the participant's entries and their signed sum.
    pub fn preview_contributions(
        &self,
        plan_uuid: PlanId,
        participant_uuid: ParticipantId,
    ) -> PlanResult<ContributionPreview> {
        let participant = member_of(&self.store, plan_uuid, participant_uuid)?;
        preview_of(&self.store, &participant)
    }

    /// Moves the participant's ledger to `target_uuid` and deletes them.
    ///
    /// With `amount` omitted or at least the participant's total, every entry
    /// and settlement is reassigned. A smaller `amount` books one entry of
    /// exactly `amount` for the target; the rest of the participant's entries
    /// is written off.
    ///
    /// Written-off entries are deleted together with the participant. The
    /// rescaled copies in `RemovalOutcome::written_off` are a report for the
    /// caller only; nothing rescaled is stored.
    pub fn transfer_and_remove(
        &self,
        plan_uuid: PlanId,
        participant_uuid: ParticipantId,
        target_uuid: ParticipantId,
        amount: Option<f64>,
    ) -> PlanResult<RemovalOutcome> {
        if participant_uuid == target_uuid {
            return Err(ValidationError::SelfTransfer.into());
        }
        if let Some(value) = amount {
            validate_positive_amount(value)?;
        }

        self.with_retries(plan_uuid, participant_uuid, "transfer", |participant, preview| {
            let target = member_of(&self.store, plan_uuid, target_uuid)?;
            let partial = amount.filter(|value| *value < preview.total - BALANCE_TOLERANCE);
            let (steps, outcome) = match partial {
                None => (
                    RemovalSteps::ReassignAll { target: target.uuid },
                    RemovalOutcome {
                        removed: participant.uuid,
                        transferred: preview.total,
                        written_off: Vec::new(),
                    },
                ),
                Some(value) => {
                    let transfer_entry = Contribution::new(
                        plan_uuid,
                        target.uuid,
                        format!("Transfer from {}", participant.display_name),
                        value,
                        now_epoch_ms(),
                    );
                    (
                        RemovalSteps::PartialTransfer {
                            target: target.uuid,
                            transfer_entry,
                        },
                        RemovalOutcome {
                            removed: participant.uuid,
                            transferred: value,
                            written_off: scaled_remainder(&preview.entries, preview.total, value),
                        },
                    )
                }
            };
            Ok((steps, outcome))
        })
    }

    /// Deletes the participant's entries and settlements, then the participant.
    pub fn delete_all_and_remove(
        &self,
        plan_uuid: PlanId,
        participant_uuid: ParticipantId,
    ) -> PlanResult<RemovalOutcome> {
        self.with_retries(plan_uuid, participant_uuid, "delete_all", |participant, preview| {
            Ok((
                RemovalSteps::DeleteAll,
                RemovalOutcome {
                    removed: participant.uuid,
                    transferred: 0.0,
                    written_off: preview.entries.clone(),
                },
            ))
        })
    }

    fn with_retries<F>(
        &self,
        plan_uuid: PlanId,
        participant_uuid: ParticipantId,
        strategy: &'static str,
        build: F,
    ) -> PlanResult<RemovalOutcome>
    where
        F: Fn(&Participant, &ContributionPreview) -> PlanResult<(RemovalSteps, RemovalOutcome)>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let participant = member_of(&self.store, plan_uuid, participant_uuid)?;
            if participant.is_owner {
                return Err(ValidationError::OwnerCannotLeave.into());
            }
            let preview = preview_of(&self.store, &participant)?;
            let (steps, outcome) = build(&participant, &preview)?;
            let removal = RemovalPlan {
                plan_uuid,
                participant_uuid,
                expected: preview
                    .entries
                    .iter()
                    .map(|entry| (entry.uuid, entry.amount))
                    .collect(),
                steps,
            };

            match self.store.apply_removal(&removal) {
                Ok(()) => {
                    info!(
                        "event=participant_remove module=service status=ok plan_id={plan_uuid} participant_id={participant_uuid} strategy={strategy} attempts={attempt}"
                    );
                    publish(
                        &self.feed,
                        plan_uuid,
                        &[
                            PlanChange::Participants,
                            PlanChange::Contributions,
                            PlanChange::Settlements,
                        ],
                    );
                    return Ok(outcome);
                }
                Err(RepoError::Conflict(reason)) if attempt < MAX_REMOVAL_ATTEMPTS => {
                    warn!(
                        "event=participant_remove module=service status=retry plan_id={plan_uuid} participant_id={participant_uuid} attempt={attempt} reason={reason}"
                    );
                }
                Err(err) => {
                    warn!(
                        "event=participant_remove module=service status=error plan_id={plan_uuid} participant_id={participant_uuid} strategy={strategy}"
                    );
                    return Err(PlanError::from(err));
                }
            }
        }
    }
}

pub(crate) fn preview_of<S: ContributionRepository>(
    store: &S,
    participant: &Participant,
) -> PlanResult<ContributionPreview> {
    let entries = store.list_contributions_for(participant.uuid)?;
    let total = entries.iter().map(|entry| entry.amount).sum();
    Ok(ContributionPreview {
        participant_uuid: participant.uuid,
        entries,
        total,
    })
}

/// Scales `entries` by `(total - amount) / total`, dropping entries that
/// round to zero.
fn scaled_remainder(entries: &[Contribution], total: f64, amount: f64) -> Vec<Contribution> {
    let ratio = (total - amount) / total;
    entries
        .iter()
        .filter_map(|entry| {
            let scaled = entry.amount * ratio;
            (scaled.abs() >= MINOR_UNIT_HALF).then(|| Contribution {
                amount: scaled,
                ..entry.clone()
            })
        })
        .collect()
}
