//! Participant registry use-case service.
//!
//! # Responsibility
//! - Add, rename, recolor and remove plan participants.
//! - Keep self-membership idempotent across devices (`ensure_self_participant`,
//!   `dedupe_self_participants`).
//! - Run the invite onboarding flow.
//!
//! # Invariants
//! - Names are trimmed and non-empty; colors are palette members and unique
//!   per plan.
//! - A participant with ledger references is never deleted directly; callers
//!   get a `RemoveOutcome::NeedsStrategy` and pick a removal strategy.
//! - The owner participant cannot be removed.

use crate::gateway::InviteGateway;
use crate::model::participant::{normalize_palette_color, Participant, ParticipantId};
use crate::model::plan::PlanId;
use crate::model::validation::{normalize_label, ValidationError};
use crate::repo::{EnsureOutcome, NewParticipant, PlanStore, RepoError};
use crate::service::error::{not_found, PlanResult};
use crate::service::removal_service::{preview_of, ContributionPreview};
use crate::service::{member_of, publish};
use crate::sync::{PlanChange, PlanFeed, Subscription};
use log::{info, warn};
use std::collections::HashSet;
use std::sync::Arc;

/// Result of a direct removal request.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoveOutcome {
    /// The participant had no ledger references and is gone.
    Removed,
    /// The participant has ledger references; use the removal service.
    NeedsStrategy(ContributionPreview),
}

/// Participant registry facade.
pub struct RegistryService<S: PlanStore, I: InviteGateway> {
    store: S,
    invites: I,
    feed: Option<Arc<PlanFeed>>,
}

impl<S: PlanStore, I: InviteGateway> RegistryService<S, I> {
    /// Creates service from store and invite gateway implementations.
    pub fn new(store: S, invites: I) -> Self {
        Self {
            store,
            invites,
            feed: None,
        }
    }

    /// Publishes committed changes on `feed`.
    pub fn with_feed(mut self, feed: Arc<PlanFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Adds a participant, picking the first free palette color when
    /// `requested_color` is `None`.
    pub fn add_participant(
        &self,
        plan_uuid: PlanId,
        display_name: impl Into<String>,
        account_id: Option<&str>,
        requested_color: Option<&str>,
    ) -> PlanResult<Participant> {
        let display_name = normalize_label(display_name, ValidationError::EmptyName)?;
        let account_id = account_id
            .map(|value| normalize_label(value, ValidationError::EmptyAccountId))
            .transpose()?;
        let color = requested_color
            .map(normalize_palette_color)
            .transpose()?
            .map(str::to_string);

        let participant = self.store.insert_participant(
            plan_uuid,
            &NewParticipant {
                display_name,
                account_id,
                color,
            },
        )?;
        info!(
            "event=participant_add module=service status=ok plan_id={} participant_id={} placeholder={}",
            plan_uuid,
            participant.uuid,
            participant.is_placeholder()
        );
        publish(&self.feed, plan_uuid, &[PlanChange::Participants]);
        Ok(participant)
    }

    /// Returns the account's participant row, creating it when missing.
    ///
    /// Safe to call concurrently from several sessions of one account:
    /// duplicates created by a race are collapsed into the oldest row.
    pub fn ensure_self_participant(
        &self,
        plan_uuid: PlanId,
        account_id: &str,
        display_name: impl Into<String>,
    ) -> PlanResult<EnsureOutcome> {
        let account_id = normalize_label(account_id, ValidationError::EmptyAccountId)?;
        let display_name = normalize_label(display_name, ValidationError::EmptyName)?;
        let outcome = self.store.ensure_account_participant(
            plan_uuid,
            account_id.as_str(),
            display_name.as_str(),
        )?;
        if outcome.removed_duplicates > 0 {
            warn!(
                "event=participant_dedupe module=service status=ok plan_id={} removed={}",
                plan_uuid, outcome.removed_duplicates
            );
        }
        if outcome.created || outcome.removed_duplicates > 0 {
            publish(&self.feed, plan_uuid, &[PlanChange::Participants]);
        }
        Ok(outcome)
    }

    /// Collapses duplicated self-memberships of a plan.
    ///
    /// Meant to run whenever the participant list changes; returns the number
    /// of rows removed.
    pub fn dedupe_self_participants(&self, plan_uuid: PlanId) -> PlanResult<usize> {
        let removed = self.store.collapse_duplicate_accounts(plan_uuid)?;
        if removed > 0 {
            warn!(
                "event=participant_dedupe module=service status=ok plan_id={plan_uuid} removed={removed}"
            );
            publish(
                &self.feed,
                plan_uuid,
                &[PlanChange::Participants, PlanChange::Contributions],
            );
        }
        Ok(removed)
    }

    /// Lists participants in join order, collapsing duplicates it observes.
    pub fn list_participants(&self, plan_uuid: PlanId) -> PlanResult<Vec<Participant>> {
        if self.store.get_plan(plan_uuid)?.is_none() {
            return Err(not_found("plan", plan_uuid));
        }
        let participants = self.store.list_participants(plan_uuid)?;
        if !has_duplicate_accounts(&participants) {
            return Ok(participants);
        }
        self.dedupe_self_participants(plan_uuid)?;
        Ok(self.store.list_participants(plan_uuid)?)
    }

    /// Renames one participant of the plan.
    pub fn rename_participant(
        &self,
        plan_uuid: PlanId,
        participant_uuid: ParticipantId,
        display_name: impl Into<String>,
    ) -> PlanResult<Participant> {
        let display_name = normalize_label(display_name, ValidationError::EmptyName)?;
        member_of(&self.store, plan_uuid, participant_uuid)?;
        self.store
            .rename_participant(participant_uuid, display_name.as_str())?;
        publish(&self.feed, plan_uuid, &[PlanChange::Participants]);
        member_of(&self.store, plan_uuid, participant_uuid)
    }

    /// Moves one participant to another palette color.
    pub fn recolor_participant(
        &self,
        plan_uuid: PlanId,
        participant_uuid: ParticipantId,
        color: &str,
    ) -> PlanResult<Participant> {
        let color = normalize_palette_color(color)?;
        member_of(&self.store, plan_uuid, participant_uuid)?;
        self.store.recolor_participant(participant_uuid, color)?;
        publish(&self.feed, plan_uuid, &[PlanChange::Participants]);
        member_of(&self.store, plan_uuid, participant_uuid)
    }

    /// Removes a participant without ledger references.
    ///
    /// Participants with contributions or settlements are left untouched and
    /// a preview of their ledger is returned instead.
    pub fn remove_participant(
        &self,
        plan_uuid: PlanId,
        participant_uuid: ParticipantId,
    ) -> PlanResult<RemoveOutcome> {
        let participant = member_of(&self.store, plan_uuid, participant_uuid)?;
        if participant.is_owner {
            return Err(ValidationError::OwnerCannotLeave.into());
        }

        if self.store.ledger_reference_count(participant_uuid)? > 0 {
            return Ok(RemoveOutcome::NeedsStrategy(preview_of(
                &self.store,
                &participant,
            )?));
        }
        match self.store.delete_participant(participant_uuid) {
            Ok(()) => {}
            // An entry landed between the count and the delete.
            Err(RepoError::Conflict(_)) => {
                return Ok(RemoveOutcome::NeedsStrategy(preview_of(
                    &self.store,
                    &participant,
                )?));
            }
            Err(err) => return Err(err.into()),
        }

        info!(
            "event=participant_remove module=service status=ok plan_id={plan_uuid} participant_id={participant_uuid} strategy=direct"
        );
        publish(&self.feed, plan_uuid, &[PlanChange::Participants]);
        Ok(RemoveOutcome::Removed)
    }

    /// Redeems an invite code and joins the account to the resolved plan.
    pub fn join_with_invite(
        &self,
        code: &str,
        account_id: &str,
        display_name: impl Into<String>,
    ) -> PlanResult<EnsureOutcome> {
        let plan_uuid = self.invites.resolve_invite_code(code)?;
        info!("event=invite_redeem module=service status=ok plan_id={plan_uuid}");
        self.ensure_self_participant(plan_uuid, account_id, display_name)
    }

    /// Returns the shareable invite code of a plan, issuing one if needed.
    pub fn invite_code(&self, plan_uuid: PlanId) -> PlanResult<String> {
        if self.store.get_plan(plan_uuid)?.is_none() {
            return Err(not_found("plan", plan_uuid));
        }
        Ok(self.invites.issue_invite_code(plan_uuid)?)
    }
}

/// Keeps a plan's self-memberships collapsed as membership changes arrive.
///
/// `dedupe` runs on every `PlanChange::Participants` published for
/// `plan_uuid`; the watch lasts as long as the returned handle. A dedupe
/// that itself publishes re-enters once and then finds nothing to remove.
pub fn dedupe_on_membership_change<F>(
    feed: &PlanFeed,
    plan_uuid: PlanId,
    dedupe: F,
) -> Subscription
where
    F: Fn(PlanId) -> PlanResult<usize> + Send + Sync + 'static,
{
    feed.subscribe(plan_uuid, move |plan, change| {
        if change != PlanChange::Participants {
            return;
        }
        match dedupe(plan) {
            Ok(0) => {}
            Ok(removed) => info!(
                "event=participant_dedupe module=service status=ok plan_id={plan} removed={removed} trigger=feed"
            ),
            Err(err) => warn!(
                "event=participant_dedupe module=service status=error plan_id={plan} trigger=feed soft={} error={err}",
                err.is_soft()
            ),
        }
    })
}

pub(crate) fn has_duplicate_accounts(participants: &[Participant]) -> bool {
    let mut seen = HashSet::new();
    participants
        .iter()
        .filter_map(|participant| participant.account_id.as_deref())
        .any(|account_id| !seen.insert(account_id))
}
