//! Contribution ledger use-case service.
//!
//! # Responsibility
//! - Record, edit and delete ledger entries.
//! - Keep entries "for" the recording user paired with a personal
//!   transaction on their own account.
//!
//! # Invariants
//! - Amounts are finite and non-zero; the payer is a current participant.
//! - A linked personal transaction is retracted before its entry is deleted;
//!   if retraction fails the entry stays.

use crate::gateway::{PersonalTransactionGateway, PersonalTransactionRequest};
use crate::model::contribution::{Contribution, ContributionId, PersonalLink};
use crate::model::participant::ParticipantId;
use crate::model::plan::PlanId;
use crate::model::validation::{normalize_label, validate_signed_amount, ValidationError};
use crate::repo::PlanStore;
use crate::service::error::{not_found, PlanResult};
use crate::service::{member_of, participant_for_account, publish};
use crate::sync::{PlanChange, PlanFeed};
use log::{debug, info, warn};
use std::sync::Arc;

/// Input for an entry the recording user paid themself.
#[derive(Debug, Clone, PartialEq)]
pub struct SelfContribution {
    pub account_id: String,
    /// `None` queues the personal transaction for later categorization.
    pub card_id: Option<String>,
    pub description: String,
    pub amount: f64,
    pub occurred_at: i64,
    pub category: Option<String>,
}

/// Contribution ledger facade.
pub struct LedgerService<S: PlanStore, G: PersonalTransactionGateway> {
    store: S,
    transactions: G,
    feed: Option<Arc<PlanFeed>>,
}

impl<S: PlanStore, G: PersonalTransactionGateway> LedgerService<S, G> {
    /// Creates service from store and transaction gateway implementations.
    pub fn new(store: S, transactions: G) -> Self {
        Self {
            store,
            transactions,
            feed: None,
        }
    }

    /// Publishes committed changes on `feed`.
    pub fn with_feed(mut self, feed: Arc<PlanFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Appends one entry attributed to `payer_uuid`.
    pub fn record(
        &self,
        plan_uuid: PlanId,
        payer_uuid: ParticipantId,
        description: impl Into<String>,
        amount: f64,
        occurred_at: i64,
    ) -> PlanResult<Contribution> {
        let description = normalize_label(description, ValidationError::EmptyDescription)?;
        validate_signed_amount(amount)?;
        member_of(&self.store, plan_uuid, payer_uuid)?;

        let contribution = Contribution::new(plan_uuid, payer_uuid, description, amount, occurred_at);
        self.store.insert_contribution(&contribution)?;
        info!(
            "event=contribution_record module=service status=ok plan_id={} contribution_id={} linked=false",
            plan_uuid, contribution.uuid
        );
        publish(&self.feed, plan_uuid, &[PlanChange::Contributions]);
        Ok(contribution)
    }

    /// Records an entry paid by the acting account and mirrors it on their
    /// personal history.
    ///
    /// The personal transaction carries the opposite sign: money put into the
    /// pool leaves the user's own account. If the entry cannot be stored the
    /// posted transaction is retracted again.
    pub fn record_for_self(
        &self,
        plan_uuid: PlanId,
        input: SelfContribution,
    ) -> PlanResult<Contribution> {
        let description = normalize_label(input.description, ValidationError::EmptyDescription)?;
        validate_signed_amount(input.amount)?;
        let payer = participant_for_account(&self.store, plan_uuid, input.account_id.trim())?;

        let mut contribution =
            Contribution::new(plan_uuid, payer.uuid, description, input.amount, input.occurred_at);
        let request = PersonalTransactionRequest {
            account_id: input.account_id.trim().to_string(),
            card_id: input.card_id.clone(),
            amount: -input.amount,
            description: contribution.description.clone(),
            category: input.category,
            linked_plan: plan_uuid,
            linked_contribution: Some(contribution.uuid),
        };
        let transaction_id = self.transactions.post_personal_transaction(&request)?;
        contribution.personal_link = Some(PersonalLink {
            card_id: input.card_id,
            transaction_id,
        });

        if let Err(err) = self.store.insert_contribution(&contribution) {
            self.retract_after_failed_record(&contribution);
            return Err(err.into());
        }
        info!(
            "event=contribution_record module=service status=ok plan_id={} contribution_id={} linked=true",
            plan_uuid, contribution.uuid
        );
        publish(&self.feed, plan_uuid, &[PlanChange::Contributions]);
        Ok(contribution)
    }

    /// Returns every entry of the plan, newest first.
    pub fn for_plan(&self, plan_uuid: PlanId) -> PlanResult<Vec<Contribution>> {
        if self.store.get_plan(plan_uuid)?.is_none() {
            return Err(not_found("plan", plan_uuid));
        }
        Ok(self.store.list_contributions(plan_uuid)?)
    }

    /// Replaces description, amount and date of one entry.
    ///
    /// A linked personal transaction is left as is; the owner reconciles it
    /// from their own history.
    pub fn update_contribution(
        &self,
        contribution_uuid: ContributionId,
        description: impl Into<String>,
        amount: f64,
        occurred_at: i64,
    ) -> PlanResult<Contribution> {
        let description = normalize_label(description, ValidationError::EmptyDescription)?;
        validate_signed_amount(amount)?;
        let existing = self.load(contribution_uuid)?;

        let updated = Contribution {
            description,
            amount,
            occurred_at,
            ..existing
        };
        self.store.update_contribution(&updated)?;
        debug!(
            "event=contribution_update module=service status=ok plan_id={} contribution_id={}",
            updated.plan_uuid, contribution_uuid
        );
        publish(&self.feed, updated.plan_uuid, &[PlanChange::Contributions]);
        Ok(updated)
    }

    /// Deletes one entry, retracting its personal transaction first.
    pub fn delete_contribution(&self, contribution_uuid: ContributionId) -> PlanResult<()> {
        let existing = self.load(contribution_uuid)?;
        if let Some(link) = existing.personal_link.as_ref() {
            self.transactions
                .retract_personal_transaction(link.transaction_id.as_str())?;
        }
        self.store.delete_contribution(contribution_uuid)?;
        info!(
            "event=contribution_delete module=service status=ok plan_id={} contribution_id={} linked={}",
            existing.plan_uuid,
            contribution_uuid,
            existing.personal_link.is_some()
        );
        publish(&self.feed, existing.plan_uuid, &[PlanChange::Contributions]);
        Ok(())
    }

    fn load(&self, contribution_uuid: ContributionId) -> PlanResult<Contribution> {
        self.store
            .get_contribution(contribution_uuid)?
            .ok_or_else(|| not_found("contribution", contribution_uuid))
    }

    fn retract_after_failed_record(&self, contribution: &Contribution) {
        let Some(link) = contribution.personal_link.as_ref() else {
            return;
        };
        if let Err(err) = self
            .transactions
            .retract_personal_transaction(link.transaction_id.as_str())
        {
            warn!(
                "event=contribution_record module=service status=error plan_id={} gateway={} code={} retract=failed",
                contribution.plan_uuid, err.gateway, err.code
            );
        }
    }
}
