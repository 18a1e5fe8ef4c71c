//! Plan lifecycle use-case service.
//!
//! # Responsibility
//! - Create plans with their owner participant.
//! - Apply owner-only header changes (title, rule) and deletion.
//! - Store per-participant custom shares for `custom` plans.
//!
//! # Invariants
//! - Only the account recorded as plan owner may rename, re-rule or delete.
//! - A plan is never visible without its owner participant.

use crate::model::participant::{Participant, ParticipantId};
use crate::model::plan::{DistributionRule, Plan, PlanId};
use crate::model::validation::{normalize_label, ValidationError};
use crate::repo::{NewParticipant, PlanStore};
use crate::service::error::{not_found, PlanResult};
use crate::service::{member_of, publish};
use crate::sync::{PlanChange, PlanFeed};
use log::info;
use std::sync::Arc;
use uuid::Uuid;

/// Plan lifecycle facade.
pub struct PlanService<S: PlanStore> {
    store: S,
    feed: Option<Arc<PlanFeed>>,
}

impl<S: PlanStore> PlanService<S> {
    /// Creates service from store implementation.
    pub fn new(store: S) -> Self {
        Self { store, feed: None }
    }

    /// Publishes committed changes on `feed`.
    pub fn with_feed(mut self, feed: Arc<PlanFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Creates a plan and joins its owner as the first participant.
    pub fn create_plan(
        &self,
        title: impl Into<String>,
        owner_account_id: &str,
        owner_display_name: impl Into<String>,
        rule: DistributionRule,
    ) -> PlanResult<(Plan, Participant)> {
        let title = normalize_label(title, ValidationError::EmptyTitle)?;
        let display_name = normalize_label(owner_display_name, ValidationError::EmptyName)?;
        let owner_account_id = normalize_label(owner_account_id, ValidationError::EmptyAccountId)?;

        let owner = NewParticipant {
            display_name,
            account_id: Some(owner_account_id),
            color: None,
        };
        let (plan, participant) =
            self.store
                .create_plan(Uuid::new_v4(), title.as_str(), rule, &owner)?;
        info!(
            "event=plan_create module=service status=ok plan_id={} rule={}",
            plan.uuid,
            rule.as_str()
        );
        Ok((plan, participant))
    }

    /// Loads one plan.
    pub fn get_plan(&self, plan_uuid: PlanId) -> PlanResult<Plan> {
        self.store
            .get_plan(plan_uuid)?
            .ok_or_else(|| not_found("plan", plan_uuid))
    }

    /// Lists plans the account participates in, most recently changed first.
    pub fn list_plans_for_account(&self, account_id: &str) -> PlanResult<Vec<Plan>> {
        Ok(self.store.list_plans_for_account(account_id.trim())?)
    }

    /// Renames a plan. Owner only.
    pub fn rename_plan(
        &self,
        plan_uuid: PlanId,
        acting_account_id: &str,
        title: impl Into<String>,
    ) -> PlanResult<Plan> {
        let title = normalize_label(title, ValidationError::EmptyTitle)?;
        let plan = self.owned_plan(plan_uuid, acting_account_id)?;
        let updated = self.store.update_plan(plan.uuid, title.as_str(), plan.rule)?;
        publish(&self.feed, plan_uuid, &[PlanChange::Plan]);
        Ok(updated)
    }

    /// Switches the distribution rule. Owner only.
    pub fn set_distribution_rule(
        &self,
        plan_uuid: PlanId,
        acting_account_id: &str,
        rule: DistributionRule,
    ) -> PlanResult<Plan> {
        let plan = self.owned_plan(plan_uuid, acting_account_id)?;
        let updated = self.store.update_plan(plan.uuid, plan.title.as_str(), rule)?;
        info!(
            "event=plan_rule_set module=service status=ok plan_id={} rule={}",
            plan_uuid,
            rule.as_str()
        );
        publish(&self.feed, plan_uuid, &[PlanChange::Plan]);
        Ok(updated)
    }

    /// Deletes a plan with everything attached to it. Owner only.
    pub fn delete_plan(&self, plan_uuid: PlanId, acting_account_id: &str) -> PlanResult<()> {
        self.owned_plan(plan_uuid, acting_account_id)?;
        self.store.delete_plan(plan_uuid)?;
        info!("event=plan_delete module=service status=ok plan_id={plan_uuid}");
        publish(&self.feed, plan_uuid, &[PlanChange::Deleted]);
        Ok(())
    }

    /// Sets (or clears with `None`) an absolute custom fair share.
    ///
    /// Shares only matter under `DistributionRule::Custom`; they are kept
    /// when the rule switches so toggling back restores them.
    pub fn set_custom_share(
        &self,
        plan_uuid: PlanId,
        participant_uuid: ParticipantId,
        share: Option<f64>,
    ) -> PlanResult<()> {
        if let Some(value) = share {
            if !value.is_finite() {
                return Err(ValidationError::NonFiniteAmount.into());
            }
            if value < 0.0 {
                return Err(ValidationError::NegativeShare(value).into());
            }
        }
        member_of(&self.store, plan_uuid, participant_uuid)?;
        self.store.set_custom_share(participant_uuid, share)?;
        publish(&self.feed, plan_uuid, &[PlanChange::Participants]);
        Ok(())
    }

    fn owned_plan(&self, plan_uuid: PlanId, acting_account_id: &str) -> PlanResult<Plan> {
        let plan = self.get_plan(plan_uuid)?;
        if !plan.is_owned_by(acting_account_id.trim()) {
            return Err(ValidationError::NotOwner.into());
        }
        Ok(plan)
    }
}
