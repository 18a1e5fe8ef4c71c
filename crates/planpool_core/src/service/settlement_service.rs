//! Balance, settlement planning and confirmation use-case service.
//!
//! # Responsibility
//! - Compute balances and settlement proposals from a consistent snapshot.
//! - Confirm proposals idempotently and optionally mirror them on the
//!   parties' personal histories.
//!
//! # Invariants
//! - Balances and proposals are recomputed on every call, never cached.
//! - Duplicate self-memberships are collapsed before a snapshot is used, so
//!   a racing join never counts twice in an equitable split.
//! - Confirming the same `(from, to, amount)` triple twice at one ledger
//!   revision stores one record; after the ledger moves on, the same triple
//!   is a new settlement.
//! - A confirmation never exceeds what the debtor owes or the creditor is
//!   owed, so it cannot flip a position's sign.
//! - Mirroring never fails a confirmation.

use crate::gateway::{PersonalTransactionGateway, PersonalTransactionRequest};
use crate::ledger::balance::{compute_balances, BalanceInput, BalanceSheet};
use crate::ledger::planner::plan_settlements;
use crate::ledger::BALANCE_TOLERANCE;
use crate::model::now_epoch_ms;
use crate::model::participant::Participant;
use crate::model::plan::PlanId;
use crate::model::settlement::{SettlementProposal, SettlementRecord, SettlementStatus};
use crate::model::validation::{validate_positive_amount, ValidationError};
use crate::repo::{PlanSnapshot, PlanStore, RepoError};
use crate::service::error::{not_found, PlanResult};
use crate::service::registry_service::has_duplicate_accounts;
use crate::service::{member_of, participant_for_account, publish};
use crate::sync::{PlanChange, PlanFeed};
use log::{error, info, warn};
use std::sync::Arc;
use uuid::Uuid;

/// Attempts before a confirmation that keeps racing ledger writes gives up.
pub const MAX_CONFIRM_ATTEMPTS: usize = 3;

/// Confirmation behavior switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettlementOptions {
    /// Post a debit for `from` and a credit for `to` on confirmation.
    /// Placeholders have no personal history and are skipped.
    pub mirror_personal_transactions: bool,
}

/// Result of `confirm`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmOutcome {
    pub record: SettlementRecord,
    /// `false` when the triple was already confirmed at the current ledger
    /// revision.
    pub newly_confirmed: bool,
}

/// Settlement facade.
pub struct SettlementService<S: PlanStore, G: PersonalTransactionGateway> {
    store: S,
    transactions: G,
    options: SettlementOptions,
    feed: Option<Arc<PlanFeed>>,
}

impl<S: PlanStore, G: PersonalTransactionGateway> SettlementService<S, G> {
    /// Creates service from store and transaction gateway implementations.
    pub fn new(store: S, transactions: G, options: SettlementOptions) -> Self {
        Self {
            store,
            transactions,
            options,
            feed: None,
        }
    }

    /// Publishes committed changes on `feed`.
    pub fn with_feed(mut self, feed: Arc<PlanFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Computes every participant's net position.
    ///
    /// # Errors
    /// - `PlanError::InvariantViolation` with a best-effort sheet when the
    ///   ledger no longer sums to zero.
    pub fn balances(&self, plan_uuid: PlanId) -> PlanResult<BalanceSheet> {
        let snapshot = self.snapshot(plan_uuid)?;
        sheet_of(&snapshot)
    }

    /// Returns the minimal transfer list that settles the plan.
    pub fn propose(&self, plan_uuid: PlanId) -> PlanResult<Vec<SettlementProposal>> {
        let sheet = self.balances(plan_uuid)?;
        Ok(plan_settlements(&sheet.nets()))
    }

    /// Lists confirmed settlements, newest first.
    pub fn list_settlements(&self, plan_uuid: PlanId) -> PlanResult<Vec<SettlementRecord>> {
        if self.store.get_plan(plan_uuid)?.is_none() {
            return Err(not_found("plan", plan_uuid));
        }
        Ok(self.store.list_settlements(plan_uuid)?)
    }

    /// Confirms a proposal on behalf of any participant of the plan.
    ///
    /// Confirming a triple that was already confirmed at the current ledger
    /// revision returns the stored record with `newly_confirmed == false`.
    ///
    /// # Errors
    /// - `ValidationError::ExceedsOutstanding` when `amount` is larger than
    ///   the debtor's remaining debt or the creditor's remaining credit.
    pub fn confirm(
        &self,
        plan_uuid: PlanId,
        proposal: SettlementProposal,
        confirming_account_id: &str,
    ) -> PlanResult<ConfirmOutcome> {
        validate_positive_amount(proposal.amount)?;
        if proposal.from == proposal.to {
            return Err(ValidationError::SelfTransfer.into());
        }
        let confirmer = participant_for_account(&self.store, plan_uuid, confirming_account_id.trim())?;
        let from = member_of(&self.store, plan_uuid, proposal.from)?;
        let to = member_of(&self.store, plan_uuid, proposal.to)?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let snapshot = self.snapshot(plan_uuid)?;
            let revision = snapshot.plan.ledger_revision;
            let repeated = snapshot.settlements.iter().find(|record| {
                record.ledger_revision == revision && record.matches(&proposal, BALANCE_TOLERANCE)
            });
            if let Some(existing) = repeated {
                return Ok(self.already_confirmed(existing.clone()));
            }
            ensure_within_outstanding(&sheet_of(&snapshot)?, &proposal)?;

            let candidate = SettlementRecord {
                uuid: Uuid::new_v4(),
                plan_uuid,
                from: from.uuid,
                to: to.uuid,
                amount: proposal.amount,
                status: SettlementStatus::Confirmed,
                confirmed_by: confirmer.uuid,
                ledger_revision: revision,
                from_transaction_id: None,
                to_transaction_id: None,
                confirmed_at: now_epoch_ms(),
            };
            match self
                .store
                .insert_settlement_once(&candidate, snapshot.settlements.len())
            {
                Ok((record, false)) => return Ok(self.already_confirmed(record)),
                Ok((mut record, true)) => {
                    if self.options.mirror_personal_transactions {
                        self.mirror(&mut record, &from, &to);
                    }
                    info!(
                        "event=settlement_confirm module=service status=ok plan_id={} settlement_id={} duplicate=false attempts={}",
                        plan_uuid, record.uuid, attempt
                    );
                    publish(&self.feed, plan_uuid, &[PlanChange::Settlements]);
                    return Ok(ConfirmOutcome {
                        record,
                        newly_confirmed: true,
                    });
                }
                Err(RepoError::Conflict(reason)) if attempt < MAX_CONFIRM_ATTEMPTS => {
                    warn!(
                        "event=settlement_confirm module=service status=retry plan_id={plan_uuid} attempt={attempt} reason={reason}"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn already_confirmed(&self, record: SettlementRecord) -> ConfirmOutcome {
        info!(
            "event=settlement_confirm module=service status=ok plan_id={} settlement_id={} duplicate=true",
            record.plan_uuid, record.uuid
        );
        ConfirmOutcome {
            record,
            newly_confirmed: false,
        }
    }

    /// Loads a snapshot, collapsing duplicate self-memberships first.
    fn snapshot(&self, plan_uuid: PlanId) -> PlanResult<PlanSnapshot> {
        let snapshot = self.store.load_snapshot(plan_uuid)?;
        if !has_duplicate_accounts(&snapshot.participants) {
            return Ok(snapshot);
        }
        let removed = self.store.collapse_duplicate_accounts(plan_uuid)?;
        warn!(
            "event=participant_dedupe module=service status=ok plan_id={plan_uuid} removed={removed} trigger=snapshot"
        );
        publish(
            &self.feed,
            plan_uuid,
            &[PlanChange::Participants, PlanChange::Contributions],
        );
        Ok(self.store.load_snapshot(plan_uuid)?)
    }

    fn mirror(&self, record: &mut SettlementRecord, from: &Participant, to: &Participant) {
        let from_id = self.post_mirror(record, from, -record.amount, "Settlement paid");
        let to_id = self.post_mirror(record, to, record.amount, "Settlement received");
        if from_id.is_none() && to_id.is_none() {
            return;
        }
        match self.store.attach_mirror_transactions(
            record.uuid,
            from_id.as_deref(),
            to_id.as_deref(),
        ) {
            Ok(()) => {
                record.from_transaction_id = from_id;
                record.to_transaction_id = to_id;
            }
            Err(err) => warn!(
                "event=settlement_mirror module=service status=error plan_id={} settlement_id={} step=attach error={}",
                record.plan_uuid, record.uuid, err
            ),
        }
    }

    fn post_mirror(
        &self,
        record: &SettlementRecord,
        party: &Participant,
        amount: f64,
        description: &str,
    ) -> Option<String> {
        let account_id = party.account_id.as_ref()?;
        let request = PersonalTransactionRequest {
            account_id: account_id.clone(),
            card_id: None,
            amount,
            description: description.to_string(),
            category: None,
            linked_plan: record.plan_uuid,
            linked_contribution: None,
        };
        match self.transactions.post_personal_transaction(&request) {
            Ok(transaction_id) => Some(transaction_id),
            Err(err) => {
                warn!(
                    "event=settlement_mirror module=service status=error plan_id={} settlement_id={} gateway={} code={} retryable={}",
                    record.plan_uuid, record.uuid, err.gateway, err.code, err.retryable
                );
                None
            }
        }
    }
}

fn sheet_of(snapshot: &PlanSnapshot) -> PlanResult<BalanceSheet> {
    let plan_uuid = snapshot.plan.uuid;
    let result = compute_balances(BalanceInput {
        participants: &snapshot.participants,
        contributions: &snapshot.contributions,
        settlements: &snapshot.settlements,
        rule: snapshot.plan.rule,
    });
    match result {
        Ok(sheet) => {
            if sheet.needs_attention {
                warn!("event=balance_compute module=service status=attention plan_id={plan_uuid}");
            }
            Ok(sheet)
        }
        Err(violation) => {
            error!(
                "event=balance_compute module=service status=error plan_id={plan_uuid} reason=invariant_violation"
            );
            Err(violation.into())
        }
    }
}

/// Rejects transfers larger than either side's remaining position.
fn ensure_within_outstanding(sheet: &BalanceSheet, proposal: &SettlementProposal) -> PlanResult<()> {
    let owed = -sheet.net_of(proposal.from).unwrap_or(0.0);
    let due = sheet.net_of(proposal.to).unwrap_or(0.0);
    let outstanding = owed.min(due).max(0.0);
    if proposal.amount > outstanding + BALANCE_TOLERANCE {
        return Err(ValidationError::ExceedsOutstanding {
            amount: proposal.amount,
            outstanding,
        }
        .into());
    }
    Ok(())
}
