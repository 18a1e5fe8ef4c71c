//! Personal transaction gateway.
//!
//! Posts and retracts entries on a participant's own card/transaction
//! history. The plan core stores the returned id on the ledger entry but
//! never owns the transaction itself.

use crate::gateway::{GatewayError, GatewayResult};
use crate::model::contribution::ContributionId;
use crate::model::plan::PlanId;
use rusqlite::{params, Connection};
use uuid::Uuid;

const GATEWAY: &str = "personal_tx";

/// Request to mirror an amount into one account's personal history.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonalTransactionRequest {
    pub account_id: String,
    /// `None` queues the transaction for later categorization by its owner.
    pub card_id: Option<String>,
    pub amount: f64,
    pub description: String,
    pub category: Option<String>,
    pub linked_plan: PlanId,
    pub linked_contribution: Option<ContributionId>,
}

/// Capability contract of the transaction/card subsystem.
pub trait PersonalTransactionGateway {
    /// Posts one transaction and returns its external id.
    fn post_personal_transaction(&self, request: &PersonalTransactionRequest)
        -> GatewayResult<String>;
    /// Retracts a previously posted transaction.
    fn retract_personal_transaction(&self, transaction_id: &str) -> GatewayResult<()>;
}

impl<T: PersonalTransactionGateway + ?Sized> PersonalTransactionGateway for &T {
    fn post_personal_transaction(
        &self,
        request: &PersonalTransactionRequest,
    ) -> GatewayResult<String> {
        (**self).post_personal_transaction(request)
    }

    fn retract_personal_transaction(&self, transaction_id: &str) -> GatewayResult<()> {
        (**self).retract_personal_transaction(transaction_id)
    }
}

/// Local adapter storing personal transactions in the plan database.
pub struct SqlitePersonalTransactions<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqlitePersonalTransactions<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl PersonalTransactionGateway for SqlitePersonalTransactions<'_> {
    fn post_personal_transaction(
        &self,
        request: &PersonalTransactionRequest,
    ) -> GatewayResult<String> {
        if request.account_id.trim().is_empty() {
            return Err(GatewayError::new(
                GATEWAY,
                "missing_account",
                "personal transactions need an account",
                false,
            ));
        }

        let transaction_id = Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO personal_transactions (
                    uuid,
                    account_id,
                    card_id,
                    amount,
                    description,
                    category,
                    linked_plan_uuid,
                    linked_contribution_uuid
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
                params![
                    transaction_id,
                    request.account_id.as_str(),
                    request.card_id.as_deref(),
                    request.amount,
                    request.description.as_str(),
                    request.category.as_deref(),
                    request.linked_plan.to_string(),
                    request.linked_contribution.map(|value| value.to_string()),
                ],
            )
            .map_err(|err| GatewayError::storage(GATEWAY, err))?;
        Ok(transaction_id)
    }

    fn retract_personal_transaction(&self, transaction_id: &str) -> GatewayResult<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE personal_transactions SET is_retracted = 1 WHERE uuid = ?1;",
                [transaction_id],
            )
            .map_err(|err| GatewayError::storage(GATEWAY, err))?;
        if changed == 0 {
            return Err(GatewayError::new(
                GATEWAY,
                "transaction_not_found",
                format!("personal transaction {transaction_id} does not exist"),
                false,
            ));
        }
        Ok(())
    }
}
