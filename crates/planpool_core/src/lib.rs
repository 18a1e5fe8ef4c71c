//! Core of the shared-plan feature: who is in a plan, who paid what, who
//! owes whom, and how to settle up.
//! This crate is the single source of truth for the plan invariants.

pub mod db;
pub mod gateway;
pub mod ledger;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod sync;

pub use db::{open_db, open_db_in_memory, DbError};
pub use gateway::{
    GatewayError, InviteGateway, PersonalTransactionGateway, PersonalTransactionRequest,
    SqliteInviteCodes, SqlitePersonalTransactions,
};
pub use ledger::balance::{
    compute_balances, BalanceInput, BalanceSheet, InvariantViolation, ParticipantBalance,
};
pub use ledger::planner::plan_settlements;
pub use ledger::BALANCE_TOLERANCE;
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::contribution::{Contribution, ContributionId, PersonalLink};
pub use model::participant::{Participant, ParticipantId, PARTICIPANT_PALETTE};
pub use model::plan::{DistributionRule, Plan, PlanId};
pub use model::settlement::{SettlementProposal, SettlementRecord, SettlementStatus};
pub use model::validation::ValidationError;
pub use repo::{PlanStore, RepoError, RepoResult, SqlitePlanStore};
pub use service::{
    dedupe_on_membership_change, ConfirmOutcome, ContributionPreview, LedgerService, PlanError, PlanResult, PlanService,
    RegistryService, RemovalOutcome, RemovalService, RemoveOutcome, SelfContribution,
    SettlementOptions, SettlementService,
};
pub use sync::{PlanChange, PlanFeed, Subscription};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
