//! Plan store abstractions and SQLite persistence.
//!
//! # Responsibility
//! - Define the narrow, injectable store-access contracts used by services.
//! - Isolate SQLite query and transaction details from use-case logic.
//!
//! # Invariants
//! - Repository writes validate domain records before persistence.
//! - Repository APIs return semantic errors (`NotFound`, `Conflict`) in
//!   addition to transport errors.

pub mod contribution_repo;
pub mod participant_repo;
pub mod plan_repo;
pub mod removal_repo;
pub mod settlement_repo;
pub mod store;

pub use contribution_repo::ContributionRepository;
pub use participant_repo::{EnsureOutcome, NewParticipant, ParticipantRepository};
pub use plan_repo::{PlanRepository, PlanSnapshot};
pub use removal_repo::{RemovalPlan, RemovalRepository, RemovalSteps};
pub use settlement_repo::SettlementRepository;
pub use store::{RepoError, RepoResult, SqlitePlanStore};

/// Every store capability the plan services need.
pub trait PlanStore:
    PlanRepository
    + ParticipantRepository
    + ContributionRepository
    + SettlementRepository
    + RemovalRepository
{
}

impl<T> PlanStore for T where
    T: PlanRepository
        + ParticipantRepository
        + ContributionRepository
        + SettlementRepository
        + RemovalRepository
{
}
