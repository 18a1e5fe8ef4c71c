//! Error surface shared by plan use-case services.

use crate::gateway::GatewayError;
use crate::ledger::balance::InvariantViolation;
use crate::model::validation::ValidationError;
use crate::repo::RepoError;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Result alias used by every service.
pub type PlanResult<T> = Result<T, PlanError>;

/// Errors from plan service operations.
#[derive(Debug)]
pub enum PlanError {
    /// Input rejected before any write; message is actionable.
    Validation(ValidationError),
    /// Referenced record does not exist (or was removed concurrently).
    NotFound { entity: &'static str, id: Uuid },
    /// Balances no longer sum to zero; carries a best-effort sheet.
    InvariantViolation(InvariantViolation),
    /// A collaborating subsystem failed.
    ExternalService(GatewayError),
    /// Storage failure.
    Repo(RepoError),
}

impl PlanError {
    /// Soft errors are expected under concurrent use; callers refresh and
    /// carry on instead of surfacing a failure dialog.
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl Display for PlanError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::InvariantViolation(err) => write!(f, "{err}"),
            Self::ExternalService(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for PlanError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::InvariantViolation(err) => Some(err),
            Self::ExternalService(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::NotFound { .. } => None,
        }
    }
}

impl From<RepoError> for PlanError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound { entity, id } => Self::NotFound { entity, id },
            RepoError::Validation(err) => Self::Validation(err),
            other => Self::Repo(other),
        }
    }
}

impl From<ValidationError> for PlanError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<GatewayError> for PlanError {
    fn from(value: GatewayError) -> Self {
        Self::ExternalService(value)
    }
}

impl From<InvariantViolation> for PlanError {
    fn from(value: InvariantViolation) -> Self {
        Self::InvariantViolation(value)
    }
}

pub(crate) fn not_found(entity: &'static str, id: Uuid) -> PlanError {
    PlanError::NotFound { entity, id }
}
