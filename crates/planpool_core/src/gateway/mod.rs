//! Capability contracts for collaborators outside the plan core.
//!
//! # Responsibility
//! - Define the personal-transaction and invite-code gateways the services
//!   call into.
//! - Ship local SQLite adapters so a host can run without a remote backend.
//!
//! # Invariants
//! - Gateway failures are reported as `GatewayError` and never panic.

pub mod invite;
pub mod personal_tx;

use std::error::Error;
use std::fmt::{Display, Formatter};

pub use invite::{normalize_invite_code, InviteGateway, SqliteInviteCodes};
pub use personal_tx::{
    PersonalTransactionGateway, PersonalTransactionRequest, SqlitePersonalTransactions,
};

/// Failure reported by an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayError {
    /// Collaborator name, e.g. `personal_tx` or `invite`.
    pub gateway: &'static str,
    /// Stable machine-readable code.
    pub code: &'static str,
    pub message: String,
    /// Whether retrying the same call may succeed.
    pub retryable: bool,
}

impl GatewayError {
    pub fn new(
        gateway: &'static str,
        code: &'static str,
        message: impl Into<String>,
        retryable: bool,
    ) -> Self {
        Self {
            gateway,
            code,
            message: message.into(),
            retryable,
        }
    }

    pub(crate) fn storage(gateway: &'static str, err: rusqlite::Error) -> Self {
        Self::new(gateway, "storage_failed", err.to_string(), true)
    }
}

impl Display for GatewayError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} gateway failed ({}): {}", self.gateway, self.code, self.message)
    }
}

impl Error for GatewayError {}

pub type GatewayResult<T> = Result<T, GatewayError>;
