//! Input validation errors shared by registry, ledger and settlement flows.

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Actionable validation failures surfaced to the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Plan title is blank after trim.
    EmptyTitle,
    /// Participant display name is blank after trim.
    EmptyName,
    /// Contribution description is blank after trim.
    EmptyDescription,
    /// Backing account id is blank after trim.
    EmptyAccountId,
    /// Ledger amounts must be non-zero.
    ZeroAmount,
    /// Amount is NaN or infinite.
    NonFiniteAmount,
    /// Amount must be strictly positive for this operation.
    NonPositiveAmount(f64),
    /// Custom shares cannot be negative.
    NegativeShare(f64),
    /// The account already has a participant row in this plan.
    DuplicateMembership(String),
    /// Requested color is already used by another participant of the plan.
    ColorInUse(String),
    /// Requested color is not part of the fixed palette.
    UnknownColor(String),
    /// Transfer target equals the participant being removed.
    SelfTransfer,
    /// The plan owner cannot be removed from their own plan.
    OwnerCannotLeave,
    /// Only the plan owner may perform this change.
    NotOwner,
    /// The acting account has no participant row in this plan.
    NotParticipant(String),
    /// Participant belongs to a different plan.
    ForeignParticipant,
    /// Invite code does not match the expected shape.
    InvalidInviteCode(String),
    /// Settlement amount is larger than what the debtor still owes or the
    /// creditor is still owed.
    ExceedsOutstanding { amount: f64, outstanding: f64 },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyTitle => write!(f, "plan title must not be blank"),
            Self::EmptyName => write!(f, "participant name must not be blank"),
            Self::EmptyDescription => write!(f, "description must not be blank"),
            Self::EmptyAccountId => write!(f, "account id must not be blank"),
            Self::ZeroAmount => write!(f, "amount must not be zero"),
            Self::NonFiniteAmount => write!(f, "amount must be a finite number"),
            Self::NonPositiveAmount(value) => {
                write!(f, "amount must be greater than zero, got {value}")
            }
            Self::NegativeShare(value) => write!(f, "custom share must not be negative, got {value}"),
            Self::DuplicateMembership(account_id) => {
                write!(f, "account `{account_id}` is already a participant of this plan")
            }
            Self::ColorInUse(color) => {
                write!(f, "color {color} is already taken; choose a different color")
            }
            Self::UnknownColor(color) => {
                write!(f, "color `{color}` is not in the palette; choose a palette color")
            }
            Self::SelfTransfer => write!(f, "contributions cannot be transferred to the same participant"),
            Self::OwnerCannotLeave => write!(f, "the plan owner cannot be removed from the plan"),
            Self::NotOwner => write!(f, "only the plan owner can do this"),
            Self::NotParticipant(account_id) => {
                write!(f, "account `{account_id}` is not a participant of this plan")
            }
            Self::ForeignParticipant => write!(f, "participant belongs to another plan"),
            Self::InvalidInviteCode(code) => write!(f, "invite code `{code}` is malformed"),
            Self::ExceedsOutstanding { amount, outstanding } => write!(
                f,
                "settlement of {amount} exceeds the outstanding balance of {outstanding}"
            ),
        }
    }
}

impl Error for ValidationError {}

/// Trims a user-facing label and rejects blank input with `empty`.
pub(crate) fn normalize_label(
    value: impl Into<String>,
    empty: ValidationError,
) -> Result<String, ValidationError> {
    let value = value.into();
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(empty);
    }
    Ok(trimmed.to_string())
}

/// Validates a signed ledger amount: finite and non-zero.
pub fn validate_signed_amount(amount: f64) -> Result<(), ValidationError> {
    if !amount.is_finite() {
        return Err(ValidationError::NonFiniteAmount);
    }
    if amount == 0.0 {
        return Err(ValidationError::ZeroAmount);
    }
    Ok(())
}

/// Validates an amount that must be strictly positive.
pub fn validate_positive_amount(amount: f64) -> Result<(), ValidationError> {
    if !amount.is_finite() {
        return Err(ValidationError::NonFiniteAmount);
    }
    if amount <= 0.0 {
        return Err(ValidationError::NonPositiveAmount(amount));
    }
    Ok(())
}
