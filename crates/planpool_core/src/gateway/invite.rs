//! Plan invitation gateway.
//!
//! Codes are six characters from an alphabet without look-alike glyphs
//! (`0/O`, `1/I`), derived from UUIDv4 randomness.

use crate::gateway::{GatewayError, GatewayResult};
use crate::model::plan::PlanId;
use crate::model::validation::ValidationError;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use uuid::Uuid;

const GATEWAY: &str = "invite";
const INVITE_CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
/// Number of characters in an invite code.
pub const INVITE_CODE_LEN: usize = 6;
const ISSUE_ATTEMPTS: usize = 4;

static INVITE_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-HJ-NP-Z2-9]{6}$").expect("valid invite code regex"));

/// Capability contract of the plan invitation subsystem.
pub trait InviteGateway {
    /// Maps a redeemed code to its plan.
    fn resolve_invite_code(&self, code: &str) -> GatewayResult<PlanId>;
    /// Returns the plan's invite code, issuing one when none exists.
    fn issue_invite_code(&self, plan_uuid: PlanId) -> GatewayResult<String>;
}

impl<T: InviteGateway + ?Sized> InviteGateway for &T {
    fn resolve_invite_code(&self, code: &str) -> GatewayResult<PlanId> {
        (**self).resolve_invite_code(code)
    }

    fn issue_invite_code(&self, plan_uuid: PlanId) -> GatewayResult<String> {
        (**self).issue_invite_code(plan_uuid)
    }
}

/// Normalizes user-typed codes (trim, upper case) and checks their shape.
pub fn normalize_invite_code(code: &str) -> Result<String, ValidationError> {
    let normalized = code.trim().to_ascii_uppercase();
    if INVITE_CODE_RE.is_match(&normalized) {
        Ok(normalized)
    } else {
        Err(ValidationError::InvalidInviteCode(code.trim().to_string()))
    }
}

/// Local adapter storing invite codes in the plan database.
pub struct SqliteInviteCodes<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteInviteCodes<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl InviteGateway for SqliteInviteCodes<'_> {
    fn resolve_invite_code(&self, code: &str) -> GatewayResult<PlanId> {
        let normalized = normalize_invite_code(code)
            .map_err(|err| GatewayError::new(GATEWAY, "invalid_code", err.to_string(), false))?;
        let plan_text: Option<String> = self
            .conn
            .query_row(
                "SELECT plan_uuid FROM invite_codes WHERE code = ?1;",
                [normalized.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| GatewayError::storage(GATEWAY, err))?;

        let plan_text = plan_text.ok_or_else(|| {
            GatewayError::new(
                GATEWAY,
                "code_not_found",
                format!("invite code {normalized} is unknown or expired"),
                false,
            )
        })?;
        Uuid::parse_str(&plan_text).map_err(|_| {
            GatewayError::new(
                GATEWAY,
                "invalid_data",
                format!("invalid plan id `{plan_text}` for invite code"),
                false,
            )
        })
    }

    fn issue_invite_code(&self, plan_uuid: PlanId) -> GatewayResult<String> {
        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT code FROM invite_codes WHERE plan_uuid = ?1 ORDER BY created_at ASC LIMIT 1;",
                [plan_uuid.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| GatewayError::storage(GATEWAY, err))?;
        if let Some(code) = existing {
            return Ok(code);
        }

        for _ in 0..ISSUE_ATTEMPTS {
            let code = random_code();
            match self.conn.execute(
                "INSERT INTO invite_codes (code, plan_uuid) VALUES (?1, ?2);",
                [code.as_str(), plan_uuid.to_string().as_str()],
            ) {
                Ok(_) => return Ok(code),
                Err(rusqlite::Error::SqliteFailure(failure, _))
                    if failure.code == ErrorCode::ConstraintViolation
                        && failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
                {
                    continue;
                }
                Err(err) => return Err(GatewayError::storage(GATEWAY, err)),
            }
        }

        Err(GatewayError::new(
            GATEWAY,
            "code_exhausted",
            "could not allocate a unique invite code",
            true,
        ))
    }
}

fn random_code() -> String {
    Uuid::new_v4()
        .as_bytes()
        .iter()
        .take(INVITE_CODE_LEN)
        .map(|byte| INVITE_CODE_ALPHABET[usize::from(*byte) % INVITE_CODE_ALPHABET.len()] as char)
        .collect()
}
