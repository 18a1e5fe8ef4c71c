//! Participant domain model and color palette.
//!
//! # Responsibility
//! - Describe one person attached to a plan, account-backed or placeholder.
//! - Own the fixed palette and the deterministic color assignment rule.
//!
//! # Invariants
//! - A participant belongs to exactly one plan.
//! - An `account_id` appears at most once among a plan's participants once
//!   de-duplication has run.
//! - Palette colors stay unique per plan while any palette color is free.

use crate::model::plan::PlanId;
use crate::model::validation::ValidationError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Stable identifier of one plan participant.
pub type ParticipantId = Uuid;

/// Fixed participant palette, in assignment order.
pub const PARTICIPANT_PALETTE: [&str; 12] = [
    "#E57373", "#64B5F6", "#81C784", "#FFB74D", "#BA68C8", "#4DB6AC", "#F06292", "#7986CB",
    "#AED581", "#FFD54F", "#A1887F", "#90A4AE",
];

static HEX_COLOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#?([0-9A-Fa-f]{6})$").expect("valid hex color regex"));

/// Person attached to a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub uuid: ParticipantId,
    pub plan_uuid: PlanId,
    pub display_name: String,
    /// Present for signed-in users, `None` for name-only placeholders.
    pub account_id: Option<String>,
    /// One of `PARTICIPANT_PALETTE`.
    pub color: String,
    pub is_owner: bool,
    /// Absolute fair share used by `DistributionRule::Custom`.
    pub custom_share: Option<f64>,
    /// Monotonic join order; also the color assignment recency.
    pub join_seq: i64,
}

impl Participant {
    /// Returns whether this row is backed by `account_id`.
    pub fn is_account(&self, account_id: &str) -> bool {
        self.account_id.as_deref() == Some(account_id)
    }

    /// Returns whether this is a name-only placeholder.
    pub fn is_placeholder(&self) -> bool {
        self.account_id.is_none()
    }
}

/// Normalizes a requested color to `#RRGGBB` and checks palette membership.
pub fn normalize_palette_color(value: &str) -> Result<&'static str, ValidationError> {
    let trimmed = value.trim();
    let hex = HEX_COLOR_RE
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_ascii_uppercase())
        .ok_or_else(|| ValidationError::UnknownColor(trimmed.to_string()))?;
    let normalized = format!("#{hex}");
    PARTICIPANT_PALETTE
        .iter()
        .copied()
        .find(|color| *color == normalized)
        .ok_or(ValidationError::UnknownColor(normalized))
}

/// Picks a color for a new participant given the plan's current members.
///
/// Rules:
/// - First palette color no current participant uses.
/// - When the palette is exhausted, the color whose latest assignment is the
///   oldest (smallest `join_seq`), ties broken by palette order.
pub fn pick_palette_color(members: &[Participant]) -> &'static str {
    let mut latest_assignment: HashMap<&str, i64> = HashMap::new();
    for member in members {
        let entry = latest_assignment
            .entry(member.color.as_str())
            .or_insert(member.join_seq);
        *entry = (*entry).max(member.join_seq);
    }

    if let Some(free) = PARTICIPANT_PALETTE
        .iter()
        .copied()
        .find(|color| !latest_assignment.contains_key(color))
    {
        return free;
    }

    PARTICIPANT_PALETTE
        .iter()
        .copied()
        .min_by_key(|color| latest_assignment.get(color).copied().unwrap_or(i64::MIN))
        .unwrap_or(PARTICIPANT_PALETTE[0])
}
