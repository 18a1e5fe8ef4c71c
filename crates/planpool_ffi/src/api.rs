//! FFI use-case API for the shared-plan screens.
//!
//! # Responsibility
//! - Expose plan, participant, ledger and settlement use cases to Dart.
//! - Translate core errors into envelopes the UI can act on.
//!
//! # Invariants
//! - Exported functions never panic across the FFI boundary.
//! - `soft_failure == true` means "refresh the view": the target was
//!   already changed or removed elsewhere.
//! - Ids cross the boundary as UUID strings.
//! - Every service shares one process-wide feed; a plan this process created
//!   or joined collapses duplicated self-memberships on each membership change.

use log::debug;
use planpool_core::db::open_db;
use planpool_core::{
    core_version as core_version_inner, dedupe_on_membership_change,
    init_logging as init_logging_inner, ping as ping_inner, BalanceSheet, Contribution,
    ContributionPreview, DistributionRule, LedgerService, Participant, PlanError, PlanFeed,
    PlanResult, PlanService, RegistryService, RemovalOutcome, RemovalService, RemoveOutcome,
    RepoError, SelfContribution, SettlementOptions, SettlementProposal, SettlementRecord,
    SettlementService, SqliteInviteCodes, SqlitePersonalTransactions, SqlitePlanStore,
    Subscription,
};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use uuid::Uuid;

const DB_PATH_ENV: &str = "PLANPOOL_DB_PATH";
const DB_FILE_NAME: &str = "planpool.sqlite3";
static DB_PATH: OnceLock<PathBuf> = OnceLock::new();
static PLAN_FEED: OnceLock<Arc<PlanFeed>> = OnceLock::new();
static MEMBERSHIP_WATCHES: OnceLock<Mutex<HashMap<Uuid, Subscription>>> = OnceLock::new();

/// Minimal health-check API for FRB smoke integration.
///
/// # FFI contract
/// - Sync call, non-blocking.
/// - Never throws; always returns a UTF-8 string.
#[flutter_rust_bridge::frb(sync)]
pub fn ping() -> String {
    ping_inner().to_owned()
}

/// Expose core crate version through FFI.
#[flutter_rust_bridge::frb(sync)]
pub fn core_version() -> String {
    core_version_inner().to_owned()
}

/// Initializes core logging once per process.
///
/// `level` is one of `trace|debug|info|warn|error`; `log_dir` must be an
/// absolute directory. Returns an empty string on success and the error
/// message otherwise. Repeating the same call is a no-op.
#[flutter_rust_bridge::frb(sync)]
pub fn init_logging(level: String, log_dir: String) -> String {
    match init_logging_inner(level.as_str(), log_dir.as_str()) {
        Ok(()) => String::new(),
        Err(err) => err,
    }
}

/// Generic action envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanActionResponse {
    pub ok: bool,
    /// Id of the created/affected record (an invite code for invite calls).
    pub id: Option<String>,
    pub message: String,
    /// The failure means "already done elsewhere"; refresh silently.
    pub soft_failure: bool,
}

impl PlanActionResponse {
    fn from_result(result: Result<String, CallError>, success: impl Into<String>) -> Self {
        match result {
            Ok(id) => Self {
                ok: true,
                id: Some(id),
                message: success.into(),
                soft_failure: false,
            },
            Err(err) => Self {
                ok: false,
                id: None,
                message: err.message,
                soft_failure: err.soft,
            },
        }
    }
}

/// One participant's position.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceRow {
    pub participant_id: String,
    pub paid: f64,
    pub fair_share: f64,
    pub net: f64,
}

/// Balance envelope; rows are present even when `ok == false` if the core
/// produced a best-effort sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct BalancesResponse {
    pub ok: bool,
    pub rows: Vec<BalanceRow>,
    pub total: f64,
    /// Show the "needs reconciliation" state.
    pub needs_attention: bool,
    pub message: String,
}

/// One proposed transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementItem {
    pub from_participant_id: String,
    pub to_participant_id: String,
    pub amount: f64,
}

/// Proposal list envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementsResponse {
    pub ok: bool,
    pub items: Vec<SettlementItem>,
    pub message: String,
}

/// Participant removal envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct RemovalResponse {
    pub ok: bool,
    pub removed: bool,
    /// The participant has ledger entries; ask the user for a strategy.
    pub needs_strategy: bool,
    /// Signed sum of the participant's entries when `needs_strategy`.
    pub contribution_total: f64,
    pub message: String,
    pub soft_failure: bool,
}

impl RemovalResponse {
    fn failure(err: CallError) -> Self {
        Self {
            ok: false,
            removed: false,
            needs_strategy: false,
            contribution_total: 0.0,
            message: err.message,
            soft_failure: err.soft,
        }
    }

    fn from_outcome(result: Result<RemovalOutcome, CallError>) -> Self {
        match result {
            Ok(outcome) => Self {
                ok: true,
                removed: true,
                needs_strategy: false,
                contribution_total: 0.0,
                message: format!(
                    "Participant removed; {} entries written off.",
                    outcome.written_off.len()
                ),
                soft_failure: false,
            },
            Err(err) => Self::failure(err),
        }
    }
}

/// One plan member.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantItem {
    pub id: String,
    pub display_name: String,
    /// `None` for name-only placeholders.
    pub account_id: Option<String>,
    pub color: String,
    pub is_owner: bool,
    pub custom_share: Option<f64>,
}

/// Participant list envelope, in join order.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantsResponse {
    pub ok: bool,
    pub items: Vec<ParticipantItem>,
    pub message: String,
}

/// One ledger entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ContributionItem {
    pub id: String,
    pub payer_id: String,
    pub description: String,
    pub amount: f64,
    pub occurred_at_ms: i64,
    /// Linked personal transaction, for entries recorded for oneself.
    pub personal_transaction_id: Option<String>,
}

/// Ledger entry list envelope; `total` is the signed sum of `items`.
#[derive(Debug, Clone, PartialEq)]
pub struct ContributionsResponse {
    pub ok: bool,
    pub items: Vec<ContributionItem>,
    pub total: f64,
    pub message: String,
}

impl ContributionsResponse {
    fn from_result(result: Result<(Vec<Contribution>, f64), CallError>) -> Self {
        match result {
            Ok((entries, total)) => Self {
                ok: true,
                message: format!("{} entries.", entries.len()),
                items: entries.iter().map(to_contribution_item).collect(),
                total,
            },
            Err(err) => Self {
                ok: false,
                items: Vec::new(),
                total: 0.0,
                message: err.message,
            },
        }
    }
}

/// One confirmed transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementRecordItem {
    pub id: String,
    pub from_participant_id: String,
    pub to_participant_id: String,
    pub amount: f64,
    pub confirmed_by_participant_id: String,
    pub confirmed_at_ms: i64,
}

/// Confirmed transfer history envelope, newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementRecordsResponse {
    pub ok: bool,
    pub items: Vec<SettlementRecordItem>,
    pub message: String,
}

/// Creates a plan; the caller's account becomes its owner.
#[flutter_rust_bridge::frb(sync)]
pub fn plan_create(
    title: String,
    owner_account_id: String,
    owner_display_name: String,
    custom_distribution: bool,
) -> PlanActionResponse {
    let rule = if custom_distribution {
        DistributionRule::Custom
    } else {
        DistributionRule::Equitable
    };
    let result = with_connection("plan_create", |conn| {
        let (plan, _) = plans(conn)?.create_plan(
            title,
            owner_account_id.as_str(),
            owner_display_name,
            rule,
        )?;
        Ok(plan.uuid)
    })
    .map(|plan_uuid| {
        watch_membership(plan_uuid);
        plan_uuid.to_string()
    });
    PlanActionResponse::from_result(result, "Plan created.")
}

/// Renames a plan. Owner only.
#[flutter_rust_bridge::frb(sync)]
pub fn plan_rename(
    plan_id: String,
    acting_account_id: String,
    title: String,
) -> PlanActionResponse {
    let result = parse_id(&plan_id, "plan_id").and_then(|plan_uuid| {
        with_connection("plan_rename", |conn| {
            let plan = plans(conn)?.rename_plan(plan_uuid, acting_account_id.as_str(), title)?;
            Ok(plan.uuid.to_string())
        })
    });
    PlanActionResponse::from_result(result, "Plan renamed.")
}

/// Switches between equal splitting and custom shares. Owner only.
#[flutter_rust_bridge::frb(sync)]
pub fn plan_set_distribution_rule(
    plan_id: String,
    acting_account_id: String,
    custom_distribution: bool,
) -> PlanActionResponse {
    let rule = if custom_distribution {
        DistributionRule::Custom
    } else {
        DistributionRule::Equitable
    };
    let result = parse_id(&plan_id, "plan_id").and_then(|plan_uuid| {
        with_connection("plan_set_distribution_rule", |conn| {
            let plan =
                plans(conn)?.set_distribution_rule(plan_uuid, acting_account_id.as_str(), rule)?;
            Ok(plan.uuid.to_string())
        })
    });
    PlanActionResponse::from_result(result, "Distribution rule updated.")
}

/// Deletes a plan. Owner only.
#[flutter_rust_bridge::frb(sync)]
pub fn plan_delete(plan_id: String, acting_account_id: String) -> PlanActionResponse {
    let result = parse_id(&plan_id, "plan_id").and_then(|plan_uuid| {
        with_connection("plan_delete", |conn| {
            plans(conn)?.delete_plan(plan_uuid, acting_account_id.as_str())?;
            Ok(plan_uuid)
        })
    })
    .map(|plan_uuid| {
        unwatch_membership(plan_uuid);
        plan_uuid.to_string()
    });
    PlanActionResponse::from_result(result, "Plan deleted.")
}

/// Adds a participant; `account_id == None` creates a name-only placeholder.
#[flutter_rust_bridge::frb(sync)]
pub fn participant_add(
    plan_id: String,
    display_name: String,
    account_id: Option<String>,
    color: Option<String>,
) -> PlanActionResponse {
    let result = parse_id(&plan_id, "plan_id").and_then(|plan_uuid| {
        with_connection("participant_add", |conn| {
            let participant = registry(conn)?.add_participant(
                plan_uuid,
                display_name,
                account_id.as_deref(),
                color.as_deref(),
            )?;
            Ok(participant.uuid.to_string())
        })
    });
    PlanActionResponse::from_result(result, "Participant added.")
}

/// Returns the account's participant id, joining the plan when needed.
///
/// Safe to call from several sessions of one account at once.
#[flutter_rust_bridge::frb(sync)]
pub fn participant_ensure_self(
    plan_id: String,
    account_id: String,
    display_name: String,
) -> PlanActionResponse {
    let result = parse_id(&plan_id, "plan_id").and_then(|plan_uuid| {
        with_connection("participant_ensure_self", |conn| {
            registry(conn)?.ensure_self_participant(plan_uuid, account_id.as_str(), display_name)
        })
    });
    match result {
        Ok(outcome) => {
            watch_membership(outcome.participant.plan_uuid);
            let message = if outcome.created {
                "Joined plan."
            } else {
                "Already a participant."
            };
            PlanActionResponse::from_result(Ok(outcome.participant.uuid.to_string()), message)
        }
        Err(err) => PlanActionResponse::from_result(Err(err), ""),
    }
}

/// Lists the plan's participants in join order.
#[flutter_rust_bridge::frb(sync)]
pub fn participants_list(plan_id: String) -> ParticipantsResponse {
    let result = parse_id(&plan_id, "plan_id").and_then(|plan_uuid| {
        with_connection("participants_list", |conn| registry(conn)?.list_participants(plan_uuid))
    });
    match result {
        Ok(participants) => ParticipantsResponse {
            ok: true,
            message: format!("{} participant(s).", participants.len()),
            items: participants.iter().map(to_participant_item).collect(),
        },
        Err(err) => ParticipantsResponse {
            ok: false,
            items: Vec::new(),
            message: err.message,
        },
    }
}

/// Sets or clears (`None`) a participant's absolute custom share.
#[flutter_rust_bridge::frb(sync)]
pub fn participant_set_custom_share(
    plan_id: String,
    participant_id: String,
    share: Option<f64>,
) -> PlanActionResponse {
    let result = parse_id(&plan_id, "plan_id").and_then(|plan_uuid| {
        let participant_uuid = parse_id(&participant_id, "participant_id")?;
        with_connection("participant_set_custom_share", |conn| {
            plans(conn)?.set_custom_share(plan_uuid, participant_uuid, share)?;
            Ok(participant_uuid.to_string())
        })
    });
    PlanActionResponse::from_result(result, "Share updated.")
}

/// Returns the plan's invite code in `id`.
#[flutter_rust_bridge::frb(sync)]
pub fn plan_invite_code(plan_id: String) -> PlanActionResponse {
    let result = parse_id(&plan_id, "plan_id").and_then(|plan_uuid| {
        with_connection("plan_invite_code", |conn| registry(conn)?.invite_code(plan_uuid))
    });
    PlanActionResponse::from_result(result, "Invite code ready.")
}

/// Redeems an invite code; returns the caller's participant id.
#[flutter_rust_bridge::frb(sync)]
pub fn participant_join_with_invite(
    code: String,
    account_id: String,
    display_name: String,
) -> PlanActionResponse {
    let result = with_connection("participant_join_with_invite", |conn| {
        let outcome =
            registry(conn)?.join_with_invite(code.as_str(), account_id.as_str(), display_name)?;
        Ok(outcome.participant)
    })
    .map(|participant| {
        watch_membership(participant.plan_uuid);
        participant.uuid.to_string()
    });
    PlanActionResponse::from_result(result, "Joined plan.")
}

/// Records one ledger entry.
#[flutter_rust_bridge::frb(sync)]
pub fn contribution_record(
    plan_id: String,
    payer_id: String,
    description: String,
    amount: f64,
    occurred_at_ms: i64,
) -> PlanActionResponse {
    let result = parse_id(&plan_id, "plan_id").and_then(|plan_uuid| {
        let payer_uuid = parse_id(&payer_id, "payer_id")?;
        with_connection("contribution_record", |conn| {
            let entry = ledger(conn)?.record(plan_uuid, payer_uuid, description, amount, occurred_at_ms)?;
            Ok(entry.uuid.to_string())
        })
    });
    PlanActionResponse::from_result(result, "Contribution recorded.")
}

/// Records an entry paid by the caller and mirrors it on their personal
/// history. `card_id == None` queues the personal transaction for later
/// categorization.
#[flutter_rust_bridge::frb(sync)]
pub fn contribution_record_for_self(
    plan_id: String,
    account_id: String,
    card_id: Option<String>,
    description: String,
    amount: f64,
    occurred_at_ms: i64,
    category: Option<String>,
) -> PlanActionResponse {
    let result = parse_id(&plan_id, "plan_id").and_then(|plan_uuid| {
        with_connection("contribution_record_for_self", |conn| {
            let entry = ledger(conn)?.record_for_self(
                plan_uuid,
                SelfContribution {
                    account_id,
                    card_id,
                    description,
                    amount,
                    occurred_at: occurred_at_ms,
                    category,
                },
            )?;
            Ok(entry.uuid.to_string())
        })
    });
    PlanActionResponse::from_result(result, "Contribution recorded.")
}

/// Lists every entry of the plan, newest first.
#[flutter_rust_bridge::frb(sync)]
pub fn contributions_list(plan_id: String) -> ContributionsResponse {
    let result = parse_id(&plan_id, "plan_id").and_then(|plan_uuid| {
        with_connection("contributions_list", |conn| {
            let entries = ledger(conn)?.for_plan(plan_uuid)?;
            let total = entries.iter().map(|entry| entry.amount).sum();
            Ok((entries, total))
        })
    });
    ContributionsResponse::from_result(result)
}

/// Shows what removing a participant would move or delete.
#[flutter_rust_bridge::frb(sync)]
pub fn participant_preview_contributions(
    plan_id: String,
    participant_id: String,
) -> ContributionsResponse {
    let result = parse_id(&plan_id, "plan_id").and_then(|plan_uuid| {
        let participant_uuid = parse_id(&participant_id, "participant_id")?;
        with_connection("participant_preview_contributions", |conn| {
            let ContributionPreview { entries, total, .. } =
                removal(conn)?.preview_contributions(plan_uuid, participant_uuid)?;
            Ok((entries, total))
        })
    });
    ContributionsResponse::from_result(result)
}

/// Deletes one ledger entry, retracting its personal transaction first.
#[flutter_rust_bridge::frb(sync)]
pub fn contribution_delete(contribution_id: String) -> PlanActionResponse {
    let result = parse_id(&contribution_id, "contribution_id").and_then(|contribution_uuid| {
        with_connection("contribution_delete", |conn| {
            ledger(conn)?.delete_contribution(contribution_uuid)?;
            Ok(contribution_uuid.to_string())
        })
    });
    PlanActionResponse::from_result(result, "Contribution deleted.")
}

/// Computes current balances.
#[flutter_rust_bridge::frb(sync)]
pub fn plan_balances(plan_id: String) -> BalancesResponse {
    let outcome = parse_id(&plan_id, "plan_id").and_then(|plan_uuid| {
        with_connection_raw("plan_balances", |conn| settlements(conn)?.balances(plan_uuid))
    });

    match outcome {
        Ok(Ok(sheet)) => balances_response(true, &sheet, "Balances computed.".to_string()),
        Ok(Err(PlanError::InvariantViolation(violation))) => balances_response(
            false,
            &violation.best_effort,
            format!("plan_balances failed: {violation}"),
        ),
        Ok(Err(err)) => BalancesResponse {
            ok: false,
            rows: Vec::new(),
            total: 0.0,
            needs_attention: false,
            message: format!("plan_balances failed: {err}"),
        },
        Err(err) => BalancesResponse {
            ok: false,
            rows: Vec::new(),
            total: 0.0,
            needs_attention: false,
            message: err.message,
        },
    }
}

/// Lists proposed transfers that settle the plan.
#[flutter_rust_bridge::frb(sync)]
pub fn plan_settlements(plan_id: String) -> SettlementsResponse {
    let result = parse_id(&plan_id, "plan_id").and_then(|plan_uuid| {
        with_connection("plan_settlements", |conn| settlements(conn)?.propose(plan_uuid))
    });
    match result {
        Ok(proposals) => SettlementsResponse {
            ok: true,
            message: if proposals.is_empty() {
                "Plan is settled.".to_string()
            } else {
                format!("{} transfer(s) settle the plan.", proposals.len())
            },
            items: proposals.iter().map(to_settlement_item).collect(),
        },
        Err(err) => SettlementsResponse {
            ok: false,
            items: Vec::new(),
            message: err.message,
        },
    }
}

/// Lists confirmed transfers.
#[flutter_rust_bridge::frb(sync)]
pub fn settlements_list(plan_id: String) -> SettlementRecordsResponse {
    let result = parse_id(&plan_id, "plan_id").and_then(|plan_uuid| {
        with_connection("settlements_list", |conn| {
            settlements(conn)?.list_settlements(plan_uuid)
        })
    });
    match result {
        Ok(records) => SettlementRecordsResponse {
            ok: true,
            message: format!("{} confirmed transfer(s).", records.len()),
            items: records.iter().map(to_settlement_record_item).collect(),
        },
        Err(err) => SettlementRecordsResponse {
            ok: false,
            items: Vec::new(),
            message: err.message,
        },
    }
}

/// Confirms one proposed transfer. Repeating it before the ledger changes
/// is a no-op; a transfer larger than what is still owed is rejected.
#[flutter_rust_bridge::frb(sync)]
pub fn settlement_confirm(
    plan_id: String,
    from_participant_id: String,
    to_participant_id: String,
    amount: f64,
    confirming_account_id: String,
) -> PlanActionResponse {
    let result = parse_id(&plan_id, "plan_id").and_then(|plan_uuid| {
        let proposal = SettlementProposal {
            from: parse_id(&from_participant_id, "from_participant_id")?,
            to: parse_id(&to_participant_id, "to_participant_id")?,
            amount,
        };
        with_connection("settlement_confirm", |conn| {
            settlements(conn)?.confirm(plan_uuid, proposal, confirming_account_id.as_str())
        })
    });
    match result {
        Ok(outcome) => {
            let message = if outcome.newly_confirmed {
                "Settlement confirmed."
            } else {
                "Settlement was already confirmed."
            };
            PlanActionResponse::from_result(Ok(outcome.record.uuid.to_string()), message)
        }
        Err(err) => PlanActionResponse::from_result(Err(err), ""),
    }
}

/// Removes a participant without ledger entries, or reports that a
/// strategy is needed.
#[flutter_rust_bridge::frb(sync)]
pub fn participant_remove(plan_id: String, participant_id: String) -> RemovalResponse {
    let result = parse_id(&plan_id, "plan_id").and_then(|plan_uuid| {
        let participant_uuid = parse_id(&participant_id, "participant_id")?;
        with_connection("participant_remove", |conn| {
            registry(conn)?.remove_participant(plan_uuid, participant_uuid)
        })
    });
    match result {
        Ok(RemoveOutcome::Removed) => RemovalResponse {
            ok: true,
            removed: true,
            needs_strategy: false,
            contribution_total: 0.0,
            message: "Participant removed.".to_string(),
            soft_failure: false,
        },
        Ok(RemoveOutcome::NeedsStrategy(preview)) => RemovalResponse {
            ok: true,
            removed: false,
            needs_strategy: true,
            contribution_total: preview.total,
            message: format!(
                "Participant has {} entries; transfer or delete them first.",
                preview.entries.len()
            ),
            soft_failure: false,
        },
        Err(err) => RemovalResponse::failure(err),
    }
}

/// Moves the participant's ledger to `target_participant_id` and removes them.
#[flutter_rust_bridge::frb(sync)]
pub fn participant_transfer_and_remove(
    plan_id: String,
    participant_id: String,
    target_participant_id: String,
    amount: Option<f64>,
) -> RemovalResponse {
    let result = parse_id(&plan_id, "plan_id").and_then(|plan_uuid| {
        let participant_uuid = parse_id(&participant_id, "participant_id")?;
        let target_uuid = parse_id(&target_participant_id, "target_participant_id")?;
        with_connection("participant_transfer_and_remove", |conn| {
            removal(conn)?.transfer_and_remove(
                plan_uuid,
                participant_uuid,
                target_uuid,
                amount,
            )
        })
    });
    RemovalResponse::from_outcome(result)
}

/// Deletes the participant's ledger and removes them.
#[flutter_rust_bridge::frb(sync)]
pub fn participant_delete_all_and_remove(
    plan_id: String,
    participant_id: String,
) -> RemovalResponse {
    let result = parse_id(&plan_id, "plan_id").and_then(|plan_uuid| {
        let participant_uuid = parse_id(&participant_id, "participant_id")?;
        with_connection("participant_delete_all_and_remove", |conn| {
            removal(conn)?.delete_all_and_remove(plan_uuid, participant_uuid)
        })
    });
    RemovalResponse::from_outcome(result)
}

#[derive(Debug)]
struct CallError {
    message: String,
    soft: bool,
}

fn parse_id(value: &str, field: &str) -> Result<Uuid, CallError> {
    Uuid::parse_str(value.trim()).map_err(|_| CallError {
        message: format!("{field} is not a valid id: `{}`", value.trim()),
        soft: false,
    })
}

fn with_connection<T>(
    operation: &str,
    f: impl FnOnce(&Connection) -> PlanResult<T>,
) -> Result<T, CallError> {
    with_connection_raw(operation, f)?.map_err(|err| CallError {
        message: format!("{operation} failed: {err}"),
        soft: err.is_soft(),
    })
}

/// Opens the store and hands `f`'s own result back untouched.
fn with_connection_raw<T>(
    operation: &str,
    f: impl FnOnce(&Connection) -> PlanResult<T>,
) -> Result<PlanResult<T>, CallError> {
    let conn = open_db(resolve_db_path()).map_err(|err| CallError {
        message: if err.is_busy() {
            format!("{operation} failed: plan DB is busy, try again")
        } else {
            format!("{operation} failed: plan DB open failed: {err}")
        },
        soft: false,
    })?;
    Ok(f(&conn))
}

fn plan_feed() -> Arc<PlanFeed> {
    Arc::clone(PLAN_FEED.get_or_init(|| Arc::new(PlanFeed::new())))
}

fn watches() -> MutexGuard<'static, HashMap<Uuid, Subscription>> {
    MEMBERSHIP_WATCHES
        .get_or_init(Mutex::default)
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Collapses duplicated self-memberships of `plan_uuid` after every
/// membership change announced on the shared feed. Watching twice is a no-op.
fn watch_membership(plan_uuid: Uuid) {
    let mut watches = watches();
    if watches.contains_key(&plan_uuid) {
        return;
    }
    let subscription = dedupe_on_membership_change(&plan_feed(), plan_uuid, |plan| {
        let conn = open_db(resolve_db_path()).map_err(RepoError::from)?;
        let removed = registry(&conn)?.dedupe_self_participants(plan);
        removed
    });
    watches.insert(plan_uuid, subscription);
    debug!("event=membership_watch module=ffi status=ok plan_id={plan_uuid}");
}

fn unwatch_membership(plan_uuid: Uuid) {
    if watches().remove(&plan_uuid).is_some() {
        debug!("event=membership_unwatch module=ffi status=ok plan_id={plan_uuid}");
    }
}

fn plans(conn: &Connection) -> PlanResult<PlanService<SqlitePlanStore<'_>>> {
    Ok(PlanService::new(SqlitePlanStore::try_new(conn)?).with_feed(plan_feed()))
}

fn removal(conn: &Connection) -> PlanResult<RemovalService<SqlitePlanStore<'_>>> {
    Ok(RemovalService::new(SqlitePlanStore::try_new(conn)?).with_feed(plan_feed()))
}

fn registry(
    conn: &Connection,
) -> PlanResult<RegistryService<SqlitePlanStore<'_>, SqliteInviteCodes<'_>>> {
    Ok(RegistryService::new(
        SqlitePlanStore::try_new(conn)?,
        SqliteInviteCodes::new(conn),
    )
    .with_feed(plan_feed()))
}

fn ledger(
    conn: &Connection,
) -> PlanResult<LedgerService<SqlitePlanStore<'_>, SqlitePersonalTransactions<'_>>> {
    Ok(LedgerService::new(
        SqlitePlanStore::try_new(conn)?,
        SqlitePersonalTransactions::new(conn),
    )
    .with_feed(plan_feed()))
}

fn settlements(
    conn: &Connection,
) -> PlanResult<SettlementService<SqlitePlanStore<'_>, SqlitePersonalTransactions<'_>>> {
    Ok(SettlementService::new(
        SqlitePlanStore::try_new(conn)?,
        SqlitePersonalTransactions::new(conn),
        SettlementOptions::default(),
    )
    .with_feed(plan_feed()))
}

fn resolve_db_path() -> PathBuf {
    DB_PATH
        .get_or_init(|| {
            if let Ok(raw) = std::env::var(DB_PATH_ENV) {
                let trimmed = raw.trim();
                if !trimmed.is_empty() {
                    return PathBuf::from(trimmed);
                }
            }
            std::env::temp_dir().join(DB_FILE_NAME)
        })
        .clone()
}

fn balances_response(ok: bool, sheet: &BalanceSheet, message: String) -> BalancesResponse {
    BalancesResponse {
        ok,
        rows: sheet
            .rows
            .iter()
            .map(|row| BalanceRow {
                participant_id: row.participant_uuid.to_string(),
                paid: row.paid,
                fair_share: row.fair_share,
                net: row.net,
            })
            .collect(),
        total: sheet.total,
        needs_attention: sheet.needs_attention || !ok,
        message,
    }
}

fn to_settlement_item(proposal: &SettlementProposal) -> SettlementItem {
    SettlementItem {
        from_participant_id: proposal.from.to_string(),
        to_participant_id: proposal.to.to_string(),
        amount: proposal.amount,
    }
}

fn to_settlement_record_item(record: &SettlementRecord) -> SettlementRecordItem {
    SettlementRecordItem {
        id: record.uuid.to_string(),
        from_participant_id: record.from.to_string(),
        to_participant_id: record.to.to_string(),
        amount: record.amount,
        confirmed_by_participant_id: record.confirmed_by.to_string(),
        confirmed_at_ms: record.confirmed_at,
    }
}

fn to_participant_item(participant: &Participant) -> ParticipantItem {
    ParticipantItem {
        id: participant.uuid.to_string(),
        display_name: participant.display_name.clone(),
        account_id: participant.account_id.clone(),
        color: participant.color.clone(),
        is_owner: participant.is_owner,
        custom_share: participant.custom_share,
    }
}

fn to_contribution_item(entry: &Contribution) -> ContributionItem {
    ContributionItem {
        id: entry.uuid.to_string(),
        payer_id: entry.payer_uuid.to_string(),
        description: entry.description.clone(),
        amount: entry.amount,
        occurred_at_ms: entry.occurred_at,
        personal_transaction_id: entry
            .personal_link
            .as_ref()
            .map(|link| link.transaction_id.clone()),
    }
}
