//! Participant repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist plan membership and participant identity (name, color, share).
//! - Own the transactional membership rules: duplicate account check, color
//!   uniqueness, and duplicate-row collapse.
//!
//! # Invariants
//! - Listing order is deterministic: `join_seq ASC`.
//! - Collapsing duplicates never orphans a contribution or settlement; every
//!   reference is moved to the kept row before a duplicate is deleted.
//! - A participant with ledger references is never deleted here.

use crate::model::participant::{pick_palette_color, Participant, ParticipantId};
use crate::model::plan::PlanId;
use crate::model::validation::ValidationError;
use crate::repo::store::{
    bool_to_int, parse_bool, parse_uuid, RepoError, RepoResult, SqlitePlanStore,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

const PARTICIPANT_SELECT_SQL: &str = "SELECT
    join_seq,
    uuid,
    plan_uuid,
    display_name,
    account_id,
    color,
    is_owner,
    custom_share
FROM participants";

/// Insert request for one participant row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewParticipant {
    /// Already trimmed and non-empty.
    pub display_name: String,
    pub account_id: Option<String>,
    /// Palette-normalized color; `None` picks one automatically.
    pub color: Option<String>,
}

/// Result of the idempotent self-membership operation.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsureOutcome {
    /// The surviving row for the account.
    pub participant: Participant,
    /// Whether this call inserted the row.
    pub created: bool,
    /// Duplicate rows collapsed into `participant`.
    pub removed_duplicates: usize,
}

/// Repository interface for plan membership.
pub trait ParticipantRepository {
    /// Inserts a participant; rejects duplicate account membership and taken colors.
    fn insert_participant(&self, plan_uuid: PlanId, new: &NewParticipant)
        -> RepoResult<Participant>;
    /// Returns the account's participant row, creating it when missing and
    /// collapsing concurrent duplicates into the oldest row.
    fn ensure_account_participant(
        &self,
        plan_uuid: PlanId,
        account_id: &str,
        display_name: &str,
    ) -> RepoResult<EnsureOutcome>;
    /// Collapses every duplicated account membership of a plan.
    fn collapse_duplicate_accounts(&self, plan_uuid: PlanId) -> RepoResult<usize>;
    /// Loads one participant by id.
    fn get_participant(&self, participant_uuid: ParticipantId) -> RepoResult<Option<Participant>>;
    /// Lists plan participants in join order.
    fn list_participants(&self, plan_uuid: PlanId) -> RepoResult<Vec<Participant>>;
    /// Renames one participant.
    fn rename_participant(&self, participant_uuid: ParticipantId, display_name: &str)
        -> RepoResult<()>;
    /// Changes one participant's color; rejects colors used by others.
    fn recolor_participant(&self, participant_uuid: ParticipantId, color: &str) -> RepoResult<()>;
    /// Sets or clears the custom fair share.
    fn set_custom_share(&self, participant_uuid: ParticipantId, share: Option<f64>)
        -> RepoResult<()>;
    /// Counts contributions and settlements referencing the participant.
    fn ledger_reference_count(&self, participant_uuid: ParticipantId) -> RepoResult<u64>;
    /// Deletes a participant that has no ledger references.
    fn delete_participant(&self, participant_uuid: ParticipantId) -> RepoResult<()>;
}

impl ParticipantRepository for SqlitePlanStore<'_> {
    fn insert_participant(
        &self,
        plan_uuid: PlanId,
        new: &NewParticipant,
    ) -> RepoResult<Participant> {
        let tx = self.write_tx()?;
        let participant = insert_participant_in(&tx, plan_uuid, new)?;
        tx.commit()?;
        Ok(participant)
    }

    fn ensure_account_participant(
        &self,
        plan_uuid: PlanId,
        account_id: &str,
        display_name: &str,
    ) -> RepoResult<EnsureOutcome> {
        let tx = self.write_tx()?;
        let mut rows = list_account_rows(&tx, plan_uuid, account_id)?;
        let created = rows.is_empty();
        if created {
            let new = NewParticipant {
                display_name: display_name.to_string(),
                account_id: Some(account_id.to_string()),
                color: None,
            };
            rows.push(insert_participant_in(&tx, plan_uuid, &new)?);
        }

        let removed_duplicates = collapse_rows(&tx, plan_uuid, &rows)?;
        let participant = load_participant(&tx, rows[0].uuid)?
            .ok_or_else(|| RepoError::not_found("participant", rows[0].uuid))?;
        tx.commit()?;

        Ok(EnsureOutcome {
            participant,
            created,
            removed_duplicates,
        })
    }

    fn collapse_duplicate_accounts(&self, plan_uuid: PlanId) -> RepoResult<usize> {
        let tx = self.write_tx()?;
        let mut stmt = tx.prepare(
            "SELECT account_id
             FROM participants
             WHERE plan_uuid = ?1 AND account_id IS NOT NULL
             GROUP BY account_id
             HAVING COUNT(*) > 1;",
        )?;
        let accounts = stmt
            .query_map([plan_uuid.to_string()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);

        let mut removed = 0;
        for account_id in accounts {
            let rows = list_account_rows(&tx, plan_uuid, &account_id)?;
            removed += collapse_rows(&tx, plan_uuid, &rows)?;
        }
        tx.commit()?;
        Ok(removed)
    }

    fn get_participant(&self, participant_uuid: ParticipantId) -> RepoResult<Option<Participant>> {
        load_participant(self.conn, participant_uuid)
    }

    fn list_participants(&self, plan_uuid: PlanId) -> RepoResult<Vec<Participant>> {
        list_participants_in(self.conn, plan_uuid)
    }

    fn rename_participant(
        &self,
        participant_uuid: ParticipantId,
        display_name: &str,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE participants SET display_name = ?2 WHERE uuid = ?1;",
            params![participant_uuid.to_string(), display_name],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("participant", participant_uuid));
        }
        Ok(())
    }

    fn recolor_participant(&self, participant_uuid: ParticipantId, color: &str) -> RepoResult<()> {
        let tx = self.write_tx()?;
        let participant = load_participant(&tx, participant_uuid)?
            .ok_or_else(|| RepoError::not_found("participant", participant_uuid))?;
        if color_taken(&tx, participant.plan_uuid, color, Some(participant_uuid))? {
            return Err(ValidationError::ColorInUse(color.to_string()).into());
        }
        tx.execute(
            "UPDATE participants SET color = ?2 WHERE uuid = ?1;",
            params![participant_uuid.to_string(), color],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn set_custom_share(
        &self,
        participant_uuid: ParticipantId,
        share: Option<f64>,
    ) -> RepoResult<()> {
        let tx = self.write_tx()?;
        let changed = tx.execute(
            "UPDATE participants SET custom_share = ?2 WHERE uuid = ?1;",
            params![participant_uuid.to_string(), share],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("participant", participant_uuid));
        }
        tx.execute(
            "UPDATE plans
             SET updated_at = (strftime('%s', 'now') * 1000)
             WHERE uuid = (SELECT plan_uuid FROM participants WHERE uuid = ?1);",
            [participant_uuid.to_string()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn ledger_reference_count(&self, participant_uuid: ParticipantId) -> RepoResult<u64> {
        ledger_references(self.conn, participant_uuid)
    }

    fn delete_participant(&self, participant_uuid: ParticipantId) -> RepoResult<()> {
        let tx = self.write_tx()?;
        if load_participant(&tx, participant_uuid)?.is_none() {
            return Err(RepoError::not_found("participant", participant_uuid));
        }
        if ledger_references(&tx, participant_uuid)? > 0 {
            return Err(RepoError::Conflict("participant gained ledger entries"));
        }
        tx.execute(
            "DELETE FROM participants WHERE uuid = ?1;",
            [participant_uuid.to_string()],
        )?;
        tx.commit()?;
        Ok(())
    }
}

/// Inserts one participant inside the caller's transaction.
///
/// Owner rights follow `account_id == plans.owner_account_id`.
pub(crate) fn insert_participant_in(
    conn: &Connection,
    plan_uuid: PlanId,
    new: &NewParticipant,
) -> RepoResult<Participant> {
    let owner_account_id: String = conn
        .query_row(
            "SELECT owner_account_id FROM plans WHERE uuid = ?1;",
            [plan_uuid.to_string()],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| RepoError::not_found("plan", plan_uuid))?;

    if let Some(account_id) = new.account_id.as_deref() {
        if !list_account_rows(conn, plan_uuid, account_id)?.is_empty() {
            return Err(ValidationError::DuplicateMembership(account_id.to_string()).into());
        }
    }

    let color = match new.color.as_deref() {
        Some(color) => {
            if color_taken(conn, plan_uuid, color, None)? {
                return Err(ValidationError::ColorInUse(color.to_string()).into());
            }
            color.to_string()
        }
        None => pick_palette_color(&list_participants_in(conn, plan_uuid)?).to_string(),
    };

    let is_owner = new.account_id.as_deref() == Some(owner_account_id.as_str());
    let participant_uuid = Uuid::new_v4();
    conn.execute(
        "INSERT INTO participants (
            uuid,
            plan_uuid,
            display_name,
            account_id,
            color,
            is_owner
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
        params![
            participant_uuid.to_string(),
            plan_uuid.to_string(),
            new.display_name.as_str(),
            new.account_id.as_deref(),
            color,
            bool_to_int(is_owner),
        ],
    )?;

    load_participant(conn, participant_uuid)?
        .ok_or_else(|| RepoError::not_found("participant", participant_uuid))
}

/// Moves every contribution and settlement of `from` onto `to`.
pub(crate) fn reassign_ledger_refs(
    conn: &Connection,
    from: ParticipantId,
    to: ParticipantId,
) -> RepoResult<()> {
    conn.execute(
        "UPDATE contributions
         SET participant_uuid = ?2,
             updated_at = (strftime('%s', 'now') * 1000)
         WHERE participant_uuid = ?1;",
        params![from.to_string(), to.to_string()],
    )?;
    reassign_settlements(conn, from, to)
}

/// Moves settlements of `from` onto `to`; ones that would become
/// self-transfers are deleted first.
pub(crate) fn reassign_settlements(
    conn: &Connection,
    from: ParticipantId,
    to: ParticipantId,
) -> RepoResult<()> {
    let (from, to) = (from.to_string(), to.to_string());
    conn.execute(
        "DELETE FROM settlement_records
         WHERE (from_participant_uuid = ?1 AND to_participant_uuid = ?2)
            OR (from_participant_uuid = ?2 AND to_participant_uuid = ?1);",
        params![from, to],
    )?;
    conn.execute(
        "UPDATE settlement_records SET from_participant_uuid = ?2 WHERE from_participant_uuid = ?1;",
        params![from, to],
    )?;
    conn.execute(
        "UPDATE settlement_records SET to_participant_uuid = ?2 WHERE to_participant_uuid = ?1;",
        params![from, to],
    )?;
    Ok(())
}

pub(crate) fn load_participant(
    conn: &Connection,
    participant_uuid: ParticipantId,
) -> RepoResult<Option<Participant>> {
    let mut stmt = conn.prepare(&format!("{PARTICIPANT_SELECT_SQL} WHERE uuid = ?1;"))?;
    let mut rows = stmt.query([participant_uuid.to_string()])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_participant_row(row)?));
    }
    Ok(None)
}

pub(crate) fn list_participants_in(
    conn: &Connection,
    plan_uuid: PlanId,
) -> RepoResult<Vec<Participant>> {
    let mut stmt = conn.prepare(&format!(
        "{PARTICIPANT_SELECT_SQL} WHERE plan_uuid = ?1 ORDER BY join_seq ASC;"
    ))?;
    let mut rows = stmt.query([plan_uuid.to_string()])?;
    let mut participants = Vec::new();
    while let Some(row) = rows.next()? {
        participants.push(parse_participant_row(row)?);
    }
    Ok(participants)
}

pub(crate) fn ledger_references(conn: &Connection, participant_uuid: ParticipantId) -> RepoResult<u64> {
    let count: i64 = conn.query_row(
        "SELECT
            (SELECT COUNT(*) FROM contributions WHERE participant_uuid = ?1)
          + (SELECT COUNT(*) FROM settlement_records
             WHERE from_participant_uuid = ?1 OR to_participant_uuid = ?1);",
        [participant_uuid.to_string()],
        |row| row.get(0),
    )?;
    Ok(count.max(0) as u64)
}

fn list_account_rows(
    conn: &Connection,
    plan_uuid: PlanId,
    account_id: &str,
) -> RepoResult<Vec<Participant>> {
    let mut stmt = conn.prepare(&format!(
        "{PARTICIPANT_SELECT_SQL}
         WHERE plan_uuid = ?1 AND account_id = ?2
         ORDER BY join_seq ASC;"
    ))?;
    let mut rows = stmt.query(params![plan_uuid.to_string(), account_id])?;
    let mut participants = Vec::new();
    while let Some(row) = rows.next()? {
        participants.push(parse_participant_row(row)?);
    }
    Ok(participants)
}

/// Keeps `rows[0]` and folds the remaining rows into it.
fn collapse_rows(conn: &Connection, plan_uuid: PlanId, rows: &[Participant]) -> RepoResult<usize> {
    let Some((keep, duplicates)) = rows.split_first() else {
        return Ok(0);
    };

    for duplicate in duplicates {
        reassign_ledger_refs(conn, duplicate.uuid, keep.uuid)?;
        if duplicate.is_owner {
            conn.execute(
                "UPDATE participants SET is_owner = 1 WHERE uuid = ?1;",
                [keep.uuid.to_string()],
            )?;
        }
        conn.execute(
            "DELETE FROM participants WHERE uuid = ?1 AND plan_uuid = ?2;",
            params![duplicate.uuid.to_string(), plan_uuid.to_string()],
        )?;
    }
    Ok(duplicates.len())
}

fn color_taken(
    conn: &Connection,
    plan_uuid: PlanId,
    color: &str,
    except: Option<ParticipantId>,
) -> RepoResult<bool> {
    let taken: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM participants
            WHERE plan_uuid = ?1
              AND color = ?2
              AND (?3 IS NULL OR uuid <> ?3)
        );",
        params![
            plan_uuid.to_string(),
            color,
            except.map(|value| value.to_string())
        ],
        |row| row.get(0),
    )?;
    Ok(taken == 1)
}

fn parse_participant_row(row: &Row<'_>) -> RepoResult<Participant> {
    let uuid_text: String = row.get("uuid")?;
    let plan_text: String = row.get("plan_uuid")?;
    Ok(Participant {
        uuid: parse_uuid(&uuid_text, "participants.uuid")?,
        plan_uuid: parse_uuid(&plan_text, "participants.plan_uuid")?,
        display_name: row.get("display_name")?,
        account_id: row.get("account_id")?,
        color: row.get("color")?,
        is_owner: parse_bool(row.get("is_owner")?, "participants.is_owner")?,
        custom_share: row.get("custom_share")?,
        join_seq: row.get("join_seq")?,
    })
}
