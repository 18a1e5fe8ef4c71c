//! Settlement record repository contracts and SQLite implementation.
//!
//! # Invariants
//! - At most one confirmed record exists per `(from, to, amount)` triple and
//!   plan ledger revision; the check and insert share one `IMMEDIATE`
//!   transaction.
//! - A record is only inserted against the revision and settlement count it
//!   was validated on; otherwise `Conflict` and nothing changes.
//! - Records are listed newest first.

use crate::ledger::BALANCE_TOLERANCE;
use crate::model::plan::PlanId;
use crate::model::settlement::{SettlementId, SettlementRecord, SettlementStatus};
use crate::repo::store::{parse_uuid, RepoError, RepoResult, SqlitePlanStore};
use rusqlite::{params, Connection, OptionalExtension, Row};

const SETTLEMENT_SELECT_SQL: &str = "SELECT
    uuid,
    plan_uuid,
    from_participant_uuid,
    to_participant_uuid,
    amount,
    status,
    confirmed_by_participant_uuid,
    ledger_revision,
    from_personal_tx_id,
    to_personal_tx_id,
    confirmed_at
FROM settlement_records";

/// Repository interface for confirmed settlements.
pub trait SettlementRepository {
    /// Persists `record` unless the same triple was already confirmed at the
    /// plan's current ledger revision.
    ///
    /// `record.ledger_revision` and `expected_settlements` describe the state
    /// the caller validated the amount against; if either moved, nothing is
    /// written and `Conflict` is returned. Returns the stored record and
    /// whether this call inserted it.
    fn insert_settlement_once(
        &self,
        record: &SettlementRecord,
        expected_settlements: usize,
    ) -> RepoResult<(SettlementRecord, bool)>;
    /// Lists a plan's settlement records, newest first.
    fn list_settlements(&self, plan_uuid: PlanId) -> RepoResult<Vec<SettlementRecord>>;
    /// Stores the ids of mirrored personal transactions.
    fn attach_mirror_transactions(
        &self,
        settlement_uuid: SettlementId,
        from_transaction_id: Option<&str>,
        to_transaction_id: Option<&str>,
    ) -> RepoResult<()>;
}

impl SettlementRepository for SqlitePlanStore<'_> {
    fn insert_settlement_once(
        &self,
        record: &SettlementRecord,
        expected_settlements: usize,
    ) -> RepoResult<(SettlementRecord, bool)> {
        let tx = self.write_tx()?;
        let plan_id = record.plan_uuid.to_string();
        let (revision, settlement_count): (i64, i64) = tx
            .query_row(
                "SELECT
                    ledger_revision,
                    (SELECT COUNT(*) FROM settlement_records WHERE plan_uuid = ?1)
                 FROM plans
                 WHERE uuid = ?1;",
                [plan_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or_else(|| RepoError::not_found("plan", record.plan_uuid))?;

        if let Some(existing) = find_confirmed(&tx, record, revision)? {
            return Ok((existing, false));
        }
        if revision != record.ledger_revision || settlement_count != expected_settlements as i64 {
            return Err(RepoError::Conflict("plan ledger changed during confirmation"));
        }

        tx.execute(
            "INSERT INTO settlement_records (
                uuid,
                plan_uuid,
                from_participant_uuid,
                to_participant_uuid,
                amount,
                status,
                confirmed_by_participant_uuid,
                ledger_revision,
                from_personal_tx_id,
                to_personal_tx_id,
                confirmed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11);",
            params![
                record.uuid.to_string(),
                record.plan_uuid.to_string(),
                record.from.to_string(),
                record.to.to_string(),
                record.amount,
                record.status.as_str(),
                record.confirmed_by.to_string(),
                record.ledger_revision,
                record.from_transaction_id.as_deref(),
                record.to_transaction_id.as_deref(),
                record.confirmed_at,
            ],
        )?;
        tx.commit()?;
        Ok((record.clone(), true))
    }

    fn list_settlements(&self, plan_uuid: PlanId) -> RepoResult<Vec<SettlementRecord>> {
        list_settlements_in(self.conn, plan_uuid)
    }

    fn attach_mirror_transactions(
        &self,
        settlement_uuid: SettlementId,
        from_transaction_id: Option<&str>,
        to_transaction_id: Option<&str>,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE settlement_records
             SET from_personal_tx_id = ?2,
                 to_personal_tx_id = ?3
             WHERE uuid = ?1;",
            params![
                settlement_uuid.to_string(),
                from_transaction_id,
                to_transaction_id
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("settlement", settlement_uuid));
        }
        Ok(())
    }
}

fn find_confirmed(
    conn: &Connection,
    record: &SettlementRecord,
    revision: i64,
) -> RepoResult<Option<SettlementRecord>> {
    let mut stmt = conn.prepare(&format!(
        "{SETTLEMENT_SELECT_SQL}
         WHERE plan_uuid = ?1
           AND from_participant_uuid = ?2
           AND to_participant_uuid = ?3
           AND ledger_revision = ?4
           AND ABS(amount - ?5) <= ?6
         ORDER BY confirmed_at ASC, uuid ASC
         LIMIT 1;"
    ))?;
    let mut rows = stmt.query(params![
        record.plan_uuid.to_string(),
        record.from.to_string(),
        record.to.to_string(),
        revision,
        record.amount,
        BALANCE_TOLERANCE,
    ])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_settlement_row(row)?));
    }
    Ok(None)
}

pub(crate) fn list_settlements_in(
    conn: &Connection,
    plan_uuid: PlanId,
) -> RepoResult<Vec<SettlementRecord>> {
    let mut stmt = conn.prepare(&format!(
        "{SETTLEMENT_SELECT_SQL}
         WHERE plan_uuid = ?1
         ORDER BY confirmed_at DESC, uuid ASC;"
    ))?;
    let mut rows = stmt.query([plan_uuid.to_string()])?;
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        records.push(parse_settlement_row(row)?);
    }
    Ok(records)
}

fn parse_settlement_row(row: &Row<'_>) -> RepoResult<SettlementRecord> {
    let status_text: String = row.get("status")?;
    let status = SettlementStatus::parse(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid settlement status `{status_text}` in settlement_records.status"
        ))
    })?;
    let column_uuid = |column: &str| -> RepoResult<uuid::Uuid> {
        let text: String = row.get(column)?;
        parse_uuid(&text, &format!("settlement_records.{column}"))
    };

    Ok(SettlementRecord {
        uuid: column_uuid("uuid")?,
        plan_uuid: column_uuid("plan_uuid")?,
        from: column_uuid("from_participant_uuid")?,
        to: column_uuid("to_participant_uuid")?,
        amount: row.get("amount")?,
        status,
        confirmed_by: column_uuid("confirmed_by_participant_uuid")?,
        ledger_revision: row.get("ledger_revision")?,
        from_transaction_id: row.get("from_personal_tx_id")?,
        to_transaction_id: row.get("to_personal_tx_id")?,
        confirmed_at: row.get("confirmed_at")?,
    })
}
