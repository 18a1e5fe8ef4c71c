//! Plan repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist plan headers (title, owner, distribution rule).
//! - Load a read-consistent snapshot for balance computation.
//! - Cascade plan deletion across every dependent table.
//!
//! # Invariants
//! - Plan creation and owner auto-join commit together.
//! - Snapshots are read inside one transaction so a concurrent writer is
//!   either fully visible or not visible at all.

use crate::model::contribution::Contribution;
use crate::model::participant::Participant;
use crate::model::plan::{DistributionRule, Plan, PlanId};
use crate::model::settlement::SettlementRecord;
use crate::repo::contribution_repo::list_contributions_in;
use crate::repo::participant_repo::{insert_participant_in, list_participants_in, NewParticipant};
use crate::repo::settlement_repo::list_settlements_in;
use crate::repo::store::{parse_uuid, RepoError, RepoResult, SqlitePlanStore};
use rusqlite::{params, Connection, Row};

const PLAN_SELECT_SQL: &str = "SELECT
    uuid,
    title,
    owner_account_id,
    distribution_rule,
    ledger_revision,
    created_at,
    updated_at
FROM plans";

/// Everything the balance calculator needs, read at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanSnapshot {
    pub plan: Plan,
    /// Join order.
    pub participants: Vec<Participant>,
    pub contributions: Vec<Contribution>,
    pub settlements: Vec<SettlementRecord>,
}

/// Repository interface for plan headers.
pub trait PlanRepository {
    /// Inserts a plan and its owner participant atomically.
    fn create_plan(
        &self,
        plan_uuid: PlanId,
        title: &str,
        rule: DistributionRule,
        owner: &NewParticipant,
    ) -> RepoResult<(Plan, Participant)>;
    /// Loads one plan by id.
    fn get_plan(&self, plan_uuid: PlanId) -> RepoResult<Option<Plan>>;
    /// Lists plans where the account has a participant row, newest first.
    fn list_plans_for_account(&self, account_id: &str) -> RepoResult<Vec<Plan>>;
    /// Replaces title and distribution rule.
    fn update_plan(&self, plan_uuid: PlanId, title: &str, rule: DistributionRule)
        -> RepoResult<Plan>;
    /// Deletes a plan with its participants, ledger, settlements and invites.
    fn delete_plan(&self, plan_uuid: PlanId) -> RepoResult<()>;
    /// Loads plan, participants, contributions and settlements consistently.
    fn load_snapshot(&self, plan_uuid: PlanId) -> RepoResult<PlanSnapshot>;
}

impl PlanRepository for SqlitePlanStore<'_> {
    fn create_plan(
        &self,
        plan_uuid: PlanId,
        title: &str,
        rule: DistributionRule,
        owner: &NewParticipant,
    ) -> RepoResult<(Plan, Participant)> {
        let owner_account_id = owner.account_id.as_deref().ok_or_else(|| {
            RepoError::InvalidData("plan owner must be account-backed".to_string())
        })?;

        let tx = self.write_tx()?;
        tx.execute(
            "INSERT INTO plans (uuid, title, owner_account_id, distribution_rule)
             VALUES (?1, ?2, ?3, ?4);",
            params![plan_uuid.to_string(), title, owner_account_id, rule.as_str()],
        )?;
        let participant = insert_participant_in(&tx, plan_uuid, owner)?;
        let plan = load_plan(&tx, plan_uuid)?.ok_or_else(|| RepoError::not_found("plan", plan_uuid))?;
        tx.commit()?;
        Ok((plan, participant))
    }

    fn get_plan(&self, plan_uuid: PlanId) -> RepoResult<Option<Plan>> {
        load_plan(self.conn, plan_uuid)
    }

    fn list_plans_for_account(&self, account_id: &str) -> RepoResult<Vec<Plan>> {
        let mut stmt = self.conn.prepare(&format!(
            "{PLAN_SELECT_SQL}
             WHERE uuid IN (SELECT plan_uuid FROM participants WHERE account_id = ?1)
             ORDER BY updated_at DESC, uuid ASC;"
        ))?;
        let mut rows = stmt.query([account_id])?;
        let mut plans = Vec::new();
        while let Some(row) = rows.next()? {
            plans.push(parse_plan_row(row)?);
        }
        Ok(plans)
    }

    fn update_plan(
        &self,
        plan_uuid: PlanId,
        title: &str,
        rule: DistributionRule,
    ) -> RepoResult<Plan> {
        let changed = self.conn.execute(
            "UPDATE plans
             SET title = ?2,
                 distribution_rule = ?3,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE uuid = ?1;",
            params![plan_uuid.to_string(), title, rule.as_str()],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("plan", plan_uuid));
        }
        load_plan(self.conn, plan_uuid)?.ok_or_else(|| RepoError::not_found("plan", plan_uuid))
    }

    fn delete_plan(&self, plan_uuid: PlanId) -> RepoResult<()> {
        let id = plan_uuid.to_string();
        let tx = self.write_tx()?;
        // Children first: contributions and settlements restrict participant deletes.
        for sql in [
            "DELETE FROM settlement_records WHERE plan_uuid = ?1;",
            "DELETE FROM contributions WHERE plan_uuid = ?1;",
            "DELETE FROM invite_codes WHERE plan_uuid = ?1;",
            "DELETE FROM participants WHERE plan_uuid = ?1;",
        ] {
            tx.execute(sql, [id.as_str()])?;
        }
        let changed = tx.execute("DELETE FROM plans WHERE uuid = ?1;", [id.as_str()])?;
        if changed == 0 {
            return Err(RepoError::not_found("plan", plan_uuid));
        }
        tx.commit()?;
        Ok(())
    }

    fn load_snapshot(&self, plan_uuid: PlanId) -> RepoResult<PlanSnapshot> {
        let tx = self.read_tx()?;
        let plan = load_plan(&tx, plan_uuid)?.ok_or_else(|| RepoError::not_found("plan", plan_uuid))?;
        let snapshot = PlanSnapshot {
            participants: list_participants_in(&tx, plan_uuid)?,
            contributions: list_contributions_in(&tx, plan_uuid)?,
            settlements: list_settlements_in(&tx, plan_uuid)?,
            plan,
        };
        tx.commit()?;
        Ok(snapshot)
    }
}

pub(crate) fn load_plan(conn: &Connection, plan_uuid: PlanId) -> RepoResult<Option<Plan>> {
    let mut stmt = conn.prepare(&format!("{PLAN_SELECT_SQL} WHERE uuid = ?1;"))?;
    let mut rows = stmt.query([plan_uuid.to_string()])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_plan_row(row)?));
    }
    Ok(None)
}

fn parse_plan_row(row: &Row<'_>) -> RepoResult<Plan> {
    let uuid_text: String = row.get("uuid")?;
    let rule_text: String = row.get("distribution_rule")?;
    let rule = DistributionRule::parse(&rule_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid distribution rule `{rule_text}` in plans.distribution_rule"
        ))
    })?;
    Ok(Plan {
        uuid: parse_uuid(&uuid_text, "plans.uuid")?,
        title: row.get("title")?,
        owner_account_id: row.get("owner_account_id")?,
        rule,
        ledger_revision: row.get("ledger_revision")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
