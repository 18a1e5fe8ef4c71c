//! Contribution ledger repository contracts and SQLite implementation.
//!
//! # Invariants
//! - Write paths call `Contribution::validate()` before SQL mutations.
//! - The payer must be a participant of the entry's plan; the composite
//!   foreign key enforces it, the explicit check turns it into `NotFound`.
//! - Ledger listing order: `occurred_at DESC, uuid ASC` (display only).

use crate::model::contribution::{Contribution, ContributionId, PersonalLink};
use crate::model::participant::ParticipantId;
use crate::model::plan::PlanId;
use crate::repo::store::{parse_uuid, RepoError, RepoResult, SqlitePlanStore};
use rusqlite::{params, Connection, Row};

const CONTRIBUTION_SELECT_SQL: &str = "SELECT
    uuid,
    plan_uuid,
    participant_uuid,
    description,
    amount,
    occurred_at,
    card_id,
    personal_tx_id
FROM contributions";

/// Repository interface for the contribution ledger.
pub trait ContributionRepository {
    /// Appends one entry.
    fn insert_contribution(&self, contribution: &Contribution) -> RepoResult<ContributionId>;
    /// Loads one entry by id.
    fn get_contribution(&self, contribution_uuid: ContributionId)
        -> RepoResult<Option<Contribution>>;
    /// Lists every entry of a plan.
    fn list_contributions(&self, plan_uuid: PlanId) -> RepoResult<Vec<Contribution>>;
    /// Lists entries attributed to one participant.
    fn list_contributions_for(&self, participant_uuid: ParticipantId)
        -> RepoResult<Vec<Contribution>>;
    /// Replaces description, amount and date of one entry.
    fn update_contribution(&self, contribution: &Contribution) -> RepoResult<()>;
    /// Deletes one entry.
    fn delete_contribution(&self, contribution_uuid: ContributionId) -> RepoResult<()>;
}

impl ContributionRepository for SqlitePlanStore<'_> {
    fn insert_contribution(&self, contribution: &Contribution) -> RepoResult<ContributionId> {
        contribution.validate()?;
        let payer_in_plan: i64 = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM participants WHERE uuid = ?1 AND plan_uuid = ?2
            );",
            params![
                contribution.payer_uuid.to_string(),
                contribution.plan_uuid.to_string()
            ],
            |row| row.get(0),
        )?;
        if payer_in_plan != 1 {
            return Err(RepoError::not_found("participant", contribution.payer_uuid));
        }

        let link = contribution.personal_link.as_ref();
        self.conn.execute(
            "INSERT INTO contributions (
                uuid,
                plan_uuid,
                participant_uuid,
                description,
                amount,
                occurred_at,
                card_id,
                personal_tx_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                contribution.uuid.to_string(),
                contribution.plan_uuid.to_string(),
                contribution.payer_uuid.to_string(),
                contribution.description.as_str(),
                contribution.amount,
                contribution.occurred_at,
                link.and_then(|value| value.card_id.as_deref()),
                link.map(|value| value.transaction_id.as_str()),
            ],
        )?;
        Ok(contribution.uuid)
    }

    fn get_contribution(
        &self,
        contribution_uuid: ContributionId,
    ) -> RepoResult<Option<Contribution>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{CONTRIBUTION_SELECT_SQL} WHERE uuid = ?1;"))?;
        let mut rows = stmt.query([contribution_uuid.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_contribution_row(row)?));
        }
        Ok(None)
    }

    fn list_contributions(&self, plan_uuid: PlanId) -> RepoResult<Vec<Contribution>> {
        list_contributions_in(self.conn, plan_uuid)
    }

    fn list_contributions_for(
        &self,
        participant_uuid: ParticipantId,
    ) -> RepoResult<Vec<Contribution>> {
        list_participant_contributions_in(self.conn, participant_uuid)
    }

    fn update_contribution(&self, contribution: &Contribution) -> RepoResult<()> {
        contribution.validate()?;
        let changed = self.conn.execute(
            "UPDATE contributions
             SET description = ?2,
                 amount = ?3,
                 occurred_at = ?4,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE uuid = ?1;",
            params![
                contribution.uuid.to_string(),
                contribution.description.as_str(),
                contribution.amount,
                contribution.occurred_at,
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("contribution", contribution.uuid));
        }
        Ok(())
    }

    fn delete_contribution(&self, contribution_uuid: ContributionId) -> RepoResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM contributions WHERE uuid = ?1;",
            [contribution_uuid.to_string()],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("contribution", contribution_uuid));
        }
        Ok(())
    }
}

pub(crate) fn list_contributions_in(
    conn: &Connection,
    plan_uuid: PlanId,
) -> RepoResult<Vec<Contribution>> {
    let mut stmt = conn.prepare(&format!(
        "{CONTRIBUTION_SELECT_SQL}
         WHERE plan_uuid = ?1
         ORDER BY occurred_at DESC, uuid ASC;"
    ))?;
    let mut rows = stmt.query([plan_uuid.to_string()])?;
    let mut contributions = Vec::new();
    while let Some(row) = rows.next()? {
        contributions.push(parse_contribution_row(row)?);
    }
    Ok(contributions)
}

pub(crate) fn list_participant_contributions_in(
    conn: &Connection,
    participant_uuid: ParticipantId,
) -> RepoResult<Vec<Contribution>> {
    let mut stmt = conn.prepare(&format!(
        "{CONTRIBUTION_SELECT_SQL}
         WHERE participant_uuid = ?1
         ORDER BY occurred_at DESC, uuid ASC;"
    ))?;
    let mut rows = stmt.query([participant_uuid.to_string()])?;
    let mut contributions = Vec::new();
    while let Some(row) = rows.next()? {
        contributions.push(parse_contribution_row(row)?);
    }
    Ok(contributions)
}

fn parse_contribution_row(row: &Row<'_>) -> RepoResult<Contribution> {
    let uuid_text: String = row.get("uuid")?;
    let plan_text: String = row.get("plan_uuid")?;
    let payer_text: String = row.get("participant_uuid")?;
    let personal_link = row
        .get::<_, Option<String>>("personal_tx_id")?
        .map(|transaction_id| -> rusqlite::Result<PersonalLink> {
            Ok(PersonalLink {
                card_id: row.get("card_id")?,
                transaction_id,
            })
        })
        .transpose()?;

    let contribution = Contribution {
        uuid: parse_uuid(&uuid_text, "contributions.uuid")?,
        plan_uuid: parse_uuid(&plan_text, "contributions.plan_uuid")?,
        payer_uuid: parse_uuid(&payer_text, "contributions.participant_uuid")?,
        description: row.get("description")?,
        amount: row.get("amount")?,
        occurred_at: row.get("occurred_at")?,
        personal_link,
    };
    contribution.validate().map_err(|err| {
        RepoError::InvalidData(format!(
            "contribution {} failed validation: {err}",
            contribution.uuid
        ))
    })?;
    Ok(contribution)
}
