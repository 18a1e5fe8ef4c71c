//! Balance calculator.
//!
//! `net(p) = paid(p) - fair_share(p) + settled_out(p) - settled_in(p)`, where
//! settled amounts come from confirmed settlement records. Settlements move
//! value between two participants without changing the pool total.

use crate::ledger::BALANCE_TOLERANCE;
use crate::model::contribution::Contribution;
use crate::model::participant::{Participant, ParticipantId};
use crate::model::plan::DistributionRule;
use crate::model::settlement::SettlementRecord;
use serde::Serialize;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Consistent snapshot of one plan used as calculator input.
#[derive(Debug, Clone, Copy)]
pub struct BalanceInput<'a> {
    /// Participants in join order; the last one absorbs custom-share drift.
    pub participants: &'a [Participant],
    pub contributions: &'a [Contribution],
    pub settlements: &'a [SettlementRecord],
    pub rule: DistributionRule,
}

/// Derived position of one participant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParticipantBalance {
    pub participant_uuid: ParticipantId,
    /// Raw signed total this participant put toward the pool.
    pub paid: f64,
    pub fair_share: f64,
    /// Confirmed settlements paid out minus settlements received.
    pub settled: f64,
    /// Positive: owed money. Negative: owes money.
    pub net: f64,
}

/// Full balance mapping for one plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceSheet {
    /// One row per participant, in input order.
    pub rows: Vec<ParticipantBalance>,
    /// Sum of every contribution in the snapshot.
    pub total: f64,
    /// Set when custom shares did not sum to `total` or a record referenced
    /// an unknown participant. Non-fatal.
    pub needs_attention: bool,
    /// Amount folded into the last participant's custom share.
    pub share_discrepancy: f64,
}

impl BalanceSheet {
    /// Net position for one participant.
    pub fn net_of(&self, participant_uuid: ParticipantId) -> Option<f64> {
        self.rows
            .iter()
            .find(|row| row.participant_uuid == participant_uuid)
            .map(|row| row.net)
    }

    /// Sum of all net positions; zero for a consistent ledger.
    pub fn net_sum(&self) -> f64 {
        self.rows.iter().map(|row| row.net).sum()
    }

    /// `(participant, net)` pairs for the settlement planner.
    pub fn nets(&self) -> Vec<(ParticipantId, f64)> {
        self.rows
            .iter()
            .map(|row| (row.participant_uuid, row.net))
            .collect()
    }
}

/// `Σ net` drifted beyond tolerance. Carries the best-effort sheet so the UI
/// can still render a "needs reconciliation" state.
#[derive(Debug, Clone, PartialEq)]
pub struct InvariantViolation {
    pub drift: f64,
    pub best_effort: BalanceSheet,
}

impl Display for InvariantViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "plan balances do not sum to zero (drift {:.6}); reconciliation needed",
            self.drift
        )
    }
}

impl Error for InvariantViolation {}

/// Computes every participant's net position from a plan snapshot.
///
/// # Errors
/// - `InvariantViolation` when `Σ net` is off by more than
///   `BALANCE_TOLERANCE`, e.g. an entry references a participant missing from
///   the snapshot.
pub fn compute_balances(input: BalanceInput<'_>) -> Result<BalanceSheet, InvariantViolation> {
    let mut paid: HashMap<ParticipantId, f64> = input
        .participants
        .iter()
        .map(|participant| (participant.uuid, 0.0))
        .collect();
    let mut needs_attention = false;
    let mut total = 0.0;

    for contribution in input.contributions {
        total += contribution.amount;
        match paid.get_mut(&contribution.payer_uuid) {
            Some(value) => *value += contribution.amount,
            None => needs_attention = true,
        }
    }

    let mut settled: HashMap<ParticipantId, f64> = HashMap::new();
    for record in input.settlements {
        if !paid.contains_key(&record.from) || !paid.contains_key(&record.to) {
            needs_attention = true;
            continue;
        }
        *settled.entry(record.from).or_insert(0.0) += record.amount;
        *settled.entry(record.to).or_insert(0.0) -= record.amount;
    }

    let (shares, share_discrepancy) = fair_shares(input.participants, input.rule, total);
    if share_discrepancy.abs() > BALANCE_TOLERANCE {
        needs_attention = true;
    }

    let rows = input
        .participants
        .iter()
        .zip(shares)
        .map(|(participant, fair_share)| {
            let paid = paid.get(&participant.uuid).copied().unwrap_or(0.0);
            let settled = settled.get(&participant.uuid).copied().unwrap_or(0.0);
            ParticipantBalance {
                participant_uuid: participant.uuid,
                paid,
                fair_share,
                settled,
                net: paid - fair_share + settled,
            }
        })
        .collect::<Vec<_>>();

    let sheet = BalanceSheet {
        rows,
        total,
        needs_attention,
        share_discrepancy,
    };

    let drift = sheet.net_sum();
    if drift.abs() > BALANCE_TOLERANCE {
        return Err(InvariantViolation {
            drift,
            best_effort: BalanceSheet {
                needs_attention: true,
                ..sheet
            },
        });
    }

    Ok(sheet)
}

/// Returns fair shares in participant order plus the discrepancy folded into
/// the last participant (always zero for equitable plans).
fn fair_shares(participants: &[Participant], rule: DistributionRule, total: f64) -> (Vec<f64>, f64) {
    if participants.is_empty() {
        return (Vec::new(), 0.0);
    }

    match rule {
        DistributionRule::Equitable => {
            let share = total / participants.len() as f64;
            (vec![share; participants.len()], 0.0)
        }
        DistributionRule::Custom => {
            let mut shares = participants
                .iter()
                .map(|participant| participant.custom_share.unwrap_or(0.0))
                .collect::<Vec<_>>();
            let discrepancy = total - shares.iter().sum::<f64>();
            if discrepancy.abs() > BALANCE_TOLERANCE {
                if let Some(last) = shares.last_mut() {
                    *last += discrepancy;
                }
                (shares, discrepancy)
            } else {
                (shares, 0.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{compute_balances, BalanceInput};
    use crate::ledger::BALANCE_TOLERANCE;
    use crate::model::contribution::Contribution;
    use crate::model::participant::{Participant, PARTICIPANT_PALETTE};
    use crate::model::plan::DistributionRule;
    use crate::model::settlement::{SettlementRecord, SettlementStatus};
    use uuid::Uuid;

    fn people(plan: Uuid, count: usize) -> Vec<Participant> {
        (0..count)
            .map(|index| Participant {
                uuid: Uuid::new_v4(),
                plan_uuid: plan,
                display_name: format!("p{index}"),
                account_id: None,
                color: PARTICIPANT_PALETTE[index].to_string(),
                is_owner: index == 0,
                custom_share: None,
                join_seq: index as i64 + 1,
            })
            .collect()
    }

    fn paid(plan: Uuid, payer: &Participant, amount: f64) -> Contribution {
        Contribution::new(plan, payer.uuid, "entry", amount, 0)
    }

    #[test]
    fn equitable_three_way_split() {
        let plan = Uuid::new_v4();
        let members = people(plan, 3);
        let entries = vec![
            paid(plan, &members[0], 90.0),
            paid(plan, &members[2], 30.0),
        ];
        let sheet = compute_balances(BalanceInput {
            participants: &members,
            contributions: &entries,
            settlements: &[],
            rule: DistributionRule::Equitable,
        })
        .unwrap();

        assert_eq!(sheet.total, 120.0);
        assert!((sheet.net_of(members[0].uuid).unwrap() - 50.0).abs() < BALANCE_TOLERANCE);
        assert!((sheet.net_of(members[1].uuid).unwrap() + 40.0).abs() < BALANCE_TOLERANCE);
        assert!((sheet.net_of(members[2].uuid).unwrap() + 10.0).abs() < BALANCE_TOLERANCE);
        assert!(!sheet.needs_attention);
    }

    #[test]
    fn confirmed_settlement_moves_positions_without_touching_total() {
        let plan = Uuid::new_v4();
        let members = people(plan, 2);
        let entries = vec![paid(plan, &members[0], 100.0)];
        let record = SettlementRecord {
            uuid: Uuid::new_v4(),
            plan_uuid: plan,
            from: members[1].uuid,
            to: members[0].uuid,
            amount: 50.0,
            status: SettlementStatus::Confirmed,
            confirmed_by: members[1].uuid,
            ledger_revision: 0,
            from_transaction_id: None,
            to_transaction_id: None,
            confirmed_at: 0,
        };
        let sheet = compute_balances(BalanceInput {
            participants: &members,
            contributions: &entries,
            settlements: &[record],
            rule: DistributionRule::Equitable,
        })
        .unwrap();

        assert_eq!(sheet.total, 100.0);
        assert!(sheet.net_of(members[0].uuid).unwrap().abs() < BALANCE_TOLERANCE);
        assert!(sheet.net_of(members[1].uuid).unwrap().abs() < BALANCE_TOLERANCE);
    }

    #[test]
    fn custom_share_mismatch_is_clamped_into_last_participant() {
        let plan = Uuid::new_v4();
        let mut members = people(plan, 3);
        members[0].custom_share = Some(60.0);
        members[1].custom_share = Some(30.0);
        members[2].custom_share = Some(0.0);
        let entries = vec![paid(plan, &members[0], 100.0)];

        let sheet = compute_balances(BalanceInput {
            participants: &members,
            contributions: &entries,
            settlements: &[],
            rule: DistributionRule::Custom,
        })
        .unwrap();

        assert!(sheet.needs_attention);
        assert!((sheet.share_discrepancy - 10.0).abs() < BALANCE_TOLERANCE);
        assert!((sheet.rows[2].fair_share - 10.0).abs() < BALANCE_TOLERANCE);
        assert!(sheet.net_sum().abs() < BALANCE_TOLERANCE);
    }

    #[test]
    fn orphaned_entry_surfaces_invariant_violation_with_best_effort_sheet() {
        let plan = Uuid::new_v4();
        let members = people(plan, 2);
        let orphan = Contribution::new(plan, Uuid::new_v4(), "ghost", 40.0, 0);
        let entries = vec![paid(plan, &members[0], 20.0), orphan];

        let violation = compute_balances(BalanceInput {
            participants: &members,
            contributions: &entries,
            settlements: &[],
            rule: DistributionRule::Equitable,
        })
        .expect_err("orphaned entry must break conservation");

        assert!((violation.drift + 40.0).abs() < BALANCE_TOLERANCE);
        assert!(violation.best_effort.needs_attention);
        assert_eq!(violation.best_effort.rows.len(), 2);
    }

    #[test]
    fn conservation_holds_for_uneven_splits() {
        let plan = Uuid::new_v4();
        let members = people(plan, 7);
        let entries = members
            .iter()
            .enumerate()
            .map(|(index, member)| paid(plan, member, 10.0 / (index as f64 + 3.0)))
            .collect::<Vec<_>>();
        let sheet = compute_balances(BalanceInput {
            participants: &members,
            contributions: &entries,
            settlements: &[],
            rule: DistributionRule::Equitable,
        })
        .unwrap();
        assert!(sheet.net_sum().abs() < BALANCE_TOLERANCE);
    }

    #[test]
    fn empty_plan_yields_empty_sheet() {
        let sheet = compute_balances(BalanceInput {
            participants: &[],
            contributions: &[],
            settlements: &[],
            rule: DistributionRule::Custom,
        })
        .unwrap();
        assert!(sheet.rows.is_empty());
        assert_eq!(sheet.total, 0.0);
    }
}
