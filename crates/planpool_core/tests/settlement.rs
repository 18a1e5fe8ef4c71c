use planpool_core::db::open_db_in_memory;
use planpool_core::repo::{PlanRepository, SettlementRepository};
use planpool_core::{
    DistributionRule, GatewayError, LedgerService, PersonalTransactionGateway,
    PersonalTransactionRequest, PlanError, PlanService, RegistryService, RepoError,
    SettlementOptions, SettlementProposal, SettlementRecord, SettlementService,
    SettlementStatus, SqliteInviteCodes, SqlitePersonalTransactions, SqlitePlanStore,
    ValidationError, BALANCE_TOLERANCE, PARTICIPANT_PALETTE,
};
use rusqlite::{params, Connection};
use uuid::Uuid;

const DAY: i64 = 86_400_000;

struct Trip {
    plan: Uuid,
    ana: Uuid,
    bo: Uuid,
    cy: Uuid,
}

fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

/// Ana paid 90, Bo (placeholder) nothing, Cy 30; equitable split.
fn seed_trip(conn: &Connection) -> Trip {
    let (plan, ana) = PlanService::new(SqlitePlanStore::try_new(conn).unwrap())
        .create_plan("Road trip", "acct-ana", "Ana", DistributionRule::Equitable)
        .unwrap();
    let registry = RegistryService::new(
        SqlitePlanStore::try_new(conn).unwrap(),
        SqliteInviteCodes::new(conn),
    );
    let bo = registry.add_participant(plan.uuid, "Bo", None, None).unwrap();
    let cy = registry
        .add_participant(plan.uuid, "Cy", Some("acct-cy"), None)
        .unwrap();

    let ledger = LedgerService::new(
        SqlitePlanStore::try_new(conn).unwrap(),
        SqlitePersonalTransactions::new(conn),
    );
    ledger.record(plan.uuid, ana.uuid, "Fuel", 60.0, DAY).unwrap();
    ledger.record(plan.uuid, ana.uuid, "Tolls", 30.0, 2 * DAY).unwrap();
    ledger.record(plan.uuid, cy.uuid, "Snacks", 30.0, 2 * DAY).unwrap();

    Trip {
        plan: plan.uuid,
        ana: ana.uuid,
        bo: bo.uuid,
        cy: cy.uuid,
    }
}

fn settlements(
    conn: &Connection,
    options: SettlementOptions,
) -> SettlementService<SqlitePlanStore<'_>, SqlitePersonalTransactions<'_>> {
    SettlementService::new(
        SqlitePlanStore::try_new(conn).unwrap(),
        SqlitePersonalTransactions::new(conn),
        options,
    )
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() <= BALANCE_TOLERANCE,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn equitable_balances_match_hand_computed_positions() {
    let conn = setup();
    let trip = seed_trip(&conn);

    let sheet = settlements(&conn, SettlementOptions::default())
        .balances(trip.plan)
        .unwrap();

    assert_close(sheet.total, 120.0);
    assert_close(sheet.net_of(trip.ana).unwrap(), 50.0);
    assert_close(sheet.net_of(trip.bo).unwrap(), -40.0);
    assert_close(sheet.net_of(trip.cy).unwrap(), -10.0);
    assert_close(sheet.net_sum(), 0.0);
    assert!(!sheet.needs_attention);
}

#[test]
fn proposals_pay_largest_creditor_from_largest_debtor_first() {
    let conn = setup();
    let trip = seed_trip(&conn);
    let service = settlements(&conn, SettlementOptions::default());

    let proposals = service.propose(trip.plan).unwrap();

    assert_eq!(proposals.len(), 2);
    assert_eq!((proposals[0].from, proposals[0].to), (trip.bo, trip.ana));
    assert_close(proposals[0].amount, 40.0);
    assert_eq!((proposals[1].from, proposals[1].to), (trip.cy, trip.ana));
    assert_close(proposals[1].amount, 10.0);

    assert_eq!(service.propose(trip.plan).unwrap(), proposals);
}

#[test]
fn confirming_twice_stores_one_record() {
    let conn = setup();
    let trip = seed_trip(&conn);
    let service = settlements(&conn, SettlementOptions::default());
    let proposal = service.propose(trip.plan).unwrap()[0];

    let first = service.confirm(trip.plan, proposal, "acct-cy").unwrap();
    let second = service.confirm(trip.plan, proposal, "acct-ana").unwrap();

    assert!(first.newly_confirmed);
    assert!(!second.newly_confirmed);
    assert_eq!(first.record.uuid, second.record.uuid);
    assert_eq!(first.record.confirmed_by, trip.cy);
    assert_eq!(service.list_settlements(trip.plan).unwrap().len(), 1);
}

#[test]
fn confirmed_settlement_drops_out_of_next_plan() {
    let conn = setup();
    let trip = seed_trip(&conn);
    let service = settlements(&conn, SettlementOptions::default());
    let proposal = service.propose(trip.plan).unwrap()[0];
    service.confirm(trip.plan, proposal, "acct-ana").unwrap();

    let sheet = service.balances(trip.plan).unwrap();
    assert_close(sheet.total, 120.0);
    assert_close(sheet.net_of(trip.bo).unwrap(), 0.0);
    assert_close(sheet.net_of(trip.ana).unwrap(), 10.0);

    let remaining = service.propose(trip.plan).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!((remaining[0].from, remaining[0].to), (trip.cy, trip.ana));
    assert_close(remaining[0].amount, 10.0);
}

#[test]
fn confirmation_requires_a_participant() {
    let conn = setup();
    let trip = seed_trip(&conn);
    let service = settlements(&conn, SettlementOptions::default());
    let proposal = service.propose(trip.plan).unwrap()[0];

    let err = service
        .confirm(trip.plan, proposal, "acct-stranger")
        .unwrap_err();
    assert!(matches!(
        err,
        PlanError::Validation(ValidationError::NotParticipant(_))
    ));
    assert!(service.list_settlements(trip.plan).unwrap().is_empty());
}

#[test]
fn malformed_proposals_are_rejected() {
    let conn = setup();
    let trip = seed_trip(&conn);
    let service = settlements(&conn, SettlementOptions::default());

    let self_transfer = SettlementProposal {
        from: trip.ana,
        to: trip.ana,
        amount: 5.0,
    };
    assert!(matches!(
        service.confirm(trip.plan, self_transfer, "acct-ana").unwrap_err(),
        PlanError::Validation(ValidationError::SelfTransfer)
    ));

    let negative = SettlementProposal {
        from: trip.bo,
        to: trip.ana,
        amount: -5.0,
    };
    assert!(matches!(
        service.confirm(trip.plan, negative, "acct-ana").unwrap_err(),
        PlanError::Validation(ValidationError::NonPositiveAmount(_))
    ));
}

#[test]
fn mirroring_posts_for_account_backed_parties_only() {
    let conn = setup();
    let trip = seed_trip(&conn);
    let service = settlements(
        &conn,
        SettlementOptions {
            mirror_personal_transactions: true,
        },
    );

    let bo_to_ana = service.propose(trip.plan).unwrap()[0];
    let outcome = service.confirm(trip.plan, bo_to_ana, "acct-ana").unwrap();
    assert!(outcome.record.from_transaction_id.is_none());
    let credit_id = outcome.record.to_transaction_id.clone().unwrap();

    let (account, amount): (String, f64) = conn
        .query_row(
            "SELECT account_id, amount FROM personal_transactions WHERE uuid = ?1;",
            [credit_id.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(account, "acct-ana");
    assert_close(amount, 40.0);

    let stored = service.list_settlements(trip.plan).unwrap();
    assert_eq!(stored[0].to_transaction_id.as_deref(), Some(credit_id.as_str()));
}

struct OfflineTransactions;

impl PersonalTransactionGateway for OfflineTransactions {
    fn post_personal_transaction(
        &self,
        _request: &PersonalTransactionRequest,
    ) -> Result<String, GatewayError> {
        Err(GatewayError::new("personal_tx", "unavailable", "offline", true))
    }

    fn retract_personal_transaction(&self, _transaction_id: &str) -> Result<(), GatewayError> {
        Err(GatewayError::new("personal_tx", "unavailable", "offline", true))
    }
}

#[test]
fn mirroring_failure_never_fails_confirmation() {
    let conn = setup();
    let trip = seed_trip(&conn);
    let service = SettlementService::new(
        SqlitePlanStore::try_new(&conn).unwrap(),
        OfflineTransactions,
        SettlementOptions {
            mirror_personal_transactions: true,
        },
    );

    let cy_to_ana = service.propose(trip.plan).unwrap()[1];
    let outcome = service.confirm(trip.plan, cy_to_ana, "acct-cy").unwrap();

    assert!(outcome.newly_confirmed);
    assert!(outcome.record.from_transaction_id.is_none());
    assert!(outcome.record.to_transaction_id.is_none());
    assert_eq!(service.list_settlements(trip.plan).unwrap().len(), 1);
}

#[test]
fn custom_share_mismatch_is_folded_into_last_participant() {
    let conn = setup();
    let trip = seed_trip(&conn);
    let plans = PlanService::new(SqlitePlanStore::try_new(&conn).unwrap());
    plans
        .set_distribution_rule(trip.plan, "acct-ana", DistributionRule::Custom)
        .unwrap();
    plans.set_custom_share(trip.plan, trip.ana, Some(60.0)).unwrap();
    plans.set_custom_share(trip.plan, trip.bo, Some(30.0)).unwrap();
    plans.set_custom_share(trip.plan, trip.cy, Some(20.0)).unwrap();

    let sheet = settlements(&conn, SettlementOptions::default())
        .balances(trip.plan)
        .unwrap();

    assert!(sheet.needs_attention);
    assert_close(sheet.share_discrepancy, 10.0);
    assert_close(sheet.net_of(trip.ana).unwrap(), 30.0);
    assert_close(sheet.net_of(trip.bo).unwrap(), -30.0);
    assert_close(sheet.net_of(trip.cy).unwrap(), 0.0);
}

#[test]
fn orphaned_entry_reports_invariant_violation_with_best_effort_sheet() {
    let conn = setup();
    let trip = seed_trip(&conn);

    // Simulates a row written by a client that bypassed foreign keys.
    conn.execute_batch("PRAGMA foreign_keys = OFF;").unwrap();
    conn.execute(
        "INSERT INTO contributions (uuid, plan_uuid, participant_uuid, description, amount, occurred_at)
         VALUES (?1, ?2, ?3, 'Ghost', 12.0, 0);",
        [
            Uuid::new_v4().to_string(),
            trip.plan.to_string(),
            Uuid::new_v4().to_string(),
        ],
    )
    .unwrap();
    conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();

    let service = settlements(&conn, SettlementOptions::default());
    match service.balances(trip.plan).unwrap_err() {
        PlanError::InvariantViolation(violation) => {
            assert!(violation.best_effort.needs_attention);
            assert_eq!(violation.best_effort.rows.len(), 3);
            assert!(violation.drift.abs() > BALANCE_TOLERANCE);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(service.propose(trip.plan).is_err());
}

fn settle_all(
    service: &SettlementService<SqlitePlanStore<'_>, SqlitePersonalTransactions<'_>>,
    plan: Uuid,
) {
    for proposal in service.propose(plan).unwrap() {
        let outcome = service.confirm(plan, proposal, "acct-ana").unwrap();
        assert!(outcome.newly_confirmed, "proposal {proposal:?} was not stored");
    }
}

#[test]
fn identical_spending_can_be_settled_again() {
    let conn = setup();
    let trip = seed_trip(&conn);
    let service = settlements(&conn, SettlementOptions::default());
    settle_all(&service, trip.plan);
    assert!(service.propose(trip.plan).unwrap().is_empty());

    let ledger = LedgerService::new(
        SqlitePlanStore::try_new(&conn).unwrap(),
        SqlitePersonalTransactions::new(&conn),
    );
    ledger.record(trip.plan, trip.ana, "Fuel", 60.0, 3 * DAY).unwrap();
    ledger.record(trip.plan, trip.ana, "Tolls", 30.0, 3 * DAY).unwrap();
    ledger.record(trip.plan, trip.cy, "Snacks", 30.0, 3 * DAY).unwrap();

    let second_round = service.propose(trip.plan).unwrap();
    assert_eq!(second_round.len(), 2);
    assert_close(second_round[0].amount, 40.0);
    assert_close(second_round[1].amount, 10.0);
    settle_all(&service, trip.plan);

    let sheet = service.balances(trip.plan).unwrap();
    for participant in [trip.ana, trip.bo, trip.cy] {
        assert_close(sheet.net_of(participant).unwrap(), 0.0);
    }
    assert!(service.propose(trip.plan).unwrap().is_empty());
    assert_eq!(service.list_settlements(trip.plan).unwrap().len(), 4);
}

#[test]
fn repeated_confirmation_after_ledger_change_is_rejected_not_duplicated() {
    let conn = setup();
    let trip = seed_trip(&conn);
    let service = settlements(&conn, SettlementOptions::default());
    let bo_to_ana = service.propose(trip.plan).unwrap()[0];
    service.confirm(trip.plan, bo_to_ana, "acct-ana").unwrap();

    LedgerService::new(
        SqlitePlanStore::try_new(&conn).unwrap(),
        SqlitePersonalTransactions::new(&conn),
    )
    .record(trip.plan, trip.cy, "Water", 3.0, 3 * DAY)
    .unwrap();

    // Bo now owes 1, so the stale 40 cannot be applied a second time.
    assert!(matches!(
        service.confirm(trip.plan, bo_to_ana, "acct-ana").unwrap_err(),
        PlanError::Validation(ValidationError::ExceedsOutstanding { .. })
    ));
    assert_eq!(service.list_settlements(trip.plan).unwrap().len(), 1);
}

#[test]
fn confirmation_cannot_exceed_outstanding_positions() {
    let conn = setup();
    let trip = seed_trip(&conn);
    let service = settlements(&conn, SettlementOptions::default());

    let overpay = SettlementProposal {
        from: trip.bo,
        to: trip.ana,
        amount: 45.0,
    };
    match service.confirm(trip.plan, overpay, "acct-ana").unwrap_err() {
        PlanError::Validation(ValidationError::ExceedsOutstanding { amount, outstanding }) => {
            assert_close(amount, 45.0);
            assert_close(outstanding, 40.0);
        }
        other => panic!("unexpected error: {other}"),
    }

    // Bo is a debtor; paying Bo would push that position further negative.
    let wrong_way = SettlementProposal {
        from: trip.cy,
        to: trip.bo,
        amount: 5.0,
    };
    assert!(matches!(
        service.confirm(trip.plan, wrong_way, "acct-cy").unwrap_err(),
        PlanError::Validation(ValidationError::ExceedsOutstanding { .. })
    ));

    let partial = SettlementProposal {
        from: trip.bo,
        to: trip.ana,
        amount: 15.0,
    };
    assert!(service.confirm(trip.plan, partial, "acct-ana").unwrap().newly_confirmed);
    assert_close(service.balances(trip.plan).unwrap().net_of(trip.bo).unwrap(), -25.0);
}

#[test]
fn settlement_write_against_stale_revision_is_a_conflict() {
    let conn = setup();
    let trip = seed_trip(&conn);
    let store = SqlitePlanStore::try_new(&conn).unwrap();
    let observed = store.load_snapshot(trip.plan).unwrap();

    LedgerService::new(
        SqlitePlanStore::try_new(&conn).unwrap(),
        SqlitePersonalTransactions::new(&conn),
    )
    .record(trip.plan, trip.bo, "Parking", 6.0, 3 * DAY)
    .unwrap();
    let current = store.load_snapshot(trip.plan).unwrap();
    assert!(current.plan.ledger_revision > observed.plan.ledger_revision);

    let stale = SettlementRecord {
        uuid: Uuid::new_v4(),
        plan_uuid: trip.plan,
        from: trip.bo,
        to: trip.ana,
        amount: 38.0,
        status: SettlementStatus::Confirmed,
        confirmed_by: trip.ana,
        ledger_revision: observed.plan.ledger_revision,
        from_transaction_id: None,
        to_transaction_id: None,
        confirmed_at: 0,
    };
    assert!(matches!(
        store.insert_settlement_once(&stale, 0).unwrap_err(),
        RepoError::Conflict(_)
    ));

    let fresh = SettlementRecord {
        ledger_revision: current.plan.ledger_revision,
        ..stale.clone()
    };
    assert!(matches!(
        store.insert_settlement_once(&fresh, 1).unwrap_err(),
        RepoError::Conflict(_)
    ));
    let (stored, inserted) = store.insert_settlement_once(&fresh, 0).unwrap();
    assert!(inserted);
    assert_eq!(stored.ledger_revision, current.plan.ledger_revision);
    assert_eq!(store.list_settlements(trip.plan).unwrap().len(), 1);
}

#[test]
fn racing_duplicate_membership_never_inflates_equitable_split() {
    let conn = setup();
    let trip = seed_trip(&conn);

    // A second device joined as Cy before seeing the first row.
    conn.execute(
        "INSERT INTO participants (uuid, plan_uuid, display_name, account_id, color, is_owner)
         VALUES (?1, ?2, 'Cy', 'acct-cy', ?3, 0);",
        params![
            Uuid::new_v4().to_string(),
            trip.plan.to_string(),
            PARTICIPANT_PALETTE[7]
        ],
    )
    .unwrap();

    let sheet = settlements(&conn, SettlementOptions::default())
        .balances(trip.plan)
        .unwrap();

    assert_eq!(sheet.rows.len(), 3);
    assert_close(sheet.net_of(trip.ana).unwrap(), 50.0);
    assert_close(sheet.net_of(trip.bo).unwrap(), -40.0);
    assert_close(sheet.net_of(trip.cy).unwrap(), -10.0);
    let members: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM participants WHERE plan_uuid = ?1;",
            [trip.plan.to_string()],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(members, 3);
}
