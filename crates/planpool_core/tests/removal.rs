use planpool_core::db::open_db_in_memory;
use planpool_core::repo::{RemovalPlan, RemovalRepository, RemovalSteps};
use planpool_core::{
    DistributionRule, LedgerService, PlanError, PlanService, RegistryService, RemovalService,
    RepoError, SettlementOptions, SettlementService, SqliteInviteCodes,
    SqlitePersonalTransactions, SqlitePlanStore, ValidationError, BALANCE_TOLERANCE,
};
use rusqlite::Connection;
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

    let ledger = ledger(conn);
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

fn ledger(conn: &Connection) -> LedgerService<SqlitePlanStore<'_>, SqlitePersonalTransactions<'_>> {
    LedgerService::new(
        SqlitePlanStore::try_new(conn).unwrap(),
        SqlitePersonalTransactions::new(conn),
    )
}

fn removal(conn: &Connection) -> RemovalService<SqlitePlanStore<'_>> {
    RemovalService::new(SqlitePlanStore::try_new(conn).unwrap())
}

fn settlements(
    conn: &Connection,
) -> SettlementService<SqlitePlanStore<'_>, SqlitePersonalTransactions<'_>> {
    SettlementService::new(
        SqlitePlanStore::try_new(conn).unwrap(),
        SqlitePersonalTransactions::new(conn),
        SettlementOptions::default(),
    )
}

fn member_count(conn: &Connection, plan: Uuid) -> i64 {
    conn.query_row(
        "SELECT COUNT(*) FROM participants WHERE plan_uuid = ?1;",
        [plan.to_string()],
        |row| row.get(0),
    )
    .unwrap()
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() <= BALANCE_TOLERANCE,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn preview_lists_entries_and_signed_total() {
    let conn = setup();
    let trip = seed_trip(&conn);
    ledger(&conn)
        .record(trip.plan, trip.cy, "Refund", -5.0, 3 * DAY)
        .unwrap();

    let preview = removal(&conn)
        .preview_contributions(trip.plan, trip.cy)
        .unwrap();
    assert_eq!(preview.entries.len(), 2);
    assert_close(preview.total, 25.0);
}

#[test]
fn delete_all_and_remove_rebalances_remaining_members() {
    let conn = setup();
    let trip = seed_trip(&conn);

    removal(&conn).delete_all_and_remove(trip.plan, trip.bo).unwrap();

    assert_eq!(member_count(&conn, trip.plan), 2);
    let proposals = settlements(&conn).propose(trip.plan).unwrap();
    assert_eq!(proposals.len(), 1);
    assert_eq!((proposals[0].from, proposals[0].to), (trip.cy, trip.ana));
    assert_close(proposals[0].amount, 30.0);
}

#[test]
fn delete_all_drops_entries_and_settlements() {
    let conn = setup();
    let trip = seed_trip(&conn);
    let service = settlements(&conn);
    let cy_to_ana = service.propose(trip.plan).unwrap()[1];
    service.confirm(trip.plan, cy_to_ana, "acct-cy").unwrap();

    let outcome = removal(&conn)
        .delete_all_and_remove(trip.plan, trip.cy)
        .unwrap();

    assert_eq!(outcome.written_off.len(), 1);
    assert!(service.list_settlements(trip.plan).unwrap().is_empty());
    let sheet = service.balances(trip.plan).unwrap();
    assert_close(sheet.total, 90.0);
    assert_close(sheet.net_sum(), 0.0);
}

#[test]
fn full_transfer_reassigns_entries_and_settlements() {
    let conn = setup();
    let trip = seed_trip(&conn);
    let service = settlements(&conn);
    let cy_to_ana = service.propose(trip.plan).unwrap()[1];
    service.confirm(trip.plan, cy_to_ana, "acct-ana").unwrap();
    let before = service.balances(trip.plan).unwrap();

    let outcome = removal(&conn)
        .transfer_and_remove(trip.plan, trip.cy, trip.bo, None)
        .unwrap();

    assert_close(outcome.transferred, 30.0);
    assert!(outcome.written_off.is_empty());
    let after = service.balances(trip.plan).unwrap();
    assert_close(after.total, before.total);
    assert_close(after.net_sum(), 0.0);
    assert_close(after.net_of(trip.ana).unwrap(), 20.0);
    assert_close(after.net_of(trip.bo).unwrap(), -20.0);

    let records = service.list_settlements(trip.plan).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!((records[0].from, records[0].to), (trip.bo, trip.ana));
}

#[test]
fn amount_at_or_above_total_counts_as_full_transfer() {
    let conn = setup();
    let trip = seed_trip(&conn);

    let outcome = removal(&conn)
        .transfer_and_remove(trip.plan, trip.cy, trip.bo, Some(45.0))
        .unwrap();

    assert_close(outcome.transferred, 30.0);
    let entries = ledger(&conn).for_plan(trip.plan).unwrap();
    assert_eq!(entries.len(), 3);
    assert!(entries
        .iter()
        .any(|entry| entry.payer_uuid == trip.bo && entry.description == "Snacks"));
}

#[test]
fn partial_transfer_books_amount_and_writes_off_remainder() {
    let conn = setup();
    let trip = seed_trip(&conn);

    let outcome = removal(&conn)
        .transfer_and_remove(trip.plan, trip.cy, trip.bo, Some(10.0))
        .unwrap();

    assert_close(outcome.transferred, 10.0);
    assert_eq!(outcome.written_off.len(), 1);
    assert_close(outcome.written_off[0].amount, 20.0);

    let entries = ledger(&conn).for_plan(trip.plan).unwrap();
    let bo_entries = entries
        .iter()
        .filter(|entry| entry.payer_uuid == trip.bo)
        .collect::<Vec<_>>();
    assert_eq!(bo_entries.len(), 1);
    assert_close(bo_entries[0].amount, 10.0);
    assert!(bo_entries[0].description.contains("Cy"));
    assert!(entries.iter().all(|entry| entry.payer_uuid != trip.cy));
    // The rescaled remainder is reported, not stored.
    assert!(entries
        .iter()
        .all(|entry| entry.uuid != outcome.written_off[0].uuid));

    let sheet = settlements(&conn).balances(trip.plan).unwrap();
    assert_close(sheet.total, 100.0);
    assert_close(sheet.net_sum(), 0.0);
    assert_close(sheet.net_of(trip.ana).unwrap(), 40.0);
}

#[test]
fn invalid_requests_leave_participant_in_place() {
    let conn = setup();
    let trip = seed_trip(&conn);
    let service = removal(&conn);

    assert!(matches!(
        service
            .transfer_and_remove(trip.plan, trip.cy, trip.cy, None)
            .unwrap_err(),
        PlanError::Validation(ValidationError::SelfTransfer)
    ));
    assert!(matches!(
        service
            .transfer_and_remove(trip.plan, trip.cy, trip.bo, Some(0.0))
            .unwrap_err(),
        PlanError::Validation(ValidationError::NonPositiveAmount(_))
    ));
    assert!(service
        .transfer_and_remove(trip.plan, trip.cy, Uuid::new_v4(), None)
        .unwrap_err()
        .is_soft());
    assert!(matches!(
        service.delete_all_and_remove(trip.plan, trip.ana).unwrap_err(),
        PlanError::Validation(ValidationError::OwnerCannotLeave)
    ));

    assert_eq!(member_count(&conn, trip.plan), 3);
    assert_eq!(ledger(&conn).for_plan(trip.plan).unwrap().len(), 3);
}

#[test]
fn target_from_another_plan_is_rejected() {
    let conn = setup();
    let trip = seed_trip(&conn);
    let (_, stranger) = PlanService::new(SqlitePlanStore::try_new(&conn).unwrap())
        .create_plan("Other", "acct-zed", "Zed", DistributionRule::Equitable)
        .unwrap();

    let err = removal(&conn)
        .transfer_and_remove(trip.plan, trip.cy, stranger.uuid, None)
        .unwrap_err();
    assert!(matches!(
        err,
        PlanError::Validation(ValidationError::ForeignParticipant)
    ));
    assert_eq!(member_count(&conn, trip.plan), 3);
}

#[test]
fn stale_removal_plan_conflicts_without_changes() {
    let conn = setup();
    let trip = seed_trip(&conn);
    let store = SqlitePlanStore::try_new(&conn).unwrap();

    // Computed before Cy's latest entry landed.
    let stale = RemovalPlan {
        plan_uuid: trip.plan,
        participant_uuid: trip.cy,
        expected: Vec::new(),
        steps: RemovalSteps::DeleteAll,
    };
    match store.apply_removal(&stale) {
        Err(RepoError::Conflict(_)) => {}
        other => panic!("expected conflict, got {other:?}"),
    }

    assert_eq!(member_count(&conn, trip.plan), 3);
    assert_eq!(ledger(&conn).for_plan(trip.plan).unwrap().len(), 3);
}
