use planpool_core::db::{open_db, open_db_in_memory};
use planpool_core::{
    dedupe_on_membership_change, DistributionRule, LedgerService, PlanError, PlanService, RegistryService, RemoveOutcome,
    SqliteInviteCodes, SqlitePersonalTransactions, SqlitePlanStore, ValidationError,
    PlanFeed, PARTICIPANT_PALETTE,
};
use rusqlite::{params, Connection};
use std::sync::Arc;
use uuid::Uuid;

fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

fn plans(conn: &Connection) -> PlanService<SqlitePlanStore<'_>> {
    PlanService::new(SqlitePlanStore::try_new(conn).unwrap())
}

fn registry(conn: &Connection) -> RegistryService<SqlitePlanStore<'_>, SqliteInviteCodes<'_>> {
    RegistryService::new(
        SqlitePlanStore::try_new(conn).unwrap(),
        SqliteInviteCodes::new(conn),
    )
}

fn ledger(conn: &Connection) -> LedgerService<SqlitePlanStore<'_>, SqlitePersonalTransactions<'_>> {
    LedgerService::new(
        SqlitePlanStore::try_new(conn).unwrap(),
        SqlitePersonalTransactions::new(conn),
    )
}

#[test]
fn owner_joins_plan_with_first_palette_color() {
    let conn = setup();
    let (plan, owner) = plans(&conn)
        .create_plan("Trip", "acct-ana", "Ana", DistributionRule::Equitable)
        .unwrap();

    assert!(owner.is_owner);
    assert_eq!(owner.color, PARTICIPANT_PALETTE[0]);
    assert_eq!(owner.account_id.as_deref(), Some("acct-ana"));
    assert_eq!(plan.owner_account_id, "acct-ana");

    let members = registry(&conn).list_participants(plan.uuid).unwrap();
    assert_eq!(members, vec![owner]);
}

#[test]
fn omitted_colors_take_next_free_palette_entry() {
    let conn = setup();
    let (plan, _) = plans(&conn)
        .create_plan("Flat", "acct-ana", "Ana", DistributionRule::Equitable)
        .unwrap();
    let service = registry(&conn);

    let bo = service.add_participant(plan.uuid, "Bo", None, None).unwrap();
    let cy = service
        .add_participant(plan.uuid, "Cy", None, Some(PARTICIPANT_PALETTE[3]))
        .unwrap();
    let di = service.add_participant(plan.uuid, "Di", None, None).unwrap();

    assert_eq!(bo.color, PARTICIPANT_PALETTE[1]);
    assert_eq!(cy.color, PARTICIPANT_PALETTE[3]);
    assert_eq!(di.color, PARTICIPANT_PALETTE[2]);
}

#[test]
fn exhausted_palette_reuses_least_recently_assigned_color() {
    let conn = setup();
    let (plan, _) = plans(&conn)
        .create_plan("Club", "acct-ana", "Ana", DistributionRule::Equitable)
        .unwrap();
    let service = registry(&conn);
    for index in 1..PARTICIPANT_PALETTE.len() {
        service
            .add_participant(plan.uuid, format!("member {index}"), None, None)
            .unwrap();
    }

    let overflow = service.add_participant(plan.uuid, "Late", None, None).unwrap();
    assert_eq!(overflow.color, PARTICIPANT_PALETTE[0]);

    let next = service.add_participant(plan.uuid, "Later", None, None).unwrap();
    assert_eq!(next.color, PARTICIPANT_PALETTE[1]);
}

#[test]
fn requested_color_collisions_and_unknown_colors_are_actionable() {
    let conn = setup();
    let (plan, owner) = plans(&conn)
        .create_plan("Trip", "acct-ana", "Ana", DistributionRule::Equitable)
        .unwrap();
    let service = registry(&conn);

    let taken = service
        .add_participant(plan.uuid, "Bo", None, Some(owner.color.to_lowercase().as_str()))
        .unwrap_err();
    assert!(matches!(
        taken,
        PlanError::Validation(ValidationError::ColorInUse(_))
    ));
    assert!(taken.to_string().contains("choose a different color"));

    let unknown = service
        .add_participant(plan.uuid, "Bo", None, Some("#123456"))
        .unwrap_err();
    assert!(matches!(
        unknown,
        PlanError::Validation(ValidationError::UnknownColor(_))
    ));
}

#[test]
fn recolor_normalizes_and_checks_uniqueness() {
    let conn = setup();
    let (plan, owner) = plans(&conn)
        .create_plan("Trip", "acct-ana", "Ana", DistributionRule::Equitable)
        .unwrap();
    let service = registry(&conn);
    let bo = service.add_participant(plan.uuid, "Bo", None, None).unwrap();

    let err = service
        .recolor_participant(plan.uuid, bo.uuid, &owner.color)
        .unwrap_err();
    assert!(matches!(
        err,
        PlanError::Validation(ValidationError::ColorInUse(_))
    ));

    let lower = PARTICIPANT_PALETTE[5].to_lowercase();
    let recolored = service
        .recolor_participant(plan.uuid, bo.uuid, &lower)
        .unwrap();
    assert_eq!(recolored.color, PARTICIPANT_PALETTE[5]);
}

#[test]
fn duplicate_account_membership_is_rejected() {
    let conn = setup();
    let (plan, _) = plans(&conn)
        .create_plan("Trip", "acct-ana", "Ana", DistributionRule::Equitable)
        .unwrap();
    let service = registry(&conn);
    service
        .add_participant(plan.uuid, "Bo", Some("acct-bo"), None)
        .unwrap();

    let err = service
        .add_participant(plan.uuid, "Bo again", Some("acct-bo"), None)
        .unwrap_err();
    assert!(matches!(
        err,
        PlanError::Validation(ValidationError::DuplicateMembership(ref account)) if account == "acct-bo"
    ));
}

#[test]
fn blank_names_are_rejected() {
    let conn = setup();
    let (plan, _) = plans(&conn)
        .create_plan("Trip", "acct-ana", "Ana", DistributionRule::Equitable)
        .unwrap();

    let err = registry(&conn)
        .add_participant(plan.uuid, "   ", None, None)
        .unwrap_err();
    assert!(matches!(err, PlanError::Validation(ValidationError::EmptyName)));
}

#[test]
fn ensure_self_participant_is_idempotent() {
    let conn = setup();
    let (plan, _) = plans(&conn)
        .create_plan("Trip", "acct-ana", "Ana", DistributionRule::Equitable)
        .unwrap();
    let service = registry(&conn);

    let first = service
        .ensure_self_participant(plan.uuid, "acct-bo", "Bo")
        .unwrap();
    let second = service
        .ensure_self_participant(plan.uuid, "acct-bo", "Bo from tablet")
        .unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.participant.uuid, second.participant.uuid);
    assert!(!second.participant.is_owner);
    assert_eq!(service.list_participants(plan.uuid).unwrap().len(), 2);
}

#[test]
fn ensure_self_participant_grants_owner_rights_to_plan_owner() {
    let conn = setup();
    let (plan, owner) = plans(&conn)
        .create_plan("Trip", "acct-ana", "Ana", DistributionRule::Equitable)
        .unwrap();

    let outcome = registry(&conn)
        .ensure_self_participant(plan.uuid, "acct-ana", "Ana")
        .unwrap();
    assert!(!outcome.created);
    assert_eq!(outcome.participant.uuid, owner.uuid);
    assert!(outcome.participant.is_owner);
}

#[test]
fn racing_duplicate_rows_are_collapsed_without_orphaning_entries() {
    let conn = setup();
    let (plan, _) = plans(&conn)
        .create_plan("Trip", "acct-ana", "Ana", DistributionRule::Equitable)
        .unwrap();
    let service = registry(&conn);
    let kept = service
        .ensure_self_participant(plan.uuid, "acct-bo", "Bo")
        .unwrap()
        .participant;

    // Second device inserted its own row before seeing the first one.
    let duplicate = Uuid::new_v4();
    conn.execute(
        "INSERT INTO participants (uuid, plan_uuid, display_name, account_id, color, is_owner)
         VALUES (?1, ?2, 'Bo', 'acct-bo', ?3, 0);",
        params![
            duplicate.to_string(),
            plan.uuid.to_string(),
            PARTICIPANT_PALETTE[7]
        ],
    )
    .unwrap();
    let entry = ledger(&conn)
        .record(plan.uuid, duplicate, "Taxi", 24.0, 1_700_000_000_000)
        .unwrap();

    let members = service.list_participants(plan.uuid).unwrap();
    let bo_rows = members
        .iter()
        .filter(|member| member.account_id.as_deref() == Some("acct-bo"))
        .collect::<Vec<_>>();
    assert_eq!(bo_rows.len(), 1);
    assert_eq!(bo_rows[0].uuid, kept.uuid);

    let entries = ledger(&conn).for_plan(plan.uuid).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].uuid, entry.uuid);
    assert_eq!(entries[0].payer_uuid, kept.uuid);
    assert_eq!(service.dedupe_self_participants(plan.uuid).unwrap(), 0);
}

#[test]
fn membership_feed_collapses_duplicates_written_by_another_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("planpool.sqlite3");
    let conn = open_db(&path).unwrap();
    let feed = Arc::new(PlanFeed::new());
    let (plan, _) = plans(&conn)
        .create_plan("Trip", "acct-ana", "Ana", DistributionRule::Equitable)
        .unwrap();
    let kept = registry(&conn)
        .ensure_self_participant(plan.uuid, "acct-bo", "Bo")
        .unwrap()
        .participant;

    let watched = path.clone();
    let watch = dedupe_on_membership_change(&feed, plan.uuid, move |plan_uuid| {
        let conn = open_db(&watched).unwrap();
        let removed = registry(&conn).dedupe_self_participants(plan_uuid);
        removed
    });

    conn.execute(
        "INSERT INTO participants (uuid, plan_uuid, display_name, account_id, color, is_owner)
         VALUES (?1, ?2, 'Bo', 'acct-bo', ?3, 0);",
        params![
            Uuid::new_v4().to_string(),
            plan.uuid.to_string(),
            PARTICIPANT_PALETTE[7]
        ],
    )
    .unwrap();

    // Any announced membership change triggers the collapse.
    registry(&conn)
        .with_feed(Arc::clone(&feed))
        .add_participant(plan.uuid, "Guest", None, None)
        .unwrap();

    let bo_rows: Vec<String> = conn
        .prepare("SELECT uuid FROM participants WHERE plan_uuid = ?1 AND account_id = 'acct-bo';")
        .unwrap()
        .query_map(params![plan.uuid.to_string()], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(bo_rows, vec![kept.uuid.to_string()]);

    watch.unsubscribe();
    assert_eq!(feed.subscriber_count(plan.uuid), 0);
}

#[test]
fn remove_participant_without_entries_deletes_immediately() {
    let conn = setup();
    let (plan, _) = plans(&conn)
        .create_plan("Trip", "acct-ana", "Ana", DistributionRule::Equitable)
        .unwrap();
    let service = registry(&conn);
    let bo = service.add_participant(plan.uuid, "Bo", None, None).unwrap();

    let outcome = service.remove_participant(plan.uuid, bo.uuid).unwrap();
    assert_eq!(outcome, RemoveOutcome::Removed);
    assert_eq!(service.list_participants(plan.uuid).unwrap().len(), 1);

    let again = service.remove_participant(plan.uuid, bo.uuid).unwrap_err();
    assert!(again.is_soft());
}

#[test]
fn remove_participant_with_entries_asks_for_strategy() {
    let conn = setup();
    let (plan, _) = plans(&conn)
        .create_plan("Trip", "acct-ana", "Ana", DistributionRule::Equitable)
        .unwrap();
    let service = registry(&conn);
    let bo = service.add_participant(plan.uuid, "Bo", None, None).unwrap();
    ledger(&conn)
        .record(plan.uuid, bo.uuid, "Fuel", 40.0, 1_700_000_000_000)
        .unwrap();

    match service.remove_participant(plan.uuid, bo.uuid).unwrap() {
        RemoveOutcome::NeedsStrategy(preview) => {
            assert_eq!(preview.participant_uuid, bo.uuid);
            assert_eq!(preview.entries.len(), 1);
            assert!((preview.total - 40.0).abs() < 1e-9);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(service.list_participants(plan.uuid).unwrap().len(), 2);
}

#[test]
fn owner_cannot_be_removed() {
    let conn = setup();
    let (plan, owner) = plans(&conn)
        .create_plan("Trip", "acct-ana", "Ana", DistributionRule::Equitable)
        .unwrap();

    let err = registry(&conn)
        .remove_participant(plan.uuid, owner.uuid)
        .unwrap_err();
    assert!(matches!(
        err,
        PlanError::Validation(ValidationError::OwnerCannotLeave)
    ));
}

#[test]
fn participant_of_another_plan_is_rejected() {
    let conn = setup();
    let (first, _) = plans(&conn)
        .create_plan("Trip", "acct-ana", "Ana", DistributionRule::Equitable)
        .unwrap();
    let (second, _) = plans(&conn)
        .create_plan("Flat", "acct-bo", "Bo", DistributionRule::Equitable)
        .unwrap();
    let service = registry(&conn);
    let cy = service.add_participant(second.uuid, "Cy", None, None).unwrap();

    let err = service.rename_participant(first.uuid, cy.uuid, "Cyrus").unwrap_err();
    assert!(matches!(
        err,
        PlanError::Validation(ValidationError::ForeignParticipant)
    ));
}

#[test]
fn invite_code_onboards_account() {
    let conn = setup();
    let (plan, _) = plans(&conn)
        .create_plan("Trip", "acct-ana", "Ana", DistributionRule::Equitable)
        .unwrap();
    let service = registry(&conn);

    let code = service.invite_code(plan.uuid).unwrap();
    assert_eq!(service.invite_code(plan.uuid).unwrap(), code);

    let joined = service
        .join_with_invite(&code.to_lowercase(), "acct-bo", "Bo")
        .unwrap();
    assert!(joined.created);
    assert_eq!(joined.participant.plan_uuid, plan.uuid);

    let listed = plans(&conn).list_plans_for_account("acct-bo").unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].uuid, plan.uuid);
}

#[test]
fn unknown_invite_code_surfaces_external_service_error() {
    let conn = setup();
    let err = registry(&conn)
        .join_with_invite("ZZZZ22", "acct-bo", "Bo")
        .unwrap_err();
    assert!(matches!(err, PlanError::ExternalService(_)));
}
