//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `planpool_core` linkage.
//! - Walk an in-memory three-person plan through balances and settlement so
//!   the core can be eyeballed without the app.
//! - Keep output deterministic for quick local sanity checks.

use planpool_core::db::open_db_in_memory;
use planpool_core::{
    DistributionRule, LedgerService, Participant, PlanService, RegistryService,
    SettlementOptions, SettlementService, SqliteInviteCodes, SqlitePersonalTransactions,
    SqlitePlanStore,
};
use std::error::Error;

const DAY: i64 = 86_400_000;

fn main() -> Result<(), Box<dyn Error>> {
    println!("planpool_core ping={}", planpool_core::ping());
    println!("planpool_core version={}", planpool_core::core_version());

    run_demo()
}

fn run_demo() -> Result<(), Box<dyn Error>> {
    let conn = open_db_in_memory()?;
    let (plan, ana) = PlanService::new(SqlitePlanStore::try_new(&conn)?).create_plan(
        "Road trip",
        "demo-ana",
        "Ana",
        DistributionRule::Equitable,
    )?;
    let registry = RegistryService::new(
        SqlitePlanStore::try_new(&conn)?,
        SqliteInviteCodes::new(&conn),
    );
    let bo = registry.add_participant(plan.uuid, "Bo", None, None)?;
    let cy = registry.add_participant(plan.uuid, "Cy", Some("demo-cy"), None)?;

    let ledger = LedgerService::new(
        SqlitePlanStore::try_new(&conn)?,
        SqlitePersonalTransactions::new(&conn),
    );
    ledger.record(plan.uuid, ana.uuid, "Fuel", 60.0, DAY)?;
    ledger.record(plan.uuid, ana.uuid, "Tolls", 30.0, 2 * DAY)?;
    ledger.record(plan.uuid, cy.uuid, "Snacks", 30.0, 2 * DAY)?;

    let members = [ana, bo, cy];
    let settlements = SettlementService::new(
        SqlitePlanStore::try_new(&conn)?,
        SqlitePersonalTransactions::new(&conn),
        SettlementOptions::default(),
    );

    let sheet = settlements.balances(plan.uuid)?;
    println!("plan \"{}\" total={:.2}", plan.title, sheet.total);
    for row in &sheet.rows {
        println!(
            "  {:<4} paid={:>7.2} share={:>7.2} net={:>+8.2}",
            name_of(&members, row.participant_uuid),
            row.paid,
            row.fair_share,
            row.net
        );
    }

    let proposals = settlements.propose(plan.uuid)?;
    for proposal in &proposals {
        println!(
            "  {} pays {} {:.2}",
            name_of(&members, proposal.from),
            name_of(&members, proposal.to),
            proposal.amount
        );
    }
    for proposal in proposals {
        settlements.confirm(plan.uuid, proposal, "demo-ana")?;
    }
    println!(
        "after confirming: {} open transfer(s)",
        settlements.propose(plan.uuid)?.len()
    );
    Ok(())
}

fn name_of(members: &[Participant], uuid: uuid::Uuid) -> &str {
    members
        .iter()
        .find(|member| member.uuid == uuid)
        .map(|member| member.display_name.as_str())
        .unwrap_or("?")
}
