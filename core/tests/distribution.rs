//! Integration tests for round-robin distribution.
//!
//! Behaviours covered:
//! 1. Round-robin fairness: 5 leads, 2 eligible operators -> A,B,A,B,A
//! 2. Zero online agents -> NoEligibleOperators, nothing mutated
//! 3. Empty general queue -> EmptyQueue, nothing mutated
//! 4. Admins and offline agents are never eligible
//! 5. Called leads are terminal: never redistributed
//! 6. Direct bulk assignment may stock an offline operator's queue
//! 7. Balanced import round-robins exactly the imported batch

use chrono::{Duration, TimeZone, Utc};
use dialdesk_core::{
    config::DeskConfig,
    distribution::BatchTarget,
    engine::DeskEngine,
    error::DeskError,
    model::{Availability, CallOutcome, Lead, LeadStatus, NewLead, Operator, Role},
    store::DeskStore,
};
use std::sync::Arc;

/// Build a migrated in-memory store and a wired engine.
fn build() -> (Arc<DeskStore>, Arc<DeskEngine>) {
    let store = Arc::new(DeskStore::in_memory().expect("open in-memory store"));
    store.migrate().expect("migrate");
    let engine =
        DeskEngine::build(Arc::clone(&store), DeskConfig::default_test()).expect("build engine");
    (store, engine)
}

fn operator(id: &str, role: Role, availability: Availability, order: i64) -> Operator {
    Operator {
        operator_id: id.into(),
        display_name: id.to_uppercase(),
        role,
        availability,
        registered_at: Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap() + Duration::seconds(order),
    }
}

fn lead(id: &str, order: i64) -> Lead {
    Lead {
        lead_id: id.into(),
        name: format!("Lead {id}"),
        phone: "5550100".into(),
        category: "inbound".into(),
        status: LeadStatus::Pending,
        assigned_to: None,
        created_at: Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap() + Duration::seconds(order),
    }
}

fn seed_leads(store: &DeskStore, ids: &[&str]) {
    let leads: Vec<Lead> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| lead(id, i as i64))
        .collect();
    store.insert_leads(&leads).expect("seed leads");
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: round-robin fairness over the general queue
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn round_robin_alternates_oldest_first() {
    let (store, engine) = build();
    store
        .insert_operator(&operator("op-a", Role::Agent, Availability::Online, 0))
        .unwrap();
    store
        .insert_operator(&operator("op-b", Role::Agent, Availability::Online, 1))
        .unwrap();
    seed_leads(&store, &["l1", "l2", "l3", "l4", "l5"]);

    let claimed = engine.distribute_general().expect("distribute");
    assert_eq!(claimed, 5, "all five leads should be claimed");

    let snap = engine.snapshot();
    let queue_a: Vec<&str> = snap
        .operator_queue("op-a")
        .iter()
        .map(|l| l.lead_id.as_str())
        .collect();
    let queue_b: Vec<&str> = snap
        .operator_queue("op-b")
        .iter()
        .map(|l| l.lead_id.as_str())
        .collect();
    assert_eq!(queue_a, ["l1", "l3", "l5"], "A takes leads 1, 3, 5");
    assert_eq!(queue_b, ["l2", "l4"], "B takes leads 2, 4");
    assert!(snap.general_queue().is_empty(), "general queue drained");
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: no online agents -> rejected before touching any lead
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn no_eligible_operators_mutates_nothing() {
    let (store, engine) = build();
    store
        .insert_operator(&operator("op-a", Role::Agent, Availability::Offline, 0))
        .unwrap();
    store
        .insert_operator(&operator("boss", Role::Admin, Availability::Online, 1))
        .unwrap();
    seed_leads(&store, &["l1", "l2"]);

    let err = engine.distribute_general().unwrap_err();
    assert!(
        matches!(err, DeskError::NoEligibleOperators),
        "expected NoEligibleOperators, got {err}"
    );

    let snap = engine.snapshot();
    assert_eq!(snap.general_queue().len(), 2, "queue untouched");
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: empty general queue -> informational rejection
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn empty_queue_is_reported_and_nothing_changes() {
    let (store, engine) = build();
    store
        .insert_operator(&operator("op-a", Role::Agent, Availability::Online, 0))
        .unwrap();

    let err = engine.distribute_general().unwrap_err();
    assert!(
        matches!(err, DeskError::EmptyQueue),
        "expected EmptyQueue, got {err}"
    );
    assert!(engine.snapshot().operator_queue("op-a").is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: eligibility is role = agent AND availability = online
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn admins_and_offline_agents_are_skipped() {
    let (store, engine) = build();
    store
        .insert_operator(&operator("boss", Role::Admin, Availability::Online, 0))
        .unwrap();
    store
        .insert_operator(&operator("op-a", Role::Agent, Availability::Online, 1))
        .unwrap();
    store
        .insert_operator(&operator("op-b", Role::Agent, Availability::Offline, 2))
        .unwrap();
    seed_leads(&store, &["l1", "l2", "l3"]);

    let claimed = engine.distribute_general().unwrap();
    assert_eq!(claimed, 3);

    let snap = engine.snapshot();
    assert_eq!(
        snap.operator_queue("op-a").len(),
        3,
        "the only eligible operator takes everything"
    );
    assert!(snap.operator_queue("boss").is_empty());
    assert!(snap.operator_queue("op-b").is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 5: called leads are terminal for distribution
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn called_leads_never_reenter_any_queue() {
    let (store, engine) = build();
    store
        .insert_operator(&operator("op-a", Role::Agent, Availability::Online, 0))
        .unwrap();
    seed_leads(&store, &["l1", "l2"]);
    engine.distribute_general().unwrap();

    // Log a call for l1 through the full session flow.
    engine.set_availability("op-a", Availability::Online).unwrap();
    engine.begin_session("op-a", "l1").unwrap();
    engine.select_carrier("op-a", "direct").unwrap();
    engine.return_from_dialer("op-a").unwrap();
    engine
        .log_outcome("op-a", CallOutcome::Answered, None)
        .unwrap();

    let snap = engine.snapshot();
    assert_eq!(snap.called_leads().len(), 1);
    assert!(
        !snap.operator_queue("op-a").iter().any(|l| l.lead_id == "l1"),
        "called lead must leave the operator queue"
    );

    // Release and redistribute: the called lead must not move.
    engine.release_queue("op-a").unwrap();
    engine.distribute_general().unwrap();
    let snap = engine.snapshot();
    let l1 = snap.find_lead("l1").unwrap();
    assert_eq!(l1.status, LeadStatus::Called);
    assert_eq!(
        l1.assigned_to.as_deref(),
        Some("op-a"),
        "called lead keeps its historical owner"
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 6: direct assignment bypasses eligibility on purpose
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn direct_batch_may_stock_an_offline_operator() {
    let (store, engine) = build();
    store
        .insert_operator(&operator("op-a", Role::Agent, Availability::Offline, 0))
        .unwrap();
    seed_leads(&store, &["l1", "l2"]);

    let claimed = engine
        .assign_batch(
            &["l1".to_string(), "l2".to_string()],
            &BatchTarget::Operator("op-a".into()),
        )
        .expect("direct assignment to offline operator");
    assert_eq!(claimed, 2);
    assert_eq!(engine.snapshot().operator_queue("op-a").len(), 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 7: balanced import distributes exactly the imported batch
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn balanced_import_round_robins_the_new_batch_only() {
    let (store, engine) = build();
    store
        .insert_operator(&operator("op-a", Role::Agent, Availability::Online, 0))
        .unwrap();
    store
        .insert_operator(&operator("op-b", Role::Agent, Availability::Online, 1))
        .unwrap();
    // A pre-existing general-queue lead that the balanced import must not touch.
    seed_leads(&store, &["old"]);

    let batch = vec![
        NewLead {
            name: "N1".into(),
            phone: "555-0001".into(),
            category: "import".into(),
        },
        NewLead {
            name: "N2".into(),
            phone: "555-0002".into(),
            category: "import".into(),
        },
    ];
    let ids = engine
        .import_leads(batch, BatchTarget::Balanced)
        .expect("balanced import");
    assert_eq!(ids.len(), 2);

    let snap = engine.snapshot();
    assert_eq!(
        snap.operator_queue("op-a").len() + snap.operator_queue("op-b").len(),
        2,
        "both imported leads assigned"
    );
    let general: Vec<&str> = snap
        .general_queue()
        .iter()
        .map(|l| l.lead_id.as_str())
        .collect();
    assert_eq!(general, ["old"], "pre-existing lead stays in the pool");
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 8: balanced import with nobody online rejects before inserting
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn balanced_import_rejects_with_no_eligible_operators() {
    let (_store, engine) = build();
    let err = engine
        .import_leads(
            vec![NewLead {
                name: "N1".into(),
                phone: "555-0001".into(),
                category: String::new(),
            }],
            BatchTarget::Balanced,
        )
        .unwrap_err();
    assert!(matches!(err, DeskError::NoEligibleOperators));
    assert!(
        engine.snapshot().leads().is_empty(),
        "rejected import must not insert anything"
    );
}
