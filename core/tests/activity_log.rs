//! Integration tests for the activity log.
//!
//! Every mutating engine operation appends exactly one entry of its
//! event type; rejected operations append nothing. Payloads are JSON
//! and parse back into the event they were written from.

use dialdesk_core::{
    config::DeskConfig,
    distribution::BatchTarget,
    engine::DeskEngine,
    event::DeskEvent,
    model::{Availability, CallOutcome, NewLead, Role},
    store::DeskStore,
};
use std::sync::Arc;

fn build() -> (Arc<DeskStore>, Arc<DeskEngine>) {
    let store = Arc::new(DeskStore::in_memory().expect("open in-memory store"));
    store.migrate().expect("migrate");
    let engine =
        DeskEngine::build(Arc::clone(&store), DeskConfig::default_test()).expect("build engine");
    (store, engine)
}

fn count(store: &DeskStore, event_type: &str) -> i64 {
    store.activity_count(event_type).expect("count")
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: one entry per mutating operation, by event type
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn each_mutating_operation_appends_exactly_one_entry() {
    let (store, engine) = build();

    engine
        .register_operator("op-a", "Op A", Role::Agent)
        .unwrap();
    engine
        .register_operator("op-b", "Op B", Role::Agent)
        .unwrap();
    assert_eq!(count(&store, "operator_registered"), 2);

    engine
        .set_availability("op-a", Availability::Online)
        .unwrap();
    engine
        .set_availability("op-b", Availability::Online)
        .unwrap();
    assert_eq!(count(&store, "operator_updated"), 2);

    engine
        .import_leads(
            vec![
                NewLead {
                    name: "N1".into(),
                    phone: "555-0001".into(),
                    category: String::new(),
                },
                NewLead {
                    name: "N2".into(),
                    phone: "555-0002".into(),
                    category: String::new(),
                },
            ],
            BatchTarget::GeneralPool,
        )
        .unwrap();
    assert_eq!(count(&store, "batch_assigned"), 1, "import logs one batch");

    engine.distribute_general().unwrap();
    assert_eq!(count(&store, "batch_assigned"), 2);

    engine.transfer_queue("op-a", "op-b").unwrap();
    assert_eq!(count(&store, "queue_transferred"), 1);

    engine.release_queue("op-b").unwrap();
    assert_eq!(count(&store, "queue_released"), 1);

    engine.promote_operator("op-b").unwrap();
    assert_eq!(count(&store, "operator_updated"), 3);

    engine.remove_operator("op-b").unwrap();
    assert_eq!(count(&store, "operator_removed"), 1);

    // Reconciliation itself is audited: startup plus one per change.
    assert!(count(&store, "snapshot_reloaded") >= 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: rejected operations append nothing
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn rejected_operations_leave_no_entry() {
    let (store, engine) = build();

    // No operators, no leads: both preconditions fail.
    assert!(engine.distribute_general().is_err());
    assert!(engine.transfer_queue("op-a", "op-a").is_err());
    assert!(engine.remove_operator("ghost").is_err());

    assert_eq!(count(&store, "batch_assigned"), 0);
    assert_eq!(count(&store, "queue_transferred"), 0);
    assert_eq!(count(&store, "operator_removed"), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: call_logged is attributed to the operator and round-trips
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn call_logged_entry_names_the_operator_and_parses_back() {
    let (store, engine) = build();
    engine
        .register_operator("op-a", "Op A", Role::Agent)
        .unwrap();
    engine
        .set_availability("op-a", Availability::Online)
        .unwrap();
    let ids = engine
        .import_leads(
            vec![NewLead {
                name: "N1".into(),
                phone: "555-0001".into(),
                category: String::new(),
            }],
            BatchTarget::Operator("op-a".into()),
        )
        .unwrap();

    engine.begin_session("op-a", &ids[0]).unwrap();
    engine.select_carrier("op-a", "direct").unwrap();
    engine.return_from_dialer("op-a").unwrap();
    let record = engine
        .log_outcome("op-a", CallOutcome::Answered, None)
        .unwrap();

    let entries = store.activity_entries().expect("entries");
    let entry = entries
        .iter()
        .find(|e| e.event_type == "call_logged")
        .expect("a call_logged entry exists");
    assert_eq!(entry.actor, "op-a", "attributed to the operator, not the engine");

    let event: DeskEvent = serde_json::from_str(&entry.payload).expect("payload parses");
    match event {
        DeskEvent::CallLogged {
            record_id,
            lead_id,
            operator_id,
            outcome,
            ..
        } => {
            assert_eq!(record_id, record.record_id);
            assert_eq!(lead_id, ids[0]);
            assert_eq!(operator_id, "op-a");
            assert_eq!(outcome, "answered");
        }
        other => panic!("wrong payload variant: {other:?}"),
    }
}
