//! Activity events — the append-only audit trail.
//!
//! RULE: every mutating engine operation and every snapshot reload
//! appends exactly one entry. The engine never reads these back for
//! its own logic; they exist for operations forensics and for tests
//! that assert on operation history.

use crate::model::EntityId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeskEvent {
    BatchAssigned {
        mode: String, // "round_robin" | "balanced" | "direct" | "general_pool"
        target: Option<EntityId>,
        requested: usize,
        claimed: usize,
    },
    QueueTransferred {
        source: EntityId,
        destination: EntityId,
        moved: usize,
    },
    QueueReleased {
        operator_id: EntityId,
        released: usize,
    },
    CallLogged {
        record_id: EntityId,
        lead_id: EntityId,
        operator_id: EntityId,
        outcome: String,
        duration_secs: i64,
    },
    OperatorRegistered {
        operator_id: EntityId,
        role: String,
    },
    OperatorUpdated {
        operator_id: EntityId,
        field: String, // "availability" | "role"
        value: String,
    },
    OperatorRemoved {
        operator_id: EntityId,
    },
    SnapshotReloaded {
        trigger: String,
        operators: usize,
        leads: usize,
        call_records: usize,
        missing: Vec<String>,
    },
}

/// Extract a stable string name from a DeskEvent variant.
/// Used for the event_type column in activity_log.
pub fn event_type_name(event: &DeskEvent) -> &'static str {
    match event {
        DeskEvent::BatchAssigned { .. }      => "batch_assigned",
        DeskEvent::QueueTransferred { .. }   => "queue_transferred",
        DeskEvent::QueueReleased { .. }      => "queue_released",
        DeskEvent::CallLogged { .. }         => "call_logged",
        DeskEvent::OperatorRegistered { .. } => "operator_registered",
        DeskEvent::OperatorUpdated { .. }    => "operator_updated",
        DeskEvent::OperatorRemoved { .. }    => "operator_removed",
        DeskEvent::SnapshotReloaded { .. }   => "snapshot_reloaded",
    }
}

/// The activity log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub entry_id:   EntityId,
    pub actor:      String, // operator identity or "engine"
    pub event_type: String,
    pub payload:    String, // JSON-serialized DeskEvent
    pub created_at: String, // RFC 3339
}
