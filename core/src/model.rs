//! Domain records for the three replicated collections.
//!
//! Operator and Lead rows are owned by the external store; the registry
//! holds a read-mostly projection of them. Call records are write-once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A stable, opaque identifier for any entity.
pub type EntityId = String;

/// The three collections the engine replicates from the store.
/// The activity log is deliberately not one of them — appends to it
/// never fire change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Operators,
    Leads,
    CallRecords,
}

impl Collection {
    pub const ALL: [Collection; 3] = [
        Collection::Operators,
        Collection::Leads,
        Collection::CallRecords,
    ];

    pub fn table(&self) -> &'static str {
        match self {
            Collection::Operators   => "operator",
            Collection::Leads       => "lead",
            Collection::CallRecords => "call_record",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Agent,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Agent => "agent",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "admin" => Some(Role::Admin),
            "agent" => Some(Role::Agent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Online,
    Offline,
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Availability::Online  => "online",
            Availability::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Option<Availability> {
        match s {
            "online"  => Some(Availability::Online),
            "offline" => Some(Availability::Offline),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operator {
    pub operator_id:   EntityId,
    pub display_name:  String,
    pub role:          Role,
    pub availability:  Availability,
    pub registered_at: DateTime<Utc>,
}

impl Operator {
    /// Eligible for round-robin distribution: an online agent.
    /// Direct bulk assignment deliberately bypasses this check.
    pub fn is_eligible(&self) -> bool {
        self.role == Role::Agent && self.availability == Availability::Online
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    Pending,
    Called,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::Pending => "pending",
            LeadStatus::Called  => "called",
        }
    }

    pub fn parse(s: &str) -> Option<LeadStatus> {
        match s {
            "pending" => Some(LeadStatus::Pending),
            "called"  => Some(LeadStatus::Called),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub lead_id:     EntityId,
    pub name:        String,
    /// Digits only at rest; normalized again before dialing.
    pub phone:       String,
    pub category:    String,
    pub status:      LeadStatus,
    /// None = general queue. Raw identifier as the producer wrote it;
    /// compare via ident::canonical_key, never directly.
    pub assigned_to: Option<EntityId>,
    pub created_at:  DateTime<Utc>,
}

/// Contact fields for a lead about to be imported. The engine assigns
/// the identity, status, and creation timestamp on insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLead {
    pub name:     String,
    pub phone:    String,
    pub category: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Answered,
    NoAnswer,
    InvalidNumber,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallOutcome::Answered      => "answered",
            CallOutcome::NoAnswer      => "no_answer",
            CallOutcome::InvalidNumber => "invalid_number",
        }
    }

    pub fn parse(s: &str) -> Option<CallOutcome> {
        match s {
            "answered"       => Some(CallOutcome::Answered),
            "no_answer"      => Some(CallOutcome::NoAnswer),
            "invalid_number" => Some(CallOutcome::InvalidNumber),
            _ => None,
        }
    }
}

/// Immutable once written. Creating one is the sole trigger that
/// transitions its lead to `Called`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub record_id:     EntityId,
    pub lead_id:       EntityId,
    pub operator_id:   EntityId,
    pub outcome:       CallOutcome,
    pub duration_secs: i64,
    pub logged_at:     DateTime<Utc>,
    pub recording_ref: Option<String>,
}
