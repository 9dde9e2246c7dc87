use crate::model::Collection;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeskError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unreachable: {reason}")]
    SourceUnavailable { reason: String },

    #[error("Collection '{collection}' is missing from the store")]
    MissingCollection { collection: Collection },

    #[error("No eligible operators: no agent is online")]
    NoEligibleOperators,

    #[error("General queue is empty, nothing to distribute")]
    EmptyQueue,

    #[error("Invalid transfer: {reason}")]
    InvalidTransfer { reason: String },

    #[error("Operator '{operator_id}' already has an active call session")]
    SessionAlreadyActive { operator_id: String },

    #[error("Operator '{operator_id}' has no active call session")]
    NoActiveSession { operator_id: String },

    #[error("Session is in state '{actual}', expected '{expected}'")]
    SessionState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Lead '{lead_id}' not found")]
    LeadNotFound { lead_id: String },

    #[error("Lead '{lead_id}' is not in operator '{operator_id}''s queue")]
    LeadNotInQueue {
        lead_id: String,
        operator_id: String,
    },

    #[error("Operator '{operator_id}' not found")]
    OperatorNotFound { operator_id: String },

    #[error("Invalid operator: {reason}")]
    InvalidOperator { reason: String },

    #[error("Operator '{operator_id}' already registered")]
    DuplicateOperator { operator_id: String },

    #[error("Operator '{operator_id}' still owns {count} pending leads; transfer or release them first")]
    OperatorOwnsLeads { operator_id: String, count: usize },

    #[error("Unknown carrier '{carrier_id}'")]
    UnknownCarrier { carrier_id: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type DeskResult<T> = Result<T, DeskError>;
