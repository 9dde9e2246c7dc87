//! Distribution planning — who gets which lead.
//!
//! Planning is pure: each function turns a registry snapshot view into
//! a list of conditional assignment updates. The store applies the
//! plan with one compare-and-swap update per lead inside a single
//! transaction (store.rs::assign_leads_cas), so a concurrent operation
//! that already claimed a lead makes that update match nothing — the
//! loser claims fewer leads, never a double assignment.
//!
//! Lead order is creation-time ascending (lead id as tiebreak), which
//! the registry already guarantees. Determinism here is what makes
//! round-robin fairness testable.

use crate::{
    error::{DeskError, DeskResult},
    ident,
    model::{EntityId, Lead, Operator},
};

/// One conditional assignment update: claim `lead_id` for
/// `new_assignee` only if `assigned_to` still equals the value read at
/// selection time.
#[derive(Debug, Clone)]
pub struct LeadAssignment {
    pub lead_id: EntityId,
    pub expected_assignee: Option<EntityId>,
    pub new_assignee: Option<EntityId>,
}

/// Target of a bulk assignment over a batch of leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchTarget {
    /// Leads land in (or return to) the general queue.
    GeneralPool,
    /// Round-robin of exactly this batch across current eligible
    /// operators.
    Balanced,
    /// Every lead goes to this operator directly, bypassing
    /// eligibility and availability checks — an admin may stock an
    /// offline operator's queue deliberately.
    Operator(EntityId),
}

/// Lead *i* (0-indexed, queue order) goes to `operators[i mod N]`.
/// Callers check N > 0 before planning (`NoEligibleOperators`).
pub fn round_robin_plan(queue: &[&Lead], operators: &[&Operator]) -> Vec<LeadAssignment> {
    debug_assert!(!operators.is_empty(), "round_robin_plan with no operators");
    queue
        .iter()
        .enumerate()
        .map(|(i, lead)| LeadAssignment {
            lead_id: lead.lead_id.clone(),
            expected_assignee: lead.assigned_to.clone(),
            new_assignee: Some(operators[i % operators.len()].operator_id.clone()),
        })
        .collect()
}

/// Every lead in the batch to one operator.
pub fn direct_plan(leads: &[&Lead], operator_id: &str) -> Vec<LeadAssignment> {
    leads
        .iter()
        .map(|lead| LeadAssignment {
            lead_id: lead.lead_id.clone(),
            expected_assignee: lead.assigned_to.clone(),
            new_assignee: Some(operator_id.to_string()),
        })
        .collect()
}

/// Every lead in the batch back to the general pool.
pub fn release_plan(leads: &[&Lead]) -> Vec<LeadAssignment> {
    leads
        .iter()
        .map(|lead| LeadAssignment {
            lead_id: lead.lead_id.clone(),
            expected_assignee: lead.assigned_to.clone(),
            new_assignee: None,
        })
        .collect()
}

/// Transfer preconditions: both identities must canonicalize to
/// non-empty keys and must differ. Checked before touching any lead.
pub fn validate_transfer(source: &str, destination: &str) -> DeskResult<()> {
    let src = ident::canonical_key(source);
    let dst = ident::canonical_key(destination);
    if src.is_empty() || dst.is_empty() {
        return Err(DeskError::InvalidTransfer {
            reason: "source and destination must both be non-empty identities".into(),
        });
    }
    if src == dst {
        return Err(DeskError::InvalidTransfer {
            reason: format!("source and destination are the same operator ('{source}')"),
        });
    }
    Ok(())
}
