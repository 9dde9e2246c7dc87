//! Lead registry — the in-memory projection of the store.
//!
//! RULE: the registry is a read-mostly cache, not the source of truth.
//! It is replaced wholesale on every reload (full refresh, never an
//! incremental diff) and tolerates being stale between reconciliation
//! cycles. All queue-membership checks go through ident.rs.

use crate::{
    error::{DeskError, DeskResult},
    ident,
    model::{CallRecord, Collection, Lead, LeadStatus, Operator},
    store::DeskStore,
};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    operators: Vec<Operator>,
    leads: Vec<Lead>,
    call_records: Vec<CallRecord>,
    missing: Vec<Collection>,
    loaded_at: DateTime<Utc>,
}

impl RegistrySnapshot {
    /// The pre-first-load state: nothing cached, everything reported
    /// missing.
    pub fn empty() -> Self {
        Self {
            operators: Vec::new(),
            leads: Vec::new(),
            call_records: Vec::new(),
            missing: Collection::ALL.to_vec(),
            loaded_at: Utc::now(),
        }
    }

    /// Fetch the full current state of all three collections and build
    /// a fresh snapshot. A missing individual collection does not fail
    /// the load — the snapshot records it in `missing` and serves
    /// whatever did load. Only a store with no collection left at all
    /// is treated as unreachable.
    pub fn load(store: &DeskStore) -> DeskResult<Self> {
        let mut missing = Vec::new();

        let operators = match store.fetch_operators() {
            Ok(rows) => rows,
            Err(DeskError::MissingCollection { collection }) => {
                missing.push(collection);
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        let leads = match store.fetch_leads() {
            Ok(rows) => rows,
            Err(DeskError::MissingCollection { collection }) => {
                missing.push(collection);
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        let call_records = match store.fetch_call_records() {
            Ok(rows) => rows,
            Err(DeskError::MissingCollection { collection }) => {
                missing.push(collection);
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        if missing.len() == Collection::ALL.len() {
            return Err(DeskError::SourceUnavailable {
                reason: "no collection could be loaded".into(),
            });
        }

        for collection in &missing {
            log::warn!("registry: collection '{collection}' missing, serving partial snapshot");
        }

        Ok(Self {
            operators,
            leads,
            call_records,
            missing,
            loaded_at: Utc::now(),
        })
    }

    // ── Queue views ────────────────────────────────────────────
    //
    // Invariant: every lead is in exactly one of {general queue,
    // exactly one operator queue, called} at any snapshot instant.

    /// Pending leads owned by `operator_id`, oldest first.
    pub fn operator_queue(&self, operator_id: &str) -> Vec<&Lead> {
        let key = ident::canonical_key(operator_id);
        if key.is_empty() {
            return Vec::new();
        }
        self.leads
            .iter()
            .filter(|l| {
                l.status == LeadStatus::Pending
                    && ident::canonical_opt(l.assigned_to.as_deref()) == key
            })
            .collect()
    }

    /// Pending leads with no owner (empty canonical key), oldest first.
    pub fn general_queue(&self) -> Vec<&Lead> {
        self.leads
            .iter()
            .filter(|l| {
                l.status == LeadStatus::Pending
                    && ident::canonical_opt(l.assigned_to.as_deref()).is_empty()
            })
            .collect()
    }

    /// Terminal leads; never redistributed.
    pub fn called_leads(&self) -> Vec<&Lead> {
        self.leads
            .iter()
            .filter(|l| l.status == LeadStatus::Called)
            .collect()
    }

    /// Online agents in registration order — the exact sequence
    /// round-robin indexes into.
    pub fn eligible_operators(&self) -> Vec<&Operator> {
        self.operators.iter().filter(|o| o.is_eligible()).collect()
    }

    // ── Lookups ────────────────────────────────────────────────

    pub fn find_operator(&self, operator_id: &str) -> Option<&Operator> {
        let key = ident::canonical_key(operator_id);
        if key.is_empty() {
            return None;
        }
        self.operators
            .iter()
            .find(|o| ident::canonical_key(&o.operator_id) == key)
    }

    pub fn find_lead(&self, lead_id: &str) -> Option<&Lead> {
        self.leads.iter().find(|l| l.lead_id == lead_id)
    }

    // ── Accessors ──────────────────────────────────────────────

    pub fn operators(&self) -> &[Operator] {
        &self.operators
    }

    pub fn leads(&self) -> &[Lead] {
        &self.leads
    }

    pub fn call_records(&self) -> &[CallRecord] {
        &self.call_records
    }

    pub fn missing_collections(&self) -> &[Collection] {
        &self.missing
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}
