//! The desk engine — ties registry, distribution, and call sessions
//! together over one store.
//!
//! RULES:
//!   - Reactive, not scheduled: operations run on receipt of a trigger
//!     (user action or change notification), never on a loop.
//!   - Every trigger causes a full snapshot reload. A failed reload is
//!     logged and the previous snapshot stays in service; the next
//!     trigger retries.
//!   - Precondition violations reject before any mutation. Losing a
//!     concurrent claim race is not an error — the operation just
//!     claims fewer leads, reflected in the returned count.

use crate::{
    config::DeskConfig,
    distribution::{self, BatchTarget},
    error::{DeskError, DeskResult},
    event::{event_type_name, ActivityEntry, DeskEvent},
    ident,
    model::{
        Availability, CallOutcome, CallRecord, Collection, EntityId, Lead, LeadStatus, NewLead,
        Operator, Role,
    },
    registry::RegistrySnapshot,
    session::{Dialer, LogDialer, SessionManager, SessionView},
    store::DeskStore,
};
use chrono::Utc;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

pub struct DeskEngine {
    store: Arc<DeskStore>,
    config: DeskConfig,
    registry: RwLock<Arc<RegistrySnapshot>>,
    sessions: SessionManager,
    dialer: Arc<dyn Dialer>,
}

impl DeskEngine {
    /// Build a fully wired engine: initial snapshot loaded and the
    /// store's change feed subscribed for all three collections.
    pub fn build(store: Arc<DeskStore>, config: DeskConfig) -> DeskResult<Arc<Self>> {
        Self::build_with_dialer(store, config, Arc::new(LogDialer))
    }

    pub fn build_with_dialer(
        store: Arc<DeskStore>,
        config: DeskConfig,
        dialer: Arc<dyn Dialer>,
    ) -> DeskResult<Arc<Self>> {
        let engine = Arc::new(Self {
            store: Arc::clone(&store),
            config,
            registry: RwLock::new(Arc::new(RegistrySnapshot::empty())),
            sessions: SessionManager::new(),
            dialer,
        });
        engine.reload("startup")?;

        // The engine's own mutations come back through the same feed
        // as external ones. Weak, so dropping the engine unsubscribes.
        for collection in Collection::ALL {
            let weak = Arc::downgrade(&engine);
            store.subscribe_changes(collection, move |c| {
                if let Some(engine) = weak.upgrade() {
                    if let Err(e) = engine.reload(&format!("changed:{c}")) {
                        log::warn!(
                            "reconciliation after '{c}' change failed: {e}; serving previous snapshot"
                        );
                    }
                }
            });
        }
        Ok(engine)
    }

    // ── Reconciliation ─────────────────────────────────────────

    /// Current registry snapshot. Cheap: an Arc clone.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.registry.read().expect("registry lock poisoned"))
    }

    /// Explicit manual refresh.
    pub fn refresh(&self) -> DeskResult<()> {
        self.reload("manual")
    }

    /// External change notification for one collection. Treated purely
    /// as a refresh trigger; a failure is logged and retried on the
    /// next trigger.
    pub fn notify_changed(&self, collection: Collection) {
        if let Err(e) = self.reload(&format!("external:{collection}")) {
            log::warn!("reconciliation after external '{collection}' notification failed: {e}");
        }
    }

    fn reload(&self, trigger: &str) -> DeskResult<()> {
        let snapshot = RegistrySnapshot::load(&self.store)?;
        let event = DeskEvent::SnapshotReloaded {
            trigger: trigger.to_string(),
            operators: snapshot.operators().len(),
            leads: snapshot.leads().len(),
            call_records: snapshot.call_records().len(),
            missing: snapshot
                .missing_collections()
                .iter()
                .map(|c| c.to_string())
                .collect(),
        };
        *self.registry.write().expect("registry lock poisoned") = Arc::new(snapshot);
        log::debug!("snapshot reloaded (trigger: {trigger})");
        self.append_activity("engine", &event);
        Ok(())
    }

    // ── Distribution ───────────────────────────────────────────

    /// Round-robin the whole general queue across eligible operators.
    /// Returns the number of leads actually claimed.
    pub fn distribute_general(&self) -> DeskResult<usize> {
        let snap = self.snapshot();
        let eligible = snap.eligible_operators();
        if eligible.is_empty() {
            return Err(DeskError::NoEligibleOperators);
        }
        let queue = snap.general_queue();
        if queue.is_empty() {
            return Err(DeskError::EmptyQueue);
        }

        let plan = distribution::round_robin_plan(&queue, &eligible);
        let requested = plan.len();
        let claimed = self.store.assign_leads_cas(&plan)?;
        log::info!("distribution: claimed {claimed}/{requested} general-queue leads");
        self.append_activity(
            "engine",
            &DeskEvent::BatchAssigned {
                mode: "round_robin".into(),
                target: None,
                requested,
                claimed,
            },
        );
        Ok(claimed)
    }

    /// Bulk-assign an explicit batch of leads. Direct assignment to an
    /// operator bypasses eligibility and availability on purpose.
    pub fn assign_batch(&self, lead_ids: &[EntityId], target: &BatchTarget) -> DeskResult<usize> {
        let snap = self.snapshot();
        let mut leads: Vec<&Lead> = Vec::with_capacity(lead_ids.len());
        for id in lead_ids {
            leads.push(snap.find_lead(id).ok_or_else(|| DeskError::LeadNotFound {
                lead_id: id.clone(),
            })?);
        }

        let (plan, mode, target_id) = match target {
            BatchTarget::GeneralPool => {
                (distribution::release_plan(&leads), "general_pool", None)
            }
            BatchTarget::Balanced => {
                let eligible = snap.eligible_operators();
                if eligible.is_empty() {
                    return Err(DeskError::NoEligibleOperators);
                }
                (
                    distribution::round_robin_plan(&leads, &eligible),
                    "balanced",
                    None,
                )
            }
            BatchTarget::Operator(id) => {
                let op = snap
                    .find_operator(id)
                    .ok_or_else(|| DeskError::OperatorNotFound {
                        operator_id: id.clone(),
                    })?;
                (
                    distribution::direct_plan(&leads, &op.operator_id),
                    "direct",
                    Some(op.operator_id.clone()),
                )
            }
        };

        let requested = plan.len();
        let claimed = self.store.assign_leads_cas(&plan)?;
        self.append_activity(
            "engine",
            &DeskEvent::BatchAssigned {
                mode: mode.into(),
                target: target_id,
                requested,
                claimed,
            },
        );
        Ok(claimed)
    }

    /// Insert newly imported leads and route them per `target`.
    /// Preconditions are checked before any insert, so a rejected
    /// import leaves the store untouched. Returns the new lead ids.
    pub fn import_leads(
        &self,
        batch: Vec<NewLead>,
        target: BatchTarget,
    ) -> DeskResult<Vec<EntityId>> {
        {
            let snap = self.snapshot();
            match &target {
                BatchTarget::Balanced if snap.eligible_operators().is_empty() => {
                    return Err(DeskError::NoEligibleOperators);
                }
                BatchTarget::Operator(id) => {
                    snap.find_operator(id)
                        .ok_or_else(|| DeskError::OperatorNotFound {
                            operator_id: id.clone(),
                        })?;
                }
                _ => {}
            }
        }

        let now = Utc::now();
        let leads: Vec<Lead> = batch
            .into_iter()
            .map(|n| Lead {
                lead_id: Uuid::new_v4().to_string(),
                name: n.name,
                phone: ident::digits_only(&n.phone),
                category: n.category,
                status: LeadStatus::Pending,
                assigned_to: None,
                created_at: now,
            })
            .collect();
        let ids: Vec<EntityId> = leads.iter().map(|l| l.lead_id.clone()).collect();

        self.store.insert_leads(&leads)?;
        match target {
            BatchTarget::GeneralPool => {
                self.append_activity(
                    "engine",
                    &DeskEvent::BatchAssigned {
                        mode: "general_pool".into(),
                        target: None,
                        requested: ids.len(),
                        claimed: 0,
                    },
                );
            }
            other => {
                self.assign_batch(&ids, &other)?;
            }
        }
        Ok(ids)
    }

    /// Move every pending lead in the source operator's queue to the
    /// destination. Called leads keep their historical owner.
    pub fn transfer_queue(&self, source: &str, destination: &str) -> DeskResult<usize> {
        distribution::validate_transfer(source, destination)?;
        let snap = self.snapshot();
        let dest = snap
            .find_operator(destination)
            .ok_or_else(|| DeskError::OperatorNotFound {
                operator_id: destination.to_string(),
            })?;
        let queue = snap.operator_queue(source);
        let plan = distribution::direct_plan(&queue, &dest.operator_id);
        let moved = self.store.assign_leads_cas(&plan)?;
        self.append_activity(
            "engine",
            &DeskEvent::QueueTransferred {
                source: source.to_string(),
                destination: dest.operator_id.clone(),
                moved,
            },
        );
        Ok(moved)
    }

    /// Return every pending lead an operator owns to the general pool.
    /// The orphan-the-queue primitive operator removal requires.
    pub fn release_queue(&self, operator_id: &str) -> DeskResult<usize> {
        if ident::canonical_key(operator_id).is_empty() {
            return Err(DeskError::InvalidOperator {
                reason: "identity canonicalizes to empty".into(),
            });
        }
        let snap = self.snapshot();
        let queue = snap.operator_queue(operator_id);
        let plan = distribution::release_plan(&queue);
        let released = self.store.assign_leads_cas(&plan)?;
        self.append_activity(
            "engine",
            &DeskEvent::QueueReleased {
                operator_id: operator_id.to_string(),
                released,
            },
        );
        Ok(released)
    }

    // ── Operator lifecycle ─────────────────────────────────────

    /// Register a new operator. New operators start offline; an admin
    /// toggles them online when they take the desk.
    pub fn register_operator(
        &self,
        operator_id: &str,
        display_name: &str,
        role: Role,
    ) -> DeskResult<()> {
        if ident::canonical_key(operator_id).is_empty() {
            return Err(DeskError::InvalidOperator {
                reason: "identity canonicalizes to empty".into(),
            });
        }
        let snap = self.snapshot();
        if snap.find_operator(operator_id).is_some() {
            return Err(DeskError::DuplicateOperator {
                operator_id: operator_id.to_string(),
            });
        }
        self.store.insert_operator(&Operator {
            operator_id: operator_id.to_string(),
            display_name: display_name.to_string(),
            role,
            availability: Availability::Offline,
            registered_at: Utc::now(),
        })?;
        self.append_activity(
            "engine",
            &DeskEvent::OperatorRegistered {
                operator_id: operator_id.to_string(),
                role: role.as_str().into(),
            },
        );
        Ok(())
    }

    pub fn set_availability(
        &self,
        operator_id: &str,
        availability: Availability,
    ) -> DeskResult<()> {
        let snap = self.snapshot();
        let op = snap
            .find_operator(operator_id)
            .ok_or_else(|| DeskError::OperatorNotFound {
                operator_id: operator_id.to_string(),
            })?;
        self.store
            .set_operator_availability(&op.operator_id, availability)?;
        self.append_activity(
            "engine",
            &DeskEvent::OperatorUpdated {
                operator_id: op.operator_id.clone(),
                field: "availability".into(),
                value: availability.as_str().into(),
            },
        );
        Ok(())
    }

    /// Role promotion: agent -> admin.
    pub fn promote_operator(&self, operator_id: &str) -> DeskResult<()> {
        let snap = self.snapshot();
        let op = snap
            .find_operator(operator_id)
            .ok_or_else(|| DeskError::OperatorNotFound {
                operator_id: operator_id.to_string(),
            })?;
        self.store.set_operator_role(&op.operator_id, Role::Admin)?;
        self.append_activity(
            "engine",
            &DeskEvent::OperatorUpdated {
                operator_id: op.operator_id.clone(),
                field: "role".into(),
                value: Role::Admin.as_str().into(),
            },
        );
        Ok(())
    }

    /// Remove an operator. Refused while the operator still owns
    /// pending leads — transfer or release the queue first. Called
    /// leads keep their historical `assigned_to`.
    pub fn remove_operator(&self, operator_id: &str) -> DeskResult<()> {
        let snap = self.snapshot();
        let op = snap
            .find_operator(operator_id)
            .ok_or_else(|| DeskError::OperatorNotFound {
                operator_id: operator_id.to_string(),
            })?;
        let owned = snap.operator_queue(&op.operator_id).len();
        if owned > 0 {
            return Err(DeskError::OperatorOwnsLeads {
                operator_id: op.operator_id.clone(),
                count: owned,
            });
        }
        self.store.delete_operator(&op.operator_id)?;
        self.append_activity(
            "engine",
            &DeskEvent::OperatorRemoved {
                operator_id: op.operator_id.clone(),
            },
        );
        Ok(())
    }

    // ── Call sessions ──────────────────────────────────────────

    /// Idle -> CarrierSelectionPending: the operator picks a lead from
    /// their own queue. No side effects.
    pub fn begin_session(&self, operator_id: &str, lead_id: &str) -> DeskResult<()> {
        let snap = self.snapshot();
        let op = snap
            .find_operator(operator_id)
            .ok_or_else(|| DeskError::OperatorNotFound {
                operator_id: operator_id.to_string(),
            })?;
        let lead = snap
            .find_lead(lead_id)
            .ok_or_else(|| DeskError::LeadNotFound {
                lead_id: lead_id.to_string(),
            })?;
        let in_queue = lead.status == LeadStatus::Pending
            && ident::canonical_opt(lead.assigned_to.as_deref())
                == ident::canonical_key(&op.operator_id);
        if !in_queue {
            return Err(DeskError::LeadNotInQueue {
                lead_id: lead_id.to_string(),
                operator_id: operator_id.to_string(),
            });
        }
        self.sessions.begin(&op.operator_id, &lead.lead_id, &lead.phone)
    }

    /// CarrierSelectionPending -> Dialing. Hands prefix + digits to
    /// the device dialer (fire-and-forget) and returns the dialed
    /// string.
    pub fn select_carrier(&self, operator_id: &str, carrier_id: &str) -> DeskResult<String> {
        let carrier =
            self.config
                .find_carrier(carrier_id)
                .ok_or_else(|| DeskError::UnknownCarrier {
                    carrier_id: carrier_id.to_string(),
                })?;
        let dialed = self
            .sessions
            .select_carrier(operator_id, &carrier.prefix, Utc::now())?;
        self.dialer.dial(&dialed);
        Ok(dialed)
    }

    /// Dialing -> AwaitingOutcome: the operator is back in the
    /// application.
    pub fn return_from_dialer(&self, operator_id: &str) -> DeskResult<()> {
        self.sessions.return_from_dialer(operator_id)
    }

    /// AwaitingOutcome -> logged. The call record write and the lead's
    /// `called` flip commit together; only a confirmed commit ends the
    /// session. On failure the session stays AwaitingOutcome for
    /// retry.
    pub fn log_outcome(
        &self,
        operator_id: &str,
        outcome: CallOutcome,
        recording_ref: Option<String>,
    ) -> DeskResult<CallRecord> {
        let now = Utc::now();
        let pending = self.sessions.pending_outcome(operator_id, now)?;
        let record = CallRecord {
            record_id: Uuid::new_v4().to_string(),
            lead_id: pending.lead_id,
            operator_id: pending.operator_id.clone(),
            outcome,
            duration_secs: pending.duration_secs,
            logged_at: now,
            recording_ref,
        };
        self.store.log_call(&record)?;
        self.sessions.finish(operator_id);
        self.append_activity(
            &pending.operator_id,
            &DeskEvent::CallLogged {
                record_id: record.record_id.clone(),
                lead_id: record.lead_id.clone(),
                operator_id: record.operator_id.clone(),
                outcome: outcome.as_str().into(),
                duration_secs: record.duration_secs,
            },
        );
        Ok(record)
    }

    /// Any live phase -> discarded. No store writes; the lead stays
    /// pending.
    pub fn discard_session(&self, operator_id: &str) -> DeskResult<()> {
        self.sessions.discard(operator_id)?;
        Ok(())
    }

    pub fn session_view(&self, operator_id: &str) -> Option<SessionView> {
        self.sessions.view(operator_id)
    }

    // ── Internals ──────────────────────────────────────────────

    /// Best effort: a failed audit append never fails the operation
    /// that already committed.
    fn append_activity(&self, actor: &str, event: &DeskEvent) {
        let payload = match serde_json::to_string(event) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("activity serialization failed: {e}");
                return;
            }
        };
        let entry = ActivityEntry {
            entry_id: Uuid::new_v4().to_string(),
            actor: actor.to_string(),
            event_type: event_type_name(event).to_string(),
            payload,
            created_at: Utc::now().to_rfc3339(),
        };
        if let Err(e) = self.store.append_activity(&entry) {
            log::warn!("activity append failed: {e}");
        }
    }
}
