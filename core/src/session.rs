//! Call session state machine.
//!
//! One session per operator, keyed by canonical operator key:
//!
//!   Idle -> CarrierSelectionPending -> Dialing -> AwaitingOutcome
//!        -> (logged | discarded) -> Idle
//!
//! `Idle` is the absence of an entry; logged/discarded are exit
//! transitions, not stored states. The dial handoff is one-way — the
//! external dialer gives no completion signal, so Dialing ends only
//! when the operator returns to the application.
//!
//! Persistence ordering is owned by the engine: a session leaves
//! AwaitingOutcome only after the call record write is confirmed
//! (pending_outcome / finish are separate steps for exactly that
//! reason). On a failed write the session stays put for retry.

use crate::{
    error::{DeskError, DeskResult},
    ident,
    model::EntityId,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// Device dialer handoff. Fire-and-forget: no completion signal is
/// ever observed.
pub trait Dialer: Send + Sync {
    fn dial(&self, number: &str);
}

/// Default dialer: logs the handoff and nothing else.
pub struct LogDialer;

impl Dialer for LogDialer {
    fn dial(&self, number: &str) {
        log::info!("dialing {number}");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    CarrierSelectionPending,
    Dialing,
    AwaitingOutcome,
}

impl SessionPhase {
    pub fn name(&self) -> &'static str {
        match self {
            SessionPhase::CarrierSelectionPending => "carrier_selection_pending",
            SessionPhase::Dialing                 => "dialing",
            SessionPhase::AwaitingOutcome         => "awaiting_outcome",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallSession {
    pub operator_id: EntityId,
    pub lead_id:     EntityId,
    pub phone:       String,
    pub phase:       SessionPhase,
    pub started_at:  Option<DateTime<Utc>>,
}

/// Read-only view for dashboards and the runner.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionView {
    pub operator_id: EntityId,
    pub lead_id:     EntityId,
    pub phase:       &'static str,
}

/// An outcome ready to be persisted. Produced by `pending_outcome`
/// without leaving AwaitingOutcome.
#[derive(Debug, Clone)]
pub struct PendingCall {
    pub operator_id:   EntityId,
    pub lead_id:       EntityId,
    pub duration_secs: i64,
}

pub struct SessionManager {
    sessions: Mutex<HashMap<String, CallSession>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CallSession>> {
        self.sessions.lock().expect("session mutex poisoned")
    }

    fn key(operator_id: &str) -> String {
        ident::canonical_key(operator_id)
    }

    /// Idle -> CarrierSelectionPending. No side effects.
    pub fn begin(&self, operator_id: &str, lead_id: &str, phone: &str) -> DeskResult<()> {
        let key = Self::key(operator_id);
        let mut sessions = self.lock();
        if sessions.contains_key(&key) {
            return Err(DeskError::SessionAlreadyActive {
                operator_id: operator_id.to_string(),
            });
        }
        sessions.insert(
            key,
            CallSession {
                operator_id: operator_id.to_string(),
                lead_id: lead_id.to_string(),
                phone: phone.to_string(),
                phase: SessionPhase::CarrierSelectionPending,
                started_at: None,
            },
        );
        Ok(())
    }

    /// CarrierSelectionPending -> Dialing. Records the start timestamp
    /// and returns the string to hand to the device dialer:
    /// prefix + digits-only phone.
    pub fn select_carrier(
        &self,
        operator_id: &str,
        prefix: &str,
        now: DateTime<Utc>,
    ) -> DeskResult<String> {
        let key = Self::key(operator_id);
        let mut sessions = self.lock();
        let session = sessions
            .get_mut(&key)
            .ok_or_else(|| DeskError::NoActiveSession {
                operator_id: operator_id.to_string(),
            })?;
        expect_phase(session, SessionPhase::CarrierSelectionPending)?;
        session.phase = SessionPhase::Dialing;
        session.started_at = Some(now);
        Ok(format!("{prefix}{}", ident::digits_only(&session.phone)))
    }

    /// Dialing -> AwaitingOutcome. Implicit call-ended: the operator
    /// is back in the application.
    pub fn return_from_dialer(&self, operator_id: &str) -> DeskResult<()> {
        let key = Self::key(operator_id);
        let mut sessions = self.lock();
        let session = sessions
            .get_mut(&key)
            .ok_or_else(|| DeskError::NoActiveSession {
                operator_id: operator_id.to_string(),
            })?;
        expect_phase(session, SessionPhase::Dialing)?;
        session.phase = SessionPhase::AwaitingOutcome;
        Ok(())
    }

    /// Peek at an AwaitingOutcome session and compute the call
    /// duration (whole seconds, floored, clamped at zero). The session
    /// itself is untouched — it leaves AwaitingOutcome only via
    /// `finish` after the write is confirmed.
    pub fn pending_outcome(&self, operator_id: &str, now: DateTime<Utc>) -> DeskResult<PendingCall> {
        let key = Self::key(operator_id);
        let sessions = self.lock();
        let session = sessions
            .get(&key)
            .ok_or_else(|| DeskError::NoActiveSession {
                operator_id: operator_id.to_string(),
            })?;
        expect_phase(session, SessionPhase::AwaitingOutcome)?;
        let started = session.started_at.unwrap_or(now);
        Ok(PendingCall {
            operator_id: session.operator_id.clone(),
            lead_id: session.lead_id.clone(),
            duration_secs: (now - started).num_seconds().max(0),
        })
    }

    /// AwaitingOutcome -> logged -> Idle. Call only after the call
    /// record write has been confirmed.
    pub fn finish(&self, operator_id: &str) {
        self.lock().remove(&Self::key(operator_id));
    }

    /// Any live phase -> discarded -> Idle. No store writes; the lead
    /// stays pending.
    pub fn discard(&self, operator_id: &str) -> DeskResult<CallSession> {
        self.lock()
            .remove(&Self::key(operator_id))
            .ok_or_else(|| DeskError::NoActiveSession {
                operator_id: operator_id.to_string(),
            })
    }

    pub fn view(&self, operator_id: &str) -> Option<SessionView> {
        self.lock().get(&Self::key(operator_id)).map(|s| SessionView {
            operator_id: s.operator_id.clone(),
            lead_id: s.lead_id.clone(),
            phase: s.phase.name(),
        })
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

fn expect_phase(session: &CallSession, expected: SessionPhase) -> DeskResult<()> {
    if session.phase != expected {
        return Err(DeskError::SessionState {
            expected: expected.name(),
            actual: session.phase.name(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_session_per_operator_by_canonical_key() {
        let mgr = SessionManager::new();
        mgr.begin("OP-1", "l1", "555-0100").unwrap();
        // Same operator under different formatting.
        let err = mgr.begin("op_1", "l2", "555-0101").unwrap_err();
        assert!(matches!(err, DeskError::SessionAlreadyActive { .. }));
        // A different operator is unaffected.
        mgr.begin("op-2", "l2", "555-0101").unwrap();
    }

    #[test]
    fn transitions_enforce_phase_order() {
        let mgr = SessionManager::new();
        mgr.begin("op-1", "l1", "555-0100").unwrap();

        // Cannot log or return before dialing.
        assert!(mgr.return_from_dialer("op-1").is_err());
        assert!(mgr.pending_outcome("op-1", Utc::now()).is_err());

        let dialed = mgr.select_carrier("op-1", "1801", Utc::now()).unwrap();
        assert_eq!(dialed, "18015550100");

        mgr.return_from_dialer("op-1").unwrap();
        let pending = mgr.pending_outcome("op-1", Utc::now()).unwrap();
        assert_eq!(pending.lead_id, "l1");
        assert!(pending.duration_secs >= 0);

        // Still AwaitingOutcome until finish.
        assert!(mgr.pending_outcome("op-1", Utc::now()).is_ok());
        mgr.finish("op-1");
        assert!(mgr.view("op-1").is_none());
    }

    #[test]
    fn discard_works_from_any_live_phase() {
        let mgr = SessionManager::new();
        mgr.begin("op-1", "l1", "555-0100").unwrap();
        mgr.select_carrier("op-1", "", Utc::now()).unwrap();
        // Abandoned mid-dial, without ever returning.
        mgr.discard("op-1").unwrap();
        assert!(mgr.view("op-1").is_none());
        assert!(matches!(
            mgr.discard("op-1").unwrap_err(),
            DeskError::NoActiveSession { .. }
        ));
    }
}
