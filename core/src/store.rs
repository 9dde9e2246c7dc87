//! SQLite persistence layer.
//!
//! RULE: Only store.rs talks to the database. The engine and its
//! collaborators call store methods — they never execute SQL directly.
//!
//! The connection is a single serialized handle behind a mutex: every
//! operation acquires it, runs one statement or one transaction, and
//! releases it. Change notifications fire after the connection lock is
//! released, never while holding it.

use crate::{
    distribution::LeadAssignment,
    error::{DeskError, DeskResult},
    event::ActivityEntry,
    model::{
        Availability, CallOutcome, CallRecord, Collection, Lead, LeadStatus, Operator, Role,
    },
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::sync::{Mutex, MutexGuard};

type ChangeCallback = Box<dyn Fn(Collection) + Send + Sync>;

pub struct DeskStore {
    conn: Mutex<Connection>,
    path: Option<String>, // None for :memory:, Some(path) for file
    subscribers: Mutex<Vec<(Collection, ChangeCallback)>>,
}

impl DeskStore {
    pub fn open(path: &str) -> DeskResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )
        .map_err(|e| DeskError::SourceUnavailable {
            reason: e.to_string(),
        })?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_string()),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> DeskResult<Self> {
        let conn = Connection::open(":memory:").map_err(|e| DeskError::SourceUnavailable {
            reason: e.to_string(),
        })?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
            subscribers: Mutex::new(Vec::new()),
        })
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> DeskResult<()> {
        let conn = self.conn();
        conn.execute_batch(include_str!("../../migrations/001_foundation.sql"))?;
        conn.execute_batch(include_str!("../../migrations/002_activity_log.sql"))?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("store connection mutex poisoned")
    }

    // ── Change feed ────────────────────────────────────────────

    /// Register a callback invoked after every committed mutation of
    /// `collection`. The callback receives only the collection name —
    /// no payload guarantees beyond "something here changed".
    pub fn subscribe_changes<F>(&self, collection: Collection, callback: F)
    where
        F: Fn(Collection) + Send + Sync + 'static,
    {
        self.subscribers
            .lock()
            .expect("subscriber mutex poisoned")
            .push((collection, Box::new(callback)));
    }

    fn notify(&self, collection: Collection) {
        let subs = self.subscribers.lock().expect("subscriber mutex poisoned");
        for (wanted, callback) in subs.iter() {
            if *wanted == collection {
                callback(collection);
            }
        }
    }

    // ── Operators ──────────────────────────────────────────────

    /// Full operator collection in registration order — the exact
    /// sequence round-robin indexes into.
    pub fn fetch_operators(&self) -> DeskResult<Vec<Operator>> {
        let conn = self.conn();
        let mut stmt = prepare_or_missing(
            &conn,
            "SELECT operator_id, display_name, role, availability, registered_at
             FROM operator ORDER BY registered_at ASC, operator_id ASC",
            Collection::Operators,
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Operator {
                    operator_id: row.get(0)?,
                    display_name: row.get(1)?,
                    role: parse_role(2, &row.get::<_, String>(2)?)?,
                    availability: parse_availability(3, &row.get::<_, String>(3)?)?,
                    registered_at: parse_ts(4, &row.get::<_, String>(4)?)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn insert_operator(&self, op: &Operator) -> DeskResult<()> {
        {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO operator (operator_id, display_name, role, availability, registered_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    op.operator_id,
                    op.display_name,
                    op.role.as_str(),
                    op.availability.as_str(),
                    op.registered_at.to_rfc3339(),
                ],
            )?;
        }
        self.notify(Collection::Operators);
        Ok(())
    }

    pub fn set_operator_availability(
        &self,
        operator_id: &str,
        availability: Availability,
    ) -> DeskResult<usize> {
        let affected = {
            let conn = self.conn();
            conn.execute(
                "UPDATE operator SET availability = ?1 WHERE operator_id = ?2",
                params![availability.as_str(), operator_id],
            )?
        };
        self.notify(Collection::Operators);
        Ok(affected)
    }

    pub fn set_operator_role(&self, operator_id: &str, role: Role) -> DeskResult<usize> {
        let affected = {
            let conn = self.conn();
            conn.execute(
                "UPDATE operator SET role = ?1 WHERE operator_id = ?2",
                params![role.as_str(), operator_id],
            )?
        };
        self.notify(Collection::Operators);
        Ok(affected)
    }

    pub fn delete_operator(&self, operator_id: &str) -> DeskResult<usize> {
        let affected = {
            let conn = self.conn();
            conn.execute(
                "DELETE FROM operator WHERE operator_id = ?1",
                params![operator_id],
            )?
        };
        self.notify(Collection::Operators);
        Ok(affected)
    }

    // ── Leads ──────────────────────────────────────────────────

    /// Full lead collection, creation order (id as tiebreak).
    pub fn fetch_leads(&self) -> DeskResult<Vec<Lead>> {
        let conn = self.conn();
        let mut stmt = prepare_or_missing(
            &conn,
            "SELECT lead_id, name, phone, category, status, assigned_to, created_at
             FROM lead ORDER BY created_at ASC, lead_id ASC",
            Collection::Leads,
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Lead {
                    lead_id: row.get(0)?,
                    name: row.get(1)?,
                    phone: row.get(2)?,
                    category: row.get(3)?,
                    status: parse_status(4, &row.get::<_, String>(4)?)?,
                    assigned_to: row.get(5)?,
                    created_at: parse_ts(6, &row.get::<_, String>(6)?)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Insert a batch of leads in one transaction.
    pub fn insert_leads(&self, leads: &[Lead]) -> DeskResult<usize> {
        {
            let mut conn = self.conn();
            let tx = conn.transaction()?;
            for lead in leads {
                tx.execute(
                    "INSERT INTO lead (lead_id, name, phone, category, status, assigned_to, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        lead.lead_id,
                        lead.name,
                        lead.phone,
                        lead.category,
                        lead.status.as_str(),
                        lead.assigned_to,
                        lead.created_at.to_rfc3339(),
                    ],
                )?;
            }
            tx.commit()?;
        }
        self.notify(Collection::Leads);
        Ok(leads.len())
    }

    /// Apply a batch of conditional assignment updates in one
    /// transaction. Each update claims its lead only if the lead is
    /// still pending and `assigned_to` still holds the value read at
    /// selection time — a lead a concurrent operation already claimed
    /// simply does not match and is skipped. Returns the number of
    /// leads actually claimed.
    pub fn assign_leads_cas(&self, updates: &[LeadAssignment]) -> DeskResult<usize> {
        let claimed = {
            let mut conn = self.conn();
            let tx = conn.transaction()?;
            let mut claimed = 0usize;
            for u in updates {
                claimed += tx.execute(
                    "UPDATE lead SET assigned_to = ?1
                     WHERE lead_id = ?2
                       AND status = 'pending'
                       AND COALESCE(assigned_to, '') = COALESCE(?3, '')",
                    params![u.new_assignee, u.lead_id, u.expected_assignee],
                )?;
            }
            tx.commit()?;
            claimed
        };
        self.notify(Collection::Leads);
        Ok(claimed)
    }

    // ── Call records ───────────────────────────────────────────

    pub fn fetch_call_records(&self) -> DeskResult<Vec<CallRecord>> {
        let conn = self.conn();
        let mut stmt = prepare_or_missing(
            &conn,
            "SELECT record_id, lead_id, operator_id, outcome, duration_secs, logged_at, recording_ref
             FROM call_record ORDER BY logged_at ASC, record_id ASC",
            Collection::CallRecords,
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(CallRecord {
                    record_id: row.get(0)?,
                    lead_id: row.get(1)?,
                    operator_id: row.get(2)?,
                    outcome: parse_outcome(3, &row.get::<_, String>(3)?)?,
                    duration_secs: row.get(4)?,
                    logged_at: parse_ts(5, &row.get::<_, String>(5)?)?,
                    recording_ref: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Persist a call record and flip its lead to `called` in one
    /// transaction. Write-then-transition: if the insert fails nothing
    /// is committed and the lead stays pending.
    pub fn log_call(&self, record: &CallRecord) -> DeskResult<()> {
        {
            let mut conn = self.conn();
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO call_record
                 (record_id, lead_id, operator_id, outcome, duration_secs, logged_at, recording_ref)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.record_id,
                    record.lead_id,
                    record.operator_id,
                    record.outcome.as_str(),
                    record.duration_secs,
                    record.logged_at.to_rfc3339(),
                    record.recording_ref,
                ],
            )?;
            tx.execute(
                "UPDATE lead SET status = 'called' WHERE lead_id = ?1",
                params![record.lead_id],
            )?;
            tx.commit()?;
        }
        self.notify(Collection::CallRecords);
        self.notify(Collection::Leads);
        Ok(())
    }

    // ── Activity log ───────────────────────────────────────────

    /// Append-only; deliberately fires no change notification (the
    /// activity log is not a replicated collection).
    pub fn append_activity(&self, entry: &ActivityEntry) -> DeskResult<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO activity_log (entry_id, actor, event_type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.entry_id,
                entry.actor,
                entry.event_type,
                entry.payload,
                entry.created_at,
            ],
        )?;
        Ok(())
    }

    // ── Test / summary helpers ─────────────────────────────────

    pub fn activity_count(&self, event_type: &str) -> DeskResult<i64> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM activity_log WHERE event_type = ?1",
            params![event_type],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn activity_entries(&self) -> DeskResult<Vec<ActivityEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT entry_id, actor, event_type, payload, created_at
             FROM activity_log ORDER BY created_at ASC, entry_id ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ActivityEntry {
                    entry_id: row.get(0)?,
                    actor: row.get(1)?,
                    event_type: row.get(2)?,
                    payload: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Drop a collection's table outright. Used by tests to simulate a
    /// store that is missing a collection.
    pub fn drop_collection(&self, collection: Collection) -> DeskResult<()> {
        let conn = self.conn();
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", collection.table()))?;
        Ok(())
    }
}

// ── Row mapping helpers ────────────────────────────────────────

fn prepare_or_missing<'c>(
    conn: &'c Connection,
    sql: &str,
    collection: Collection,
) -> DeskResult<rusqlite::Statement<'c>> {
    match conn.prepare(sql) {
        Ok(stmt) => Ok(stmt),
        Err(e) if is_missing_table(&e) => Err(DeskError::MissingCollection { collection }),
        Err(e) => Err(e.into()),
    }
}

fn is_missing_table(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains("no such table"))
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn bad_enum(idx: usize, what: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("invalid {what}: '{value}'").into(),
    )
}

fn parse_role(idx: usize, raw: &str) -> rusqlite::Result<Role> {
    Role::parse(raw).ok_or_else(|| bad_enum(idx, "role", raw))
}

fn parse_availability(idx: usize, raw: &str) -> rusqlite::Result<Availability> {
    Availability::parse(raw).ok_or_else(|| bad_enum(idx, "availability", raw))
}

fn parse_status(idx: usize, raw: &str) -> rusqlite::Result<LeadStatus> {
    LeadStatus::parse(raw).ok_or_else(|| bad_enum(idx, "lead status", raw))
}

fn parse_outcome(idx: usize, raw: &str) -> rusqlite::Result<CallOutcome> {
    CallOutcome::parse(raw).ok_or_else(|| bad_enum(idx, "call outcome", raw))
}
