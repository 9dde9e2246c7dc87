//! dialdesk-core: the lead distribution and reconciliation engine.
//!
//! RULES:
//!   - Only store.rs talks SQL. Everything else goes through DeskStore.
//!   - Every operator/lead identity comparison routes through ident.rs.
//!   - All lead/operator mutation goes through the engine's operations
//!     (distribution, transfer, call logging, operator management) —
//!     never ad hoc field edits.
//!   - Every store mutation fires a change notification; every
//!     notification causes a full snapshot reload. No incremental sync.

pub mod config;
pub mod distribution;
pub mod engine;
pub mod error;
pub mod event;
pub mod ident;
pub mod model;
pub mod registry;
pub mod session;
pub mod store;
