//! strata-oplog: an append-only operation log for hierarchical outlines.
//!
//! Every change to the outline tree is recorded as an immutable, sequenced
//! [`Operation`]. The current tree is never mutated directly; it is folded
//! from the log (optionally seeded by a [`Snapshot`]). The crate provides:
//!
//! - **Rank keys** - base-36 fractional sort keys for sibling order
//! - **Operation model** - the closed set of tree mutations
//! - **Reducer** - deterministic `apply_one` / `replay`
//! - **History** - undo/redo through compensating operations
//! - **Session** - the application-facing API tying log, store and history together
//! - **Storage** - crash-safe file-backed log and snapshots (optional)
//!
//! # Quick Start
//!
//! ```rust
//! use strata_oplog::{MemoryStore, Session, SessionConfig};
//!
//! let mut session = Session::init(MemoryStore::new(), SessionConfig::default()).unwrap();
//! let a = session.create_node(None, None, "Groceries").unwrap();
//! let b = session.create_node(None, Some(a), "Chores").unwrap();
//! session.edit_text(b, "Chores for Sunday").unwrap();
//! session.flush_pending_text().unwrap();
//!
//! assert!(session.undo().unwrap());
//! assert_eq!(session.state().get(b).unwrap().text, "Chores");
//! ```
//!
//! # Features
//!
//! - `storage` - Enables the crash-safe [`FileStore`]
//! - `cli` - Builds the `strata` command-line front end (requires `storage`)

// Identifiers, stamps, clocks and rank keys
pub mod core;

// Operation model
pub mod op;

// Materialized tree and the reducer
pub mod tree;

// Undo/redo through compensating operations
pub mod history;

// Log/snapshot store contract and implementations
pub mod store;

// Application-facing session
pub mod session;

// Re-export core types
pub use crate::core::rank::{RankError, RankKey};
pub use crate::core::{Clock, ClientId, ManualClock, NodeId, Stamp, SystemClock, Timestamp};

// Re-export operation types
pub use op::{CreateNode, OpKind, OpType, Operation, Sequencer};

// Re-export tree types
pub use tree::reducer::{Anomaly, ApplyOutcome, ReplayReport, apply_one, replay};
pub use tree::{Node, OutlineEntry, Snapshot, StatusDef, StatusId, StatusList, TreeState};

// Re-export history types
pub use history::{Change, Field, FieldValue, History, HistoryEntry};

// Re-export store types
pub use store::{MemoryStore, OpStore, StoreError};

// Re-export session types
pub use session::{ChangeEvent, ChangeOrigin, Session, SessionConfig, SessionError};

// Re-export storage types (feature-gated)
#[cfg(feature = "storage")]
pub use store::file::FileStore;
