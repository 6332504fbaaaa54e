//! Identifiers, write stamps and clocks shared by every layer.
//!
//! - [`NodeId`] - Opaque node identifier (UUID v4)
//! - [`Stamp`] - Last-writer-wins ordering key `(seq, ts, client)`
//! - [`Clock`] - Wall-clock source, swappable for deterministic tests
//! - [`rank`] - Fractional sibling sort keys

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub mod rank;

pub type NodeId = Uuid;

pub type ClientId = u64;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

pub fn new_node_id() -> NodeId {
    Uuid::new_v4()
}

pub fn random_client_id() -> ClientId {
    Uuid::new_v4().as_u64_pair().0
}

/// Ordering key for last-writer-wins fields.
///
/// `seq` dominates; `ts` and `client` only break ties between logs that were
/// sequenced independently.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Stamp {
    pub seq: u64,
    pub ts: Timestamp,
    pub client: ClientId,
}

impl Stamp {
    pub const ZERO: Stamp = Stamp {
        seq: 0,
        ts: 0,
        client: 0,
    };

    /// True when a write carrying `self` replaces a field last written at `current`.
    #[inline]
    pub fn supersedes(&self, current: &Stamp) -> bool {
        self >= current
    }
}

pub trait Clock {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as Timestamp
    }
}

/// Hand-driven clock. Clones share the same time source.
#[derive(Debug, Default, Clone)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start)),
        }
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}
