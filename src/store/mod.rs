//! Log/snapshot store contract and an in-memory implementation.

use crate::op::Operation;
use crate::tree::Snapshot;
use std::io;

#[cfg(feature = "storage")]
pub mod file;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt store: {0}")]
    Corrupt(&'static str),
    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Durable home for the operation log and its snapshot.
///
/// Appends arrive in the order operations were applied and must be kept in
/// that order. `load_ops_since` returns operations with `seq` strictly
/// greater than the argument, ascending.
pub trait OpStore {
    fn append_op(&mut self, op: &Operation) -> Result<(), StoreError>;

    fn load_snapshot(&self) -> Result<Option<Snapshot>, StoreError>;

    fn load_ops_since(&self, seq: u64) -> Result<Vec<Operation>, StoreError>;

    fn save_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), StoreError>;
}

impl<S: OpStore + ?Sized> OpStore for Box<S> {
    fn append_op(&mut self, op: &Operation) -> Result<(), StoreError> {
        (**self).append_op(op)
    }

    fn load_snapshot(&self) -> Result<Option<Snapshot>, StoreError> {
        (**self).load_snapshot()
    }

    fn load_ops_since(&self, seq: u64) -> Result<Vec<Operation>, StoreError> {
        (**self).load_ops_since(seq)
    }

    fn save_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), StoreError> {
        (**self).save_snapshot(snapshot)
    }
}

/// Keeps everything in memory. Can be switched offline to exercise the
/// failure paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    ops: Vec<Operation>,
    snapshot: Option<Snapshot>,
    offline: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds `ops` and, optionally, a snapshot.
    pub fn with_contents(ops: Vec<Operation>, snapshot: Option<Snapshot>) -> Self {
        Self {
            ops,
            snapshot,
            offline: false,
        }
    }

    pub fn ops(&self) -> &[Operation] {
        &self.ops
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    /// While offline, appends and snapshot saves fail with
    /// [`StoreError::Unavailable`]; loads keep working.
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline {
            return Err(StoreError::Unavailable("memory store is offline".into()));
        }
        Ok(())
    }
}

impl OpStore for MemoryStore {
    fn append_op(&mut self, op: &Operation) -> Result<(), StoreError> {
        self.check_online()?;
        self.ops.push(op.clone());
        Ok(())
    }

    fn load_snapshot(&self) -> Result<Option<Snapshot>, StoreError> {
        Ok(self.snapshot.clone())
    }

    fn load_ops_since(&self, seq: u64) -> Result<Vec<Operation>, StoreError> {
        let mut ops: Vec<Operation> = self
            .ops
            .iter()
            .filter(|op| op.seq > seq)
            .cloned()
            .collect();
        ops.sort_by_key(|op| op.seq);
        Ok(ops)
    }

    fn save_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), StoreError> {
        self.check_online()?;
        self.snapshot = Some(snapshot.clone());
        Ok(())
    }
}
