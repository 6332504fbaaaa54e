//! Application-facing session over one document.
//!
//! A [`Session`] owns the materialized tree, the undo/redo history and the
//! store. Every change goes through [`Session::submit`] (or one of the
//! convenience commands built on it): the operation is stamped, applied to
//! memory, recorded for undo, queued in the persistence outbox and then
//! appended to the store in order.
//!
//! Text edits are debounced. [`Session::edit_text`] only updates an in-memory
//! pending buffer; the `updateText` operation is produced when the burst is
//! flushed, either explicitly, after the idle delay, or implicitly before any
//! other operation is submitted.

use crate::core::rank::RankError;
use crate::core::{ClientId, Clock, NodeId, SystemClock, Timestamp, random_client_id};
use crate::history::{Change, Field, FieldValue, History, HistoryEntry};
use crate::op::{CreateNode, OpKind, OpType, Operation, Sequencer};
use crate::store::{OpStore, StoreError};
use crate::tree::reducer::{apply_one, replay};
use crate::tree::{Node, StatusList, TreeState};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Writer id stamped on every operation; random when absent.
    pub client_id: Option<ClientId>,
    /// Save a snapshot after this many applied operations. Zero disables it.
    pub snapshot_every: usize,
    /// Maximum number of undo (and redo) steps kept.
    pub history_depth: usize,
    /// A text burst idle for this long is committed by `flush_if_idle`, and
    /// the next keystroke starts a new undo step.
    pub text_idle_ms: u64,
    pub statuses: StatusList,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            snapshot_every: 500,
            history_depth: 200,
            text_idle_ms: 1500,
            statuses: StatusList::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("{kind} at seq {seq} applied but not persisted: {source}")]
    NotDurable {
        seq: u64,
        kind: OpType,
        source: StoreError,
    },
    #[error("unknown status {0:?}")]
    UnknownStatus(String),
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    #[error(transparent)]
    Rank(#[from] RankError),
    #[error("sequence numbers exhausted after seq {last_seq}")]
    SeqExhausted { last_seq: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOrigin {
    Edit,
    Undo,
    Redo,
}

/// Sent to subscribers after every operation that changed the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub version: u64,
    pub seq: u64,
    pub node_id: NodeId,
    pub op_type: OpType,
    pub origin: ChangeOrigin,
}

#[derive(Debug, Clone)]
struct PendingText {
    node_id: NodeId,
    before: String,
    latest: String,
    last_edit: Timestamp,
}

pub struct Session<S, C = SystemClock> {
    store: S,
    clock: C,
    config: SessionConfig,
    state: TreeState,
    sequencer: Sequencer,
    history: History,
    pending_text: Option<PendingText>,
    outbox: VecDeque<Operation>,
    version: u64,
    ops_since_snapshot: usize,
    subscribers: Vec<Sender<ChangeEvent>>,
}

impl<S: OpStore> Session<S, SystemClock> {
    /// Loads the latest snapshot and the operations after it, and replays
    /// them into the current tree.
    pub fn init(store: S, config: SessionConfig) -> Result<Self, SessionError> {
        Self::init_with_clock(store, config, SystemClock)
    }
}

impl<S: OpStore, C: Clock> Session<S, C> {
    pub fn init_with_clock(store: S, config: SessionConfig, clock: C) -> Result<Self, SessionError> {
        let (snapshot, unreadable) = match store.load_snapshot() {
            Ok(snapshot) => (snapshot, None),
            Err(StoreError::Corrupt(reason)) => {
                warn!(reason, "snapshot unreadable, rebuilding from the full log");
                (None, Some(reason))
            }
            Err(err) => return Err(err.into()),
        };
        let snapshot_seq = snapshot.as_ref().map(|s| s.seq_after);
        let mut base = match snapshot {
            Some(snapshot) => snapshot.into_state(),
            None => TreeState::new(config.statuses.clone()),
        };
        base.set_statuses(config.statuses.clone());

        let ops = store.load_ops_since(base.last_seq())?;
        // Without the snapshot the log has to reach back to the first op.
        if let Some(reason) = unreadable
            && ops.first().is_none_or(|op| op.seq != 1)
        {
            return Err(StoreError::Corrupt(reason).into());
        }
        let (state, report) = replay(base, &ops);
        if !report.is_clean() {
            warn!(
                skipped = report.skipped.len(),
                gaps = report.gaps,
                "log replayed with anomalies"
            );
        }

        if state.last_seq() == u64::MAX {
            warn!("log is at the last sequence number, no further edits can be recorded");
        }

        let client_id = config.client_id.unwrap_or_else(random_client_id);
        info!(
            client_id,
            snapshot_seq,
            trailing_ops = ops.len(),
            last_seq = state.last_seq(),
            nodes = state.len(),
            "session initialized"
        );

        Ok(Self {
            store,
            clock,
            sequencer: Sequencer::new(client_id, state.last_seq()),
            history: History::new(config.history_depth),
            config,
            state,
            pending_text: None,
            outbox: VecDeque::new(),
            version: 0,
            ops_since_snapshot: ops.len(),
            subscribers: Vec::new(),
        })
    }

    pub fn state(&self) -> &TreeState {
        &self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn client_id(&self) -> ClientId {
        self.sequencer.client_id()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo() || self.has_pending_change()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo() && !self.has_pending_change()
    }

    /// Bumped once for every operation that changed the tree.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn subscribe(&mut self) -> Receiver<ChangeEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Node and text of the uncommitted typing burst, if any.
    pub fn pending_text(&self) -> Option<(NodeId, &str)> {
        self.pending_text
            .as_ref()
            .map(|pending| (pending.node_id, pending.latest.as_str()))
    }

    /// Operations applied to memory but not yet appended to the store.
    pub fn pending_persistence(&self) -> usize {
        self.outbox.len()
    }

    /// Stamps, applies and persists one operation as its own undo step.
    ///
    /// Any pending text burst is committed first. On a store failure the
    /// operation stays applied and queued, and [`SessionError::NotDurable`]
    /// is returned.
    pub fn submit(&mut self, kind: OpKind) -> Result<Operation, SessionError> {
        self.validate(&kind)?;
        self.reserve(1)?;
        self.commit_pending_text()?;
        let (op, change) = self.apply_local(kind, ChangeOrigin::Edit)?;
        if let Some(change) = change {
            self.history.record(change.into());
        }
        self.persist()?;
        Ok(op)
    }

    /// Submits several operations as a single undo step.
    pub fn submit_batch(&mut self, kinds: Vec<OpKind>) -> Result<Vec<Operation>, SessionError> {
        for kind in &kinds {
            self.validate(kind)?;
        }
        self.reserve(kinds.len())?;
        self.commit_pending_text()?;
        let mut entry = HistoryEntry::new();
        let mut ops = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let (op, change) = self.apply_local(kind, ChangeOrigin::Edit)?;
            if let Some(change) = change {
                entry.push(change);
            }
            ops.push(op);
        }
        self.history.record(entry);
        self.persist()?;
        Ok(ops)
    }

    /// Reverts the most recent step. Returns `false` when there is nothing to undo.
    pub fn undo(&mut self) -> Result<bool, SessionError> {
        self.commit_pending_text()?;
        let Some(entry) = self.history.pop_undo() else {
            self.persist()?;
            return Ok(false);
        };
        let ops = entry.undo_ops();
        if let Err(err) = self.reserve(ops.len()) {
            self.history.push_undo(entry);
            return Err(err);
        }
        for kind in ops {
            self.apply_local(kind, ChangeOrigin::Undo)?;
        }
        self.history.push_redo(entry);
        self.persist()?;
        Ok(true)
    }

    /// Re-applies the most recently undone step. Returns `false` when there
    /// is nothing to redo.
    pub fn redo(&mut self) -> Result<bool, SessionError> {
        self.commit_pending_text()?;
        let Some(entry) = self.history.pop_redo() else {
            self.persist()?;
            return Ok(false);
        };
        let ops = entry.redo_ops();
        if let Err(err) = self.reserve(ops.len()) {
            self.history.push_redo(entry);
            return Err(err);
        }
        for kind in ops {
            self.apply_local(kind, ChangeOrigin::Redo)?;
        }
        self.history.push_undo(entry);
        self.persist()?;
        Ok(true)
    }

    /// Records a keystroke burst on `node_id`. Nothing is logged until the
    /// burst is flushed.
    pub fn edit_text(&mut self, node_id: NodeId, text: impl Into<String>) -> Result<(), SessionError> {
        self.require_node(node_id)?;
        let now = self.clock.now();
        let continues_burst = self.pending_text.as_ref().is_some_and(|pending| {
            pending.node_id == node_id && !self.idle_elapsed(pending, now)
        });

        if continues_burst {
            if let Some(pending) = self.pending_text.as_mut() {
                pending.latest = text.into();
                pending.last_edit = now;
            }
            return Ok(());
        }

        // A previous burst may be on this very node, so commit before reading.
        self.commit_pending_text()?;
        let before = self.require_node(node_id)?.text.clone();
        self.pending_text = Some(PendingText {
            node_id,
            before,
            latest: text.into(),
            last_edit: now,
        });
        self.persist()
    }

    /// Commits the pending text burst, if any, as one `updateText`.
    pub fn flush_pending_text(&mut self) -> Result<Option<Operation>, SessionError> {
        let op = self.commit_pending_text()?;
        self.persist()?;
        Ok(op)
    }

    /// Commits the pending text burst once it has been idle long enough.
    pub fn flush_if_idle(&mut self) -> Result<Option<Operation>, SessionError> {
        let now = self.clock.now();
        let idle = self
            .pending_text
            .as_ref()
            .is_some_and(|pending| self.idle_elapsed(pending, now));
        if !idle {
            return Ok(None);
        }
        self.flush_pending_text()
    }

    /// Appends every queued operation, oldest first. Stops at the first failure.
    pub fn retry_persistence(&mut self) -> Result<(), SessionError> {
        self.persist()
    }

    /// Saves a snapshot of the current tree. Pending text and queued
    /// operations are flushed first.
    pub fn snapshot_now(&mut self) -> Result<(), SessionError> {
        self.commit_pending_text()?;
        self.persist_outbox()?;
        self.save_snapshot()
    }

    /// Creates a node under `parent`, right after the sibling `after`, or as
    /// the first child when `after` is `None`.
    pub fn create_node(
        &mut self,
        parent: Option<NodeId>,
        after: Option<NodeId>,
        text: impl Into<String>,
    ) -> Result<NodeId, SessionError> {
        self.require_parent(parent)?;
        let pos = self.state.rank_after(parent, after)?;
        let create = CreateNode::new(parent, pos).with_text(text);
        let node_id = create.node_id;
        self.submit(create.into())?;
        Ok(node_id)
    }

    /// Creates a node as the last child of `parent`.
    pub fn append_node(
        &mut self,
        parent: Option<NodeId>,
        text: impl Into<String>,
    ) -> Result<NodeId, SessionError> {
        self.require_parent(parent)?;
        let pos = self.state.rank_last(parent)?;
        let create = CreateNode::new(parent, pos).with_text(text);
        let node_id = create.node_id;
        self.submit(create.into())?;
        Ok(node_id)
    }

    /// Moves `node_id` under `new_parent`, right after `after` (first when `None`).
    pub fn move_node(
        &mut self,
        node_id: NodeId,
        new_parent: Option<NodeId>,
        after: Option<NodeId>,
    ) -> Result<Operation, SessionError> {
        self.require_node(node_id)?;
        self.require_parent(new_parent)?;
        let pos = self.state.rank_after(new_parent, after)?;
        self.submit(OpKind::move_to(node_id, new_parent, pos))
    }

    pub fn delete_node(&mut self, node_id: NodeId) -> Result<Operation, SessionError> {
        self.require_node(node_id)?;
        self.submit(OpKind::tombstone(node_id))
    }

    pub fn restore_node(&mut self, node_id: NodeId) -> Result<Operation, SessionError> {
        self.require_node(node_id)?;
        self.submit(OpKind::restore(node_id))
    }

    pub fn set_status(
        &mut self,
        node_id: NodeId,
        status: impl Into<String>,
    ) -> Result<Operation, SessionError> {
        self.require_node(node_id)?;
        self.submit(OpKind::set_status(node_id, status))
    }

    pub fn toggle_collapsed(&mut self, node_id: NodeId) -> Result<Operation, SessionError> {
        let collapsed = self.require_node(node_id)?.collapsed;
        self.submit(OpKind::ToggleCollapsed {
            node_id,
            collapsed: !collapsed,
        })
    }

    pub fn add_tag(&mut self, node_id: NodeId, tag: impl Into<String>) -> Result<Operation, SessionError> {
        self.require_node(node_id)?;
        self.submit(OpKind::add_tag(node_id, tag))
    }

    pub fn remove_tag(
        &mut self,
        node_id: NodeId,
        tag: impl Into<String>,
    ) -> Result<Operation, SessionError> {
        self.require_node(node_id)?;
        self.submit(OpKind::remove_tag(node_id, tag))
    }

    pub fn set_due_date(
        &mut self,
        node_id: NodeId,
        due_date: Option<Timestamp>,
    ) -> Result<Operation, SessionError> {
        self.require_node(node_id)?;
        self.submit(OpKind::SetDueDate { node_id, due_date })
    }

    fn require_node(&self, node_id: NodeId) -> Result<&Node, SessionError> {
        self.state
            .get(node_id)
            .ok_or(SessionError::UnknownNode(node_id))
    }

    fn require_parent(&self, parent: Option<NodeId>) -> Result<(), SessionError> {
        match parent {
            Some(parent) => self.require_node(parent).map(|_| ()),
            None => Ok(()),
        }
    }

    fn validate(&self, kind: &OpKind) -> Result<(), SessionError> {
        let status = match kind {
            OpKind::SetStatus { status, .. } => Some(status),
            OpKind::Create(create) => create.status.as_ref(),
            _ => None,
        };
        match status {
            Some(status) if !self.state.statuses().contains(status) => {
                Err(SessionError::UnknownStatus(status.clone()))
            }
            _ => Ok(()),
        }
    }

    /// Fails unless `count` more operations, plus any pending text commit,
    /// can still be numbered.
    fn reserve(&self, count: usize) -> Result<(), SessionError> {
        let needed = count as u64 + u64::from(self.has_pending_change());
        if self.sequencer.remaining() < needed {
            return Err(SessionError::SeqExhausted {
                last_seq: self.sequencer.last_assigned(),
            });
        }
        Ok(())
    }

    fn has_pending_change(&self) -> bool {
        self.pending_text
            .as_ref()
            .is_some_and(|pending| pending.latest != pending.before)
    }

    fn idle_elapsed(&self, pending: &PendingText, now: Timestamp) -> bool {
        now.saturating_sub(pending.last_edit) >= self.config.text_idle_ms as i64
    }

    /// Turns the pending burst into an `updateText` and an undo step.
    /// Persistence is left to the caller.
    fn commit_pending_text(&mut self) -> Result<Option<Operation>, SessionError> {
        let Some(pending) = self.pending_text.take() else {
            return Ok(None);
        };
        if pending.latest == pending.before {
            return Ok(None);
        }
        if let Err(err) = self.reserve(1) {
            self.pending_text = Some(pending);
            return Err(err);
        }
        let kind = OpKind::update_text(pending.node_id, pending.latest.clone());
        let (op, _) = self.apply_local(kind, ChangeOrigin::Edit)?;
        // The step spans the whole burst, not just the last write.
        if let Some(change) = Change::new(
            pending.node_id,
            FieldValue::Text(pending.before),
            FieldValue::Text(pending.latest),
        ) {
            self.history.record(change.into());
        }
        debug!(seq = op.seq, node = %pending.node_id, "committed text burst");
        Ok(Some(op))
    }

    fn apply_local(
        &mut self,
        kind: OpKind,
        origin: ChangeOrigin,
    ) -> Result<(Operation, Option<Change>), SessionError> {
        let node_id = kind.node_id();
        let field = Field::touched_by(&kind);
        let before = field.capture(&self.state, node_id);

        let op = self
            .sequencer
            .stamp(kind, self.clock.now())
            .ok_or(SessionError::SeqExhausted {
                last_seq: self.sequencer.last_assigned(),
            })?;
        let outcome = apply_one(&mut self.state, &op);
        let after = field.capture(&self.state, node_id);

        if outcome.changed() {
            self.version += 1;
            let event = ChangeEvent {
                version: self.version,
                seq: op.seq,
                node_id,
                op_type: op.op_type(),
                origin,
            };
            self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
        self.outbox.push_back(op.clone());
        self.ops_since_snapshot += 1;

        let change = match (before, after) {
            (Some(before), Some(after)) => Change::new(node_id, before, after),
            _ => None,
        };
        Ok((op, change))
    }

    fn persist(&mut self) -> Result<(), SessionError> {
        self.persist_outbox()?;
        if self.config.snapshot_every > 0 && self.ops_since_snapshot >= self.config.snapshot_every {
            if let Err(err) = self.save_snapshot() {
                warn!(error = %err, "periodic snapshot failed");
            }
        }
        Ok(())
    }

    fn persist_outbox(&mut self) -> Result<(), SessionError> {
        while let Some(op) = self.outbox.front() {
            if let Err(source) = self.store.append_op(op) {
                warn!(
                    seq = op.seq,
                    kind = %op.op_type(),
                    queued = self.outbox.len(),
                    error = %source,
                    "append failed, operation kept in outbox"
                );
                return Err(SessionError::NotDurable {
                    seq: op.seq,
                    kind: op.op_type(),
                    source,
                });
            }
            self.outbox.pop_front();
        }
        Ok(())
    }

    fn save_snapshot(&mut self) -> Result<(), SessionError> {
        let snapshot = self.state.snapshot();
        self.store.save_snapshot(&snapshot)?;
        info!(seq_after = snapshot.seq_after, nodes = self.state.len(), "snapshot saved");
        self.ops_since_snapshot = 0;
        Ok(())
    }
}

impl<S, C> std::fmt::Debug for Session<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("client_id", &self.sequencer.client_id())
            .field("last_seq", &self.state.last_seq())
            .field("nodes", &self.state.len())
            .field("version", &self.version)
            .field("outbox", &self.outbox.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ManualClock;
    use crate::store::MemoryStore;

    fn session() -> (Session<MemoryStore, ManualClock>, ManualClock) {
        let clock = ManualClock::new(1_000);
        let config = SessionConfig {
            client_id: Some(7),
            ..SessionConfig::default()
        };
        let session = Session::init_with_clock(MemoryStore::new(), config, clock.clone()).unwrap();
        (session, clock)
    }

    fn text(session: &Session<MemoryStore, ManualClock>, node: NodeId) -> &str {
        &session.state().get(node).unwrap().text
    }

    #[test]
    fn test_typing_burst_is_one_operation_and_one_undo_step() {
        let (mut session, clock) = session();
        let node = session.append_node(None, "").unwrap();
        let logged = session.store().ops().len();

        for partial in ["h", "he", "hel", "hell", "hello"] {
            session.edit_text(node, partial).unwrap();
            clock.advance(100);
        }
        assert_eq!(session.pending_text(), Some((node, "hello")));
        assert_eq!(text(&session, node), "");
        assert_eq!(session.store().ops().len(), logged);

        let op = session.flush_pending_text().unwrap().unwrap();
        assert_eq!(op.kind, OpKind::update_text(node, "hello"));
        assert_eq!(session.store().ops().len(), logged + 1);
        assert_eq!(text(&session, node), "hello");

        assert!(session.undo().unwrap());
        assert_eq!(text(&session, node), "");
    }

    #[test]
    fn test_idle_gap_splits_bursts() {
        let (mut session, clock) = session();
        let node = session.append_node(None, "").unwrap();

        session.edit_text(node, "one").unwrap();
        clock.advance(1_000);
        assert_eq!(session.flush_if_idle().unwrap(), None);
        clock.advance(600);
        assert!(session.flush_if_idle().unwrap().is_some());

        session.edit_text(node, "one two").unwrap();
        clock.advance(2_000);
        // Idle long enough that this keystroke starts a new burst.
        session.edit_text(node, "one two three").unwrap();
        session.flush_pending_text().unwrap();

        assert!(session.undo().unwrap());
        assert_eq!(text(&session, node), "one two");
        assert!(session.undo().unwrap());
        assert_eq!(text(&session, node), "one");
        assert!(session.undo().unwrap());
        assert_eq!(text(&session, node), "");
    }

    #[test]
    fn test_submit_flushes_pending_text_first() {
        let (mut session, _clock) = session();
        let a = session.append_node(None, "a").unwrap();
        let b = session.append_node(None, "b").unwrap();

        session.edit_text(a, "a edited").unwrap();
        let moved = session.move_node(a, Some(b), None).unwrap();

        let ops = session.store().ops();
        let update = &ops[ops.len() - 2];
        assert_eq!(update.kind, OpKind::update_text(a, "a edited"));
        assert!(update.seq < moved.seq);
        assert_eq!(session.pending_text(), None);
    }

    #[test]
    fn test_switching_nodes_commits_previous_burst() {
        let (mut session, _clock) = session();
        let a = session.append_node(None, "").unwrap();
        let b = session.append_node(None, "").unwrap();

        session.edit_text(a, "first").unwrap();
        session.edit_text(b, "second").unwrap();
        assert_eq!(text(&session, a), "first");
        assert_eq!(session.pending_text(), Some((b, "second")));
    }

    #[test]
    fn test_unchanged_burst_logs_nothing() {
        let (mut session, _clock) = session();
        let node = session.append_node(None, "same").unwrap();
        let logged = session.store().ops().len();
        session.edit_text(node, "other").unwrap();
        session.edit_text(node, "same").unwrap();
        assert_eq!(session.flush_pending_text().unwrap(), None);
        assert_eq!(session.store().ops().len(), logged);
    }

    #[test]
    fn test_edit_unknown_node_is_rejected() {
        let (mut session, _clock) = session();
        let ghost = crate::core::new_node_id();
        assert!(matches!(
            session.edit_text(ghost, "x"),
            Err(SessionError::UnknownNode(id)) if id == ghost
        ));
    }

    #[test]
    fn test_failed_append_keeps_state_and_queues() {
        let (mut session, _clock) = session();
        let node = session.append_node(None, "kept").unwrap();
        session.store_mut().set_offline(true);

        let err = session.add_tag(node, "urgent").unwrap_err();
        assert!(matches!(
            err,
            SessionError::NotDurable {
                kind: OpType::AddTag,
                ..
            }
        ));
        assert!(session.state().get(node).unwrap().has_tag("urgent"));
        assert_eq!(session.pending_persistence(), 1);

        // Later operations queue behind the failed one.
        assert!(session.set_status(node, "doing").is_err());
        assert_eq!(session.pending_persistence(), 2);

        session.store_mut().set_offline(false);
        session.retry_persistence().unwrap();
        assert_eq!(session.pending_persistence(), 0);

        let seqs: Vec<u64> = session.store().ops().iter().map(|op| op.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn test_unknown_status_rejected_before_apply() {
        let (mut session, _clock) = session();
        let node = session.append_node(None, "x").unwrap();
        let version = session.version();
        assert!(matches!(
            session.set_status(node, "blocked"),
            Err(SessionError::UnknownStatus(status)) if status == "blocked"
        ));
        assert_eq!(session.version(), version);
        assert_eq!(session.state().get(node).unwrap().status, "todo");
    }

    #[test]
    fn test_subscribers_see_every_change() {
        let (mut session, _clock) = session();
        let events = session.subscribe();
        let node = session.append_node(None, "x").unwrap();
        session.toggle_collapsed(node).unwrap();
        // No-op writes do not notify.
        session.remove_tag(node, "missing").unwrap();
        session.undo().unwrap();

        let received: Vec<ChangeEvent> = events.try_iter().collect();
        assert_eq!(received.len(), 3);
        assert_eq!(received[0].op_type, OpType::Create);
        assert_eq!(received[1].op_type, OpType::ToggleCollapsed);
        assert_eq!(received[2].origin, ChangeOrigin::Undo);
        assert_eq!(received[2].version, 3);
        assert_eq!(session.version(), 3);
        assert!(!session.state().get(node).unwrap().collapsed);
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let (mut session, _clock) = session();
        drop(session.subscribe());
        session.append_node(None, "x").unwrap();
        assert!(session.subscribers.is_empty());
    }

    #[test]
    fn test_snapshot_cadence() {
        let clock = ManualClock::new(0);
        let config = SessionConfig {
            snapshot_every: 3,
            ..SessionConfig::default()
        };
        let mut session = Session::init_with_clock(MemoryStore::new(), config, clock).unwrap();
        let node = session.append_node(None, "x").unwrap();
        session.add_tag(node, "a").unwrap();
        assert!(session.store().snapshot().is_none());

        session.add_tag(node, "b").unwrap();
        let snapshot = session.store().snapshot().unwrap();
        assert_eq!(snapshot.seq_after, 3);
        assert_eq!(&snapshot.state, session.state());
    }

    #[test]
    fn test_snapshot_now_flushes_first() {
        let (mut session, _clock) = session();
        let node = session.append_node(None, "").unwrap();
        session.edit_text(node, "typed").unwrap();
        session.snapshot_now().unwrap();

        let snapshot = session.store().snapshot().unwrap();
        assert_eq!(snapshot.seq_after, 2);
        assert_eq!(snapshot.state.get(node).unwrap().text, "typed");
    }

    #[test]
    fn test_init_replays_snapshot_and_tail() {
        let (mut session, _clock) = session();
        let a = session.append_node(None, "a").unwrap();
        session.snapshot_now().unwrap();
        let b = session.append_node(Some(a), "b").unwrap();
        session.set_due_date(b, Some(86_400_000)).unwrap();
        let expected = session.state().clone();

        let store = session.into_store();
        let reopened = Session::init(store, SessionConfig::default()).unwrap();
        assert_eq!(reopened.state(), &expected);

        let mut reopened = reopened;
        let c = reopened.append_node(None, "c").unwrap();
        let seq = reopened.store().ops().last().unwrap().seq;
        assert_eq!(seq, 4);
        assert!(reopened.state().contains(c));
    }

    #[test]
    fn test_exhausted_seq_space_refuses_new_edits() {
        let create = CreateNode::new(None, crate::core::rank::RankKey::initial()).with_text("last");
        let node = create.node_id;
        let store = MemoryStore::with_contents(
            vec![Operation::new(1, u64::MAX, 0, create.into())],
            None,
        );
        let mut session =
            Session::init_with_clock(store, SessionConfig::default(), ManualClock::new(0)).unwrap();
        assert_eq!(text(&session, node), "last");

        assert!(matches!(
            session.add_tag(node, "x"),
            Err(SessionError::SeqExhausted { last_seq: u64::MAX })
        ));
        assert!(!session.state().get(node).unwrap().has_tag("x"));
        assert_eq!(session.pending_persistence(), 0);

        // A typing burst stays pending instead of being numbered.
        session.edit_text(node, "typed").unwrap();
        assert!(session.flush_pending_text().is_err());
        assert_eq!(session.pending_text(), Some((node, "typed")));
        assert_eq!(session.store().ops().len(), 1);
    }

    #[test]
    fn test_batch_larger_than_remaining_seq_space_applies_nothing() {
        let create = CreateNode::new(None, crate::core::rank::RankKey::initial());
        let node = create.node_id;
        let store = MemoryStore::with_contents(
            vec![Operation::new(1, u64::MAX - 1, 0, create.into())],
            None,
        );
        let mut session = Session::init(store, SessionConfig::default()).unwrap();

        let err = session
            .submit_batch(vec![OpKind::add_tag(node, "a"), OpKind::add_tag(node, "b")])
            .unwrap_err();
        assert!(matches!(err, SessionError::SeqExhausted { .. }));
        assert!(session.state().get(node).unwrap().tags.is_empty());

        let op = session.add_tag(node, "a").unwrap();
        assert_eq!(op.seq, u64::MAX);
    }

    #[test]
    fn test_empty_stacks_return_false() {
        let (mut session, _clock) = session();
        assert!(!session.undo().unwrap());
        assert!(!session.redo().unwrap());
    }

    #[test]
    fn test_undo_commits_pending_burst_then_reverts_it() {
        let (mut session, _clock) = session();
        let node = session.append_node(None, "base").unwrap();
        session.edit_text(node, "base plus").unwrap();
        assert!(session.can_undo());

        assert!(session.undo().unwrap());
        assert_eq!(text(&session, node), "base");
        assert!(session.redo().unwrap());
        assert_eq!(text(&session, node), "base plus");
    }

    #[test]
    fn test_batch_is_one_undo_step() {
        let (mut session, _clock) = session();
        let a = session.append_node(None, "a").unwrap();
        let b = session.append_node(None, "b").unwrap();

        session
            .submit_batch(vec![OpKind::tombstone(a), OpKind::add_tag(b, "moved")])
            .unwrap();
        assert!(session.state().get(a).unwrap().deleted);
        assert!(session.state().get(b).unwrap().has_tag("moved"));

        assert!(session.undo().unwrap());
        assert!(!session.state().get(a).unwrap().deleted);
        assert!(!session.state().get(b).unwrap().has_tag("moved"));
    }

    #[test]
    fn test_new_action_clears_redo() {
        let (mut session, _clock) = session();
        let node = session.append_node(None, "x").unwrap();
        session.add_tag(node, "a").unwrap();
        session.undo().unwrap();
        assert!(session.can_redo());
        session.add_tag(node, "b").unwrap();
        assert!(!session.can_redo());
        assert!(!session.redo().unwrap());
    }

    #[test]
    fn test_create_node_after_sibling() {
        let (mut session, _clock) = session();
        let a = session.create_node(None, None, "a").unwrap();
        let b = session.create_node(None, Some(a), "b").unwrap();
        let c = session.create_node(None, Some(a), "c").unwrap();
        let first = session.create_node(None, None, "first").unwrap();

        let order: Vec<NodeId> = session.state().roots().iter().map(|n| n.id).collect();
        assert_eq!(order, vec![first, a, c, b]);
    }
}
