//! Operation model: the closed set of tree mutations.
//!
//! Operations are immutable once stamped. They carry only what is needed to
//! apply them forward; the "before" values needed for undo are captured by
//! the history layer, not stored here.

use crate::core::rank::RankKey;
use crate::core::{ClientId, NodeId, Stamp, Timestamp, new_node_id};
use crate::tree::StatusId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub op_id: Uuid,
    pub client_id: ClientId,
    pub seq: u64,
    pub ts: Timestamp,
    #[serde(flatten)]
    pub kind: OpKind,
}

impl Operation {
    pub fn new(client_id: ClientId, seq: u64, ts: Timestamp, kind: OpKind) -> Self {
        Self {
            op_id: Uuid::new_v4(),
            client_id,
            seq,
            ts,
            kind,
        }
    }

    pub fn stamp(&self) -> Stamp {
        Stamp {
            seq: self.seq,
            ts: self.ts,
            client: self.client_id,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.kind.node_id()
    }

    pub fn op_type(&self) -> OpType {
        self.kind.op_type()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OpKind {
    Create(CreateNode),
    UpdateText {
        node_id: NodeId,
        text: String,
    },
    Move {
        node_id: NodeId,
        new_parent_id: Option<NodeId>,
        new_pos: RankKey,
    },
    SetStatus {
        node_id: NodeId,
        status: StatusId,
    },
    /// Carries the resulting value, so replay never depends on the prior one.
    ToggleCollapsed {
        node_id: NodeId,
        collapsed: bool,
    },
    Tombstone {
        node_id: NodeId,
        /// Explicit deletion time; the op's own `ts` when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deleted_at: Option<Timestamp>,
    },
    Restore {
        node_id: NodeId,
    },
    AddTag {
        node_id: NodeId,
        tag: String,
    },
    RemoveTag {
        node_id: NodeId,
        tag: String,
    },
    SetDueDate {
        node_id: NodeId,
        due_date: Option<Timestamp>,
    },
}

impl OpKind {
    pub fn node_id(&self) -> NodeId {
        match self {
            Self::Create(create) => create.node_id,
            Self::UpdateText { node_id, .. }
            | Self::Move { node_id, .. }
            | Self::SetStatus { node_id, .. }
            | Self::ToggleCollapsed { node_id, .. }
            | Self::Tombstone { node_id, .. }
            | Self::Restore { node_id }
            | Self::AddTag { node_id, .. }
            | Self::RemoveTag { node_id, .. }
            | Self::SetDueDate { node_id, .. } => *node_id,
        }
    }

    pub fn op_type(&self) -> OpType {
        match self {
            Self::Create(_) => OpType::Create,
            Self::UpdateText { .. } => OpType::UpdateText,
            Self::Move { .. } => OpType::Move,
            Self::SetStatus { .. } => OpType::SetStatus,
            Self::ToggleCollapsed { .. } => OpType::ToggleCollapsed,
            Self::Tombstone { .. } => OpType::Tombstone,
            Self::Restore { .. } => OpType::Restore,
            Self::AddTag { .. } => OpType::AddTag,
            Self::RemoveTag { .. } => OpType::RemoveTag,
            Self::SetDueDate { .. } => OpType::SetDueDate,
        }
    }

    pub fn update_text(node_id: NodeId, text: impl Into<String>) -> Self {
        Self::UpdateText {
            node_id,
            text: text.into(),
        }
    }

    pub fn move_to(node_id: NodeId, new_parent_id: Option<NodeId>, new_pos: RankKey) -> Self {
        Self::Move {
            node_id,
            new_parent_id,
            new_pos,
        }
    }

    pub fn set_status(node_id: NodeId, status: impl Into<StatusId>) -> Self {
        Self::SetStatus {
            node_id,
            status: status.into(),
        }
    }

    pub fn tombstone(node_id: NodeId) -> Self {
        Self::Tombstone {
            node_id,
            deleted_at: None,
        }
    }

    pub fn restore(node_id: NodeId) -> Self {
        Self::Restore { node_id }
    }

    pub fn add_tag(node_id: NodeId, tag: impl Into<String>) -> Self {
        Self::AddTag {
            node_id,
            tag: tag.into(),
        }
    }

    pub fn remove_tag(node_id: NodeId, tag: impl Into<String>) -> Self {
        Self::RemoveTag {
            node_id,
            tag: tag.into(),
        }
    }
}

/// Payload of a `create` operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNode {
    pub node_id: NodeId,
    pub parent_id: Option<NodeId>,
    pub pos: RankKey,
    #[serde(default)]
    pub text: String,
    /// Resolved to the document's default status when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Timestamp>,
    #[serde(default)]
    pub collapsed: bool,
}

impl CreateNode {
    pub fn new(parent_id: Option<NodeId>, pos: RankKey) -> Self {
        Self {
            node_id: new_node_id(),
            parent_id,
            pos,
            text: String::new(),
            status: None,
            tags: Vec::new(),
            due_date: None,
            collapsed: false,
        }
    }

    pub fn with_id(mut self, node_id: NodeId) -> Self {
        self.node_id = node_id;
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_status(mut self, status: impl Into<StatusId>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_due_date(mut self, due_date: Timestamp) -> Self {
        self.due_date = Some(due_date);
        self
    }
}

impl From<CreateNode> for OpKind {
    fn from(create: CreateNode) -> Self {
        Self::Create(create)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OpType {
    Create,
    UpdateText,
    Move,
    SetStatus,
    ToggleCollapsed,
    Tombstone,
    Restore,
    AddTag,
    RemoveTag,
    SetDueDate,
}

impl OpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::UpdateText => "updateText",
            Self::Move => "move",
            Self::SetStatus => "setStatus",
            Self::ToggleCollapsed => "toggleCollapsed",
            Self::Tombstone => "tombstone",
            Self::Restore => "restore",
            Self::AddTag => "addTag",
            Self::RemoveTag => "removeTag",
            Self::SetDueDate => "setDueDate",
        }
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Assigns op ids, the writer's client id, sequence numbers and timestamps.
///
/// Sequence numbers come from an atomic counter so two stamping calls can
/// never observe the same `seq`, even from different threads. Once `u64::MAX`
/// has been handed out the sequencer is exhausted and stamps nothing more.
#[derive(Debug)]
pub struct Sequencer {
    client_id: ClientId,
    last_seq: AtomicU64,
}

impl Sequencer {
    /// `last_seq` is the highest sequence number already in the log.
    pub fn new(client_id: ClientId, last_seq: u64) -> Self {
        Self {
            client_id,
            last_seq: AtomicU64::new(last_seq),
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn last_assigned(&self) -> u64 {
        self.last_seq.load(Ordering::SeqCst)
    }

    /// How many more operations can be stamped.
    pub fn remaining(&self) -> u64 {
        u64::MAX - self.last_assigned()
    }

    /// `None` when the sequence space is used up.
    pub fn stamp(&self, kind: OpKind, ts: Timestamp) -> Option<Operation> {
        let previous = self
            .last_seq
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |seq| seq.checked_add(1))
            .ok()?;
        Some(Operation::new(self.client_id, previous + 1, ts, kind))
    }
}
