//! Undo/redo through compensating operations.
//!
//! The log is never rewound. Before an action is applied, the value of every
//! field it touches is captured; after it is applied, the new value is
//! captured too. Undoing the action appends fresh operations that write the
//! "before" values back, redoing appends operations that write the "after"
//! values again. Both stacks are bounded.

use crate::core::rank::RankKey;
use crate::core::{NodeId, Timestamp};
use crate::op::OpKind;
use crate::tree::{StatusId, TreeState};
use std::collections::VecDeque;

/// One field of one node, as written by a single operation type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Text,
    /// Parent and position, which `move` writes jointly.
    Placement,
    Status,
    Collapsed,
    DueDate,
    /// Tombstone flag together with its timestamp. `create` counts as
    /// clearing it, since a node that does not exist yet reads as deleted.
    Deleted,
    Tag(String),
}

impl Field {
    pub fn touched_by(kind: &OpKind) -> Field {
        match kind {
            OpKind::Create(_) | OpKind::Tombstone { .. } | OpKind::Restore { .. } => {
                Field::Deleted
            }
            OpKind::UpdateText { .. } => Field::Text,
            OpKind::Move { .. } => Field::Placement,
            OpKind::SetStatus { .. } => Field::Status,
            OpKind::ToggleCollapsed { .. } => Field::Collapsed,
            OpKind::SetDueDate { .. } => Field::DueDate,
            OpKind::AddTag { tag, .. } | OpKind::RemoveTag { tag, .. } => Field::Tag(tag.clone()),
        }
    }

    /// Current value of this field on `node`.
    ///
    /// A missing node reads as deleted for [`Field::Deleted`] and as nothing
    /// for every other field.
    pub fn capture(&self, state: &TreeState, node: NodeId) -> Option<FieldValue> {
        let Some(current) = state.get(node) else {
            return match self {
                Field::Deleted => Some(FieldValue::Deleted {
                    deleted: true,
                    deleted_at: None,
                }),
                _ => None,
            };
        };
        let value = match self {
            Field::Text => FieldValue::Text(current.text.clone()),
            Field::Placement => FieldValue::Placement {
                parent_id: current.parent_id,
                pos: current.pos.clone(),
            },
            Field::Status => FieldValue::Status(current.status.clone()),
            Field::Collapsed => FieldValue::Collapsed(current.collapsed),
            Field::DueDate => FieldValue::DueDate(current.due_date),
            Field::Deleted => FieldValue::Deleted {
                deleted: current.deleted,
                deleted_at: current.deleted_at,
            },
            Field::Tag(tag) => FieldValue::Tag {
                tag: tag.clone(),
                present: current.has_tag(tag),
            },
        };
        Some(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Placement {
        parent_id: Option<NodeId>,
        pos: RankKey,
    },
    Status(StatusId),
    Collapsed(bool),
    DueDate(Option<Timestamp>),
    Deleted {
        deleted: bool,
        deleted_at: Option<Timestamp>,
    },
    Tag {
        tag: String,
        present: bool,
    },
}

impl FieldValue {
    /// Forward operation that writes this value back onto `node`.
    pub fn reinstate(&self, node_id: NodeId) -> OpKind {
        match self {
            FieldValue::Text(text) => OpKind::UpdateText {
                node_id,
                text: text.clone(),
            },
            FieldValue::Placement { parent_id, pos } => OpKind::Move {
                node_id,
                new_parent_id: *parent_id,
                new_pos: pos.clone(),
            },
            FieldValue::Status(status) => OpKind::SetStatus {
                node_id,
                status: status.clone(),
            },
            FieldValue::Collapsed(collapsed) => OpKind::ToggleCollapsed {
                node_id,
                collapsed: *collapsed,
            },
            FieldValue::DueDate(due_date) => OpKind::SetDueDate {
                node_id,
                due_date: *due_date,
            },
            FieldValue::Deleted {
                deleted: true,
                deleted_at,
            } => OpKind::Tombstone {
                node_id,
                deleted_at: *deleted_at,
            },
            FieldValue::Deleted { deleted: false, .. } => OpKind::Restore { node_id },
            FieldValue::Tag { tag, present: true } => OpKind::AddTag {
                node_id,
                tag: tag.clone(),
            },
            FieldValue::Tag {
                tag,
                present: false,
            } => OpKind::RemoveTag {
                node_id,
                tag: tag.clone(),
            },
        }
    }
}

/// Compensating record for one field of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub node_id: NodeId,
    pub before: FieldValue,
    pub after: FieldValue,
}

impl Change {
    /// `None` when nothing actually changed.
    pub fn new(node_id: NodeId, before: FieldValue, after: FieldValue) -> Option<Self> {
        (before != after).then_some(Self {
            node_id,
            before,
            after,
        })
    }
}

/// One user-visible step: every field change made by a single action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryEntry {
    changes: Vec<Change>,
}

impl HistoryEntry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: Change) {
        self.changes.push(change);
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Operations that take the tree back to before this step, newest change first.
    pub fn undo_ops(&self) -> Vec<OpKind> {
        self.changes
            .iter()
            .rev()
            .map(|change| change.before.reinstate(change.node_id))
            .collect()
    }

    /// Operations that replay this step forward again.
    pub fn redo_ops(&self) -> Vec<OpKind> {
        self.changes
            .iter()
            .map(|change| change.after.reinstate(change.node_id))
            .collect()
    }
}

impl From<Change> for HistoryEntry {
    fn from(change: Change) -> Self {
        Self {
            changes: vec![change],
        }
    }
}

/// Bounded undo and redo stacks.
#[derive(Debug, Clone)]
pub struct History {
    undo: VecDeque<HistoryEntry>,
    redo: VecDeque<HistoryEntry>,
    depth: usize,
}

impl History {
    /// A `depth` of zero disables history entirely.
    pub fn new(depth: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: VecDeque::new(),
            depth,
        }
    }

    /// Records a new user action. Clears the redo stack.
    pub fn record(&mut self, entry: HistoryEntry) {
        if entry.is_empty() {
            return;
        }
        self.redo.clear();
        push_bounded(&mut self.undo, entry, self.depth);
    }

    pub fn pop_undo(&mut self) -> Option<HistoryEntry> {
        self.undo.pop_back()
    }

    pub fn pop_redo(&mut self) -> Option<HistoryEntry> {
        self.redo.pop_back()
    }

    /// Files an entry that was just undone.
    pub fn push_redo(&mut self, entry: HistoryEntry) {
        push_bounded(&mut self.redo, entry, self.depth);
    }

    /// Files an entry that was just redone, leaving the redo stack alone.
    pub fn push_undo(&mut self, entry: HistoryEntry) {
        push_bounded(&mut self.undo, entry, self.depth);
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}

fn push_bounded(stack: &mut VecDeque<HistoryEntry>, entry: HistoryEntry, depth: usize) {
    if depth == 0 {
        return;
    }
    stack.push_back(entry);
    while stack.len() > depth {
        stack.pop_front();
    }
}
