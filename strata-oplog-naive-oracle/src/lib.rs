//! A naive, simple oracle reducer for differential testing.
//!
//! Nodes live in a flat vector and every lookup is a linear scan. There are
//! no per-field stamps: operations must be fed in ascending `seq` order, and
//! anything at or below the last applied `seq` is ignored.
use strata_oplog::{CreateNode, Node, NodeId, OpKind, Operation};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    node: Node,
    placed_at: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Outline {
    default_status: Option<String>,
    entries: Vec<Entry>,
    last_seq: u64,
}

impl Outline {
    pub fn new(default_status: Option<&str>) -> Self {
        Self {
            default_status: default_status.map(str::to_string),
            entries: Vec::new(),
            last_seq: 0,
        }
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    pub fn apply(&mut self, op: &Operation) {
        if op.seq <= self.last_seq {
            return;
        }
        self.last_seq = op.seq;

        match &op.kind {
            OpKind::Create(create) => self.create(create, op.seq),
            OpKind::UpdateText { node_id, text } => {
                if let Some(node) = self.node_mut(*node_id) {
                    node.text = text.clone();
                }
            }
            OpKind::Move {
                node_id,
                new_parent_id,
                new_pos,
            } => {
                if !self.exists(*node_id) {
                    return;
                }
                if let Some(parent) = *new_parent_id
                    && (!self.exists(parent) || self.chain_contains(parent, *node_id))
                {
                    return;
                }
                if let Some(entry) = self.entries.iter_mut().find(|e| e.node.id == *node_id) {
                    entry.node.parent_id = *new_parent_id;
                    entry.node.pos = new_pos.clone();
                    entry.placed_at = op.seq;
                }
            }
            OpKind::SetStatus { node_id, status } => {
                if let Some(node) = self.node_mut(*node_id) {
                    node.status = status.clone();
                }
            }
            OpKind::ToggleCollapsed { node_id, collapsed } => {
                if let Some(node) = self.node_mut(*node_id) {
                    node.collapsed = *collapsed;
                }
            }
            OpKind::SetDueDate { node_id, due_date } => {
                if let Some(node) = self.node_mut(*node_id) {
                    node.due_date = *due_date;
                }
            }
            OpKind::Tombstone {
                node_id,
                deleted_at,
            } => {
                if let Some(node) = self.node_mut(*node_id)
                    && !node.deleted
                {
                    node.deleted = true;
                    node.deleted_at = Some(deleted_at.unwrap_or(op.ts));
                }
            }
            OpKind::Restore { node_id } => {
                if let Some(node) = self.node_mut(*node_id) {
                    node.deleted = false;
                    node.deleted_at = None;
                }
            }
            OpKind::AddTag { node_id, tag } => {
                if let Some(node) = self.node_mut(*node_id)
                    && !node.tags.contains(tag)
                {
                    node.tags.push(tag.clone());
                }
            }
            OpKind::RemoveTag { node_id, tag } => {
                if let Some(node) = self.node_mut(*node_id) {
                    node.tags.retain(|t| t != tag);
                }
            }
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.entries
            .iter()
            .find(|entry| entry.node.id == id)
            .map(|entry| &entry.node)
    }

    /// Every node keyed by id, tombstoned ones included.
    pub fn nodes(&self) -> BTreeMap<NodeId, Node> {
        self.entries
            .iter()
            .map(|entry| (entry.node.id, entry.node.clone()))
            .collect()
    }

    /// Depth-first `(depth, id)` listing of the visible tree.
    pub fn outline(&self) -> Vec<(usize, NodeId)> {
        let mut out = Vec::new();
        self.visit(None, 0, &mut out);
        out
    }

    fn visit(&self, parent: Option<NodeId>, depth: usize, out: &mut Vec<(usize, NodeId)>) {
        let mut kids: Vec<&Entry> = self
            .entries
            .iter()
            .filter(|entry| entry.node.parent_id == parent && !entry.node.deleted)
            .collect();
        kids.sort_by(|a, b| {
            (&a.node.pos, a.placed_at, a.node.id).cmp(&(&b.node.pos, b.placed_at, b.node.id))
        });
        for kid in kids {
            out.push((depth, kid.node.id));
            self.visit(Some(kid.node.id), depth + 1, out);
        }
    }

    fn create(&mut self, create: &CreateNode, seq: u64) {
        if self.exists(create.node_id) {
            return;
        }
        if let Some(parent) = create.parent_id
            && !self.exists(parent)
        {
            return;
        }
        let mut tags: Vec<String> = Vec::new();
        for tag in &create.tags {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }
        let status = create
            .status
            .clone()
            .or_else(|| self.default_status.clone())
            .unwrap_or_default();
        self.entries.push(Entry {
            node: Node {
                id: create.node_id,
                parent_id: create.parent_id,
                pos: create.pos.clone(),
                text: create.text.clone(),
                status,
                tags,
                due_date: create.due_date,
                collapsed: create.collapsed,
                deleted: false,
                deleted_at: None,
            },
            placed_at: seq,
        });
    }

    fn exists(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.entries
            .iter_mut()
            .find(|entry| entry.node.id == id)
            .map(|entry| &mut entry.node)
    }

    /// Walks up from `start` (inclusive) looking for `target`.
    fn chain_contains(&self, start: NodeId, target: NodeId) -> bool {
        let mut cursor = Some(start);
        let mut steps = 0;
        while let Some(id) = cursor {
            if id == target {
                return true;
            }
            steps += 1;
            if steps > self.entries.len() {
                return false;
            }
            cursor = self.node(id).and_then(|node| node.parent_id);
        }
        false
    }
}
