//! Materialized outline tree.
//!
//! [`TreeState`] is the node mapping produced by folding the operation log.
//! It is only ever changed by the [`reducer`]; everything else reads it.

use crate::core::rank::{RankError, RankKey};
use crate::core::{NodeId, Stamp, Timestamp};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

pub mod reducer;

/// Identifier of a user-defined status. The set is open and edited per document.
pub type StatusId = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDef {
    pub id: StatusId,
    pub label: String,
    #[serde(default)]
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub is_final: bool,
}

impl StatusDef {
    pub fn new(id: impl Into<StatusId>, label: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            color: color.into(),
            icon: None,
            is_final: false,
        }
    }

    pub fn final_status(mut self) -> Self {
        self.is_final = true;
        self
    }
}

/// Ordered status definitions; the first entry is the default for new nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusList(Vec<StatusDef>);

impl Default for StatusList {
    fn default() -> Self {
        Self(vec![
            StatusDef::new("todo", "To do", "#8a8f98"),
            StatusDef::new("doing", "In progress", "#e0a526"),
            StatusDef::new("done", "Done", "#3fa34d").final_status(),
        ])
    }
}

impl StatusList {
    pub fn new(defs: Vec<StatusDef>) -> Self {
        Self(defs)
    }

    pub fn default_id(&self) -> Option<&str> {
        self.0.first().map(|def| def.id.as_str())
    }

    pub fn get(&self, id: &str) -> Option<&StatusDef> {
        self.0.iter().find(|def| def.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn is_final(&self, id: &str) -> bool {
        self.get(id).is_some_and(|def| def.is_final)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StatusDef> {
        self.0.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub pos: RankKey,
    pub text: String,
    pub status: StatusId,
    pub tags: Vec<String>,
    pub due_date: Option<Timestamp>,
    pub collapsed: bool,
    pub deleted: bool,
    pub deleted_at: Option<Timestamp>,
}

impl Node {
    /// First line of the text.
    pub fn title(&self) -> &str {
        let line = self.text.split('\n').next().unwrap_or_default();
        line.strip_suffix('\r').unwrap_or(line)
    }

    /// Everything after the first line.
    pub fn body(&self) -> &str {
        self.text
            .split_once('\n')
            .map(|(_, body)| body)
            .unwrap_or_default()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Last-writer-wins stamps for each independently written field of a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FieldClocks {
    pub text: Stamp,
    pub placement: Stamp,
    pub status: Stamp,
    pub collapsed: Stamp,
    pub due_date: Stamp,
    pub deleted: Stamp,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, Stamp>,
}

impl FieldClocks {
    pub fn created(stamp: Stamp) -> Self {
        Self {
            text: stamp,
            placement: stamp,
            status: stamp,
            collapsed: stamp,
            due_date: stamp,
            deleted: stamp,
            tags: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutlineEntry<'a> {
    pub depth: usize,
    pub node: &'a Node,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeState {
    statuses: StatusList,
    nodes: BTreeMap<NodeId, Node>,
    clocks: BTreeMap<NodeId, FieldClocks>,
    last_seq: u64,
}

impl Default for TreeState {
    fn default() -> Self {
        Self::new(StatusList::default())
    }
}

impl TreeState {
    pub fn new(statuses: StatusList) -> Self {
        Self {
            statuses,
            nodes: BTreeMap::new(),
            clocks: BTreeMap::new(),
            last_seq: 0,
        }
    }

    pub fn statuses(&self) -> &StatusList {
        &self.statuses
    }

    /// Replaces the status definitions. Existing nodes keep their status ids.
    pub fn set_statuses(&mut self, statuses: StatusList) {
        self.statuses = statuses;
    }

    /// Highest sequence number this state accounts for.
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Every node, tombstoned ones included.
    pub fn nodes(&self) -> &BTreeMap<NodeId, Node> {
        &self.nodes
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// All children of `parent` in sibling order, tombstoned ones included.
    ///
    /// Siblings with equal keys fall back to the order in which they were
    /// placed, then to their ids.
    pub fn children(&self, parent: Option<NodeId>) -> Vec<&Node> {
        let mut kids: Vec<&Node> = self
            .nodes
            .values()
            .filter(|node| node.parent_id == parent)
            .collect();
        kids.sort_by(|a, b| self.sibling_order(a, b));
        kids
    }

    fn sibling_order(&self, a: &Node, b: &Node) -> Ordering {
        a.pos
            .cmp(&b.pos)
            .then_with(|| self.placement_seq(a.id).cmp(&self.placement_seq(b.id)))
            .then_with(|| a.id.cmp(&b.id))
    }

    pub fn visible_children(&self, parent: Option<NodeId>) -> Vec<&Node> {
        self.children(parent)
            .into_iter()
            .filter(|node| !node.deleted)
            .collect()
    }

    pub fn roots(&self) -> Vec<&Node> {
        self.visible_children(None)
    }

    /// Parent chain of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut seen = BTreeSet::from([id]);
        let mut cursor = self.nodes.get(&id).and_then(|node| node.parent_id);
        while let Some(parent) = cursor {
            if !seen.insert(parent) {
                break;
            }
            chain.push(parent);
            cursor = self.nodes.get(&parent).and_then(|node| node.parent_id);
        }
        chain
    }

    /// True when `node` sits somewhere below `ancestor`.
    pub fn is_descendant(&self, node: NodeId, ancestor: NodeId) -> bool {
        self.ancestors(node).contains(&ancestor)
    }

    /// Not tombstoned and no tombstoned ancestor.
    pub fn is_visible(&self, id: NodeId) -> bool {
        match self.nodes.get(&id) {
            Some(node) if !node.deleted => self
                .ancestors(id)
                .iter()
                .all(|parent| self.nodes.get(parent).is_some_and(|p| !p.deleted)),
            _ => false,
        }
    }

    /// Depth-first listing of the visible tree.
    pub fn outline(&self) -> Vec<OutlineEntry<'_>> {
        self.walk(false)
    }

    /// Depth-first listing including tombstoned subtrees.
    pub fn outline_all(&self) -> Vec<OutlineEntry<'_>> {
        self.walk(true)
    }

    fn walk(&self, include_deleted: bool) -> Vec<OutlineEntry<'_>> {
        let mut levels = self.child_index(include_deleted);
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut seen = BTreeSet::new();
        let mut stack: Vec<(usize, &Node)> = levels
            .remove(&None)
            .unwrap_or_default()
            .into_iter()
            .rev()
            .map(|node| (0, node))
            .collect();
        while let Some((depth, node)) = stack.pop() {
            if !seen.insert(node.id) {
                continue;
            }
            out.push(OutlineEntry { depth, node });
            if let Some(kids) = levels.remove(&Some(node.id)) {
                stack.extend(kids.into_iter().rev().map(|child| (depth + 1, child)));
            }
        }
        out
    }

    /// Children of every parent in sibling order, built in one pass.
    fn child_index(&self, include_deleted: bool) -> BTreeMap<Option<NodeId>, Vec<&Node>> {
        let mut index: BTreeMap<Option<NodeId>, Vec<&Node>> = BTreeMap::new();
        for node in self.nodes.values() {
            if include_deleted || !node.deleted {
                index.entry(node.parent_id).or_default().push(node);
            }
        }
        for kids in index.values_mut() {
            kids.sort_by(|a, b| self.sibling_order(a, b));
        }
        index
    }

    /// Rank key for a new child of `parent` placed right after `after`,
    /// or first when `after` is `None`.
    ///
    /// Tombstoned siblings count, so a later restore never lands on a key
    /// that is already taken.
    pub fn rank_after(
        &self,
        parent: Option<NodeId>,
        after: Option<NodeId>,
    ) -> Result<RankKey, RankError> {
        let siblings = self.children(parent);
        let Some(after) = after else {
            return RankKey::for_gap(None, siblings.first().map(|node| &node.pos));
        };
        match siblings.iter().position(|node| node.id == after) {
            Some(index) => {
                let prev = &siblings[index].pos;
                let next = siblings[index + 1..]
                    .iter()
                    .map(|node| &node.pos)
                    .find(|pos| *pos > prev);
                RankKey::for_gap(Some(prev), next)
            }
            None => self.rank_last(parent),
        }
    }

    /// Rank key that appends to the end of `parent`'s children.
    pub fn rank_last(&self, parent: Option<NodeId>) -> Result<RankKey, RankError> {
        let siblings = self.children(parent);
        RankKey::for_gap(siblings.last().map(|node| &node.pos), None)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            seq_after: self.last_seq,
            state: self.clone(),
        }
    }

    fn placement_seq(&self, id: NodeId) -> u64 {
        self.clocks
            .get(&id)
            .map(|clocks| clocks.placement.seq)
            .unwrap_or_default()
    }
}

/// Cached materialized state plus the sequence number it accounts for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub seq_after: u64,
    pub state: TreeState,
}

impl Snapshot {
    pub fn into_state(self) -> TreeState {
        self.state
    }
}
