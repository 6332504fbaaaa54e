//! Deterministic state transitions.
//!
//! [`apply_one`] folds a single operation into a [`TreeState`]; [`replay`]
//! folds a whole log in ascending `seq` order. Neither ever fails: an
//! operation that cannot be applied (missing node, would-be cycle, duplicate
//! create) is absorbed as a no-op and reported, so one bad entry never stops
//! the rest of the history from reconstructing.
//!
//! Each node field carries the [`Stamp`] of its last write. A write whose
//! stamp is older than the field's is `Superseded`, which makes re-applying
//! an already folded operation harmless.

use super::{FieldClocks, Node, TreeState};
use crate::core::{NodeId, Stamp};
use crate::op::{CreateNode, OpKind, Operation};
use tracing::{debug, warn};

/// Structural problem that turned an operation into a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
    MissingNode(NodeId),
    MissingParent { node: NodeId, parent: NodeId },
    DuplicateNode(NodeId),
    Cycle { node: NodeId, parent: NodeId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The state changed.
    Applied,
    /// Accepted, but the field already held the value.
    Unchanged,
    /// The field was last written by a newer operation.
    Superseded,
    /// Already accounted for by the state being replayed onto.
    AlreadyApplied,
    Skipped(Anomaly),
}

impl ApplyOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Summary of a replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub applied: usize,
    pub unchanged: usize,
    pub superseded: usize,
    pub already_applied: usize,
    /// Operations absorbed as no-ops, by `seq`.
    pub skipped: Vec<(u64, Anomaly)>,
    /// Number of places where `seq` jumped by more than one.
    pub gaps: usize,
}

impl ReplayReport {
    pub fn record(&mut self, seq: u64, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Applied => self.applied += 1,
            ApplyOutcome::Unchanged => self.unchanged += 1,
            ApplyOutcome::Superseded => self.superseded += 1,
            ApplyOutcome::AlreadyApplied => self.already_applied += 1,
            ApplyOutcome::Skipped(anomaly) => self.skipped.push((seq, anomaly)),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.gaps == 0
    }
}

/// Applies one operation to `state`.
///
/// Depends only on `state` and the operation's own fields.
pub fn apply_one(state: &mut TreeState, op: &Operation) -> ApplyOutcome {
    let stamp = op.stamp();
    let outcome = match &op.kind {
        OpKind::Create(create) => apply_create(state, create, stamp),
        OpKind::UpdateText { node_id, text } => {
            with_node(state, *node_id, |node, clocks| {
                write_field(&mut clocks.text, &mut node.text, text.clone(), stamp)
            })
        }
        OpKind::Move {
            node_id,
            new_parent_id,
            new_pos,
        } => {
            if let Some(parent) = *new_parent_id
                && let Some(anomaly) = placement_anomaly(state, *node_id, parent)
            {
                return finish(state, op, ApplyOutcome::Skipped(anomaly));
            }
            // Parent and position are one register: both change or neither.
            with_node(state, *node_id, |node, clocks| {
                if !stamp.supersedes(&clocks.placement) {
                    return ApplyOutcome::Superseded;
                }
                clocks.placement = stamp;
                if node.parent_id == *new_parent_id && node.pos == *new_pos {
                    return ApplyOutcome::Unchanged;
                }
                node.parent_id = *new_parent_id;
                node.pos = new_pos.clone();
                ApplyOutcome::Applied
            })
        }
        OpKind::SetStatus { node_id, status } => with_node(state, *node_id, |node, clocks| {
            write_field(&mut clocks.status, &mut node.status, status.clone(), stamp)
        }),
        OpKind::ToggleCollapsed { node_id, collapsed } => {
            with_node(state, *node_id, |node, clocks| {
                write_field(&mut clocks.collapsed, &mut node.collapsed, *collapsed, stamp)
            })
        }
        OpKind::SetDueDate { node_id, due_date } => with_node(state, *node_id, |node, clocks| {
            write_field(&mut clocks.due_date, &mut node.due_date, *due_date, stamp)
        }),
        OpKind::Tombstone {
            node_id,
            deleted_at,
        } => with_node(state, *node_id, |node, clocks| {
            if !stamp.supersedes(&clocks.deleted) {
                return ApplyOutcome::Superseded;
            }
            clocks.deleted = stamp;
            if node.deleted {
                return ApplyOutcome::Unchanged;
            }
            node.deleted = true;
            node.deleted_at = Some(deleted_at.unwrap_or(op.ts));
            ApplyOutcome::Applied
        }),
        OpKind::Restore { node_id } => {
            let outcome = with_node(state, *node_id, |node, clocks| {
                if !stamp.supersedes(&clocks.deleted) {
                    return ApplyOutcome::Superseded;
                }
                clocks.deleted = stamp;
                if !node.deleted {
                    return ApplyOutcome::Unchanged;
                }
                node.deleted = false;
                node.deleted_at = None;
                ApplyOutcome::Applied
            });
            if outcome.changed() && !state.is_visible(*node_id) {
                debug!(seq = op.seq, node = %node_id, "restored under a tombstoned ancestor");
            }
            outcome
        }
        OpKind::AddTag { node_id, tag } => with_node(state, *node_id, |node, clocks| {
            let clock = clocks.tags.entry(tag.clone()).or_default();
            if !stamp.supersedes(clock) {
                return ApplyOutcome::Superseded;
            }
            *clock = stamp;
            if node.has_tag(tag) {
                return ApplyOutcome::Unchanged;
            }
            node.tags.push(tag.clone());
            ApplyOutcome::Applied
        }),
        OpKind::RemoveTag { node_id, tag } => with_node(state, *node_id, |node, clocks| {
            let clock = clocks.tags.entry(tag.clone()).or_default();
            if !stamp.supersedes(clock) {
                return ApplyOutcome::Superseded;
            }
            *clock = stamp;
            if !node.has_tag(tag) {
                return ApplyOutcome::Unchanged;
            }
            node.tags.retain(|t| t != tag);
            ApplyOutcome::Applied
        }),
    };
    finish(state, op, outcome)
}

/// Folds `ops` onto `base` in ascending `seq` order.
///
/// Operations at or below the sequence number `base` already accounts for
/// are skipped, so a snapshot can be replayed against the full log.
pub fn replay(mut base: TreeState, ops: &[Operation]) -> (TreeState, ReplayReport) {
    let mut ordered: Vec<&Operation> = ops.iter().collect();
    ordered.sort_by_key(|op| op.seq);

    let mut report = ReplayReport::default();
    for op in ordered {
        if op.seq <= base.last_seq {
            report.record(op.seq, ApplyOutcome::AlreadyApplied);
            continue;
        }
        if op.seq > base.last_seq + 1 {
            warn!(
                expected = base.last_seq + 1,
                found = op.seq,
                "gap in operation sequence"
            );
            report.gaps += 1;
        }
        let outcome = apply_one(&mut base, op);
        report.record(op.seq, outcome);
    }

    if !report.skipped.is_empty() {
        debug!(
            skipped = report.skipped.len(),
            applied = report.applied,
            "replay absorbed structural anomalies"
        );
    }
    (base, report)
}

fn finish(state: &mut TreeState, op: &Operation, outcome: ApplyOutcome) -> ApplyOutcome {
    state.last_seq = state.last_seq.max(op.seq);
    match &outcome {
        ApplyOutcome::Skipped(anomaly) => {
            debug!(seq = op.seq, kind = %op.op_type(), ?anomaly, "operation absorbed as no-op");
        }
        ApplyOutcome::Superseded => {
            debug!(seq = op.seq, kind = %op.op_type(), node = %op.node_id(), "stale write superseded");
        }
        _ => {}
    }
    outcome
}

fn apply_create(state: &mut TreeState, create: &CreateNode, stamp: Stamp) -> ApplyOutcome {
    if state.nodes.contains_key(&create.node_id) {
        return ApplyOutcome::Skipped(Anomaly::DuplicateNode(create.node_id));
    }
    if let Some(parent) = create.parent_id
        && !state.nodes.contains_key(&parent)
    {
        return ApplyOutcome::Skipped(Anomaly::MissingParent {
            node: create.node_id,
            parent,
        });
    }

    let status = create
        .status
        .clone()
        .or_else(|| state.statuses.default_id().map(str::to_string))
        .unwrap_or_default();
    let mut tags: Vec<String> = Vec::with_capacity(create.tags.len());
    for tag in &create.tags {
        if !tags.contains(tag) {
            tags.push(tag.clone());
        }
    }

    state.nodes.insert(
        create.node_id,
        Node {
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
    );
    state
        .clocks
        .insert(create.node_id, FieldClocks::created(stamp));
    ApplyOutcome::Applied
}

/// Why `node` may not be placed under `parent`, if anything.
fn placement_anomaly(state: &TreeState, node: NodeId, parent: NodeId) -> Option<Anomaly> {
    if !state.nodes.contains_key(&node) {
        return Some(Anomaly::MissingNode(node));
    }
    if !state.nodes.contains_key(&parent) {
        return Some(Anomaly::MissingParent { node, parent });
    }
    if parent == node || state.is_descendant(parent, node) {
        return Some(Anomaly::Cycle { node, parent });
    }
    None
}

fn with_node(
    state: &mut TreeState,
    id: NodeId,
    f: impl FnOnce(&mut Node, &mut FieldClocks) -> ApplyOutcome,
) -> ApplyOutcome {
    let Some(node) = state.nodes.get_mut(&id) else {
        return ApplyOutcome::Skipped(Anomaly::MissingNode(id));
    };
    let clocks = state.clocks.entry(id).or_default();
    f(node, clocks)
}

/// Last-writer-wins write of a single field.
fn write_field<T: PartialEq>(
    clock: &mut Stamp,
    field: &mut T,
    value: T,
    stamp: Stamp,
) -> ApplyOutcome {
    if !stamp.supersedes(clock) {
        return ApplyOutcome::Superseded;
    }
    *clock = stamp;
    if *field == value {
        return ApplyOutcome::Unchanged;
    }
    *field = value;
    ApplyOutcome::Applied
}
