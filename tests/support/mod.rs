//! Random operation logs for property tests.
//!
//! Node references are indexes into a small fixed pool of ids, so generated
//! logs naturally contain duplicate creates, missing parents, cycles and
//! edits to nodes that do not exist yet.
#![allow(dead_code)]

use proptest::prelude::*;
use strata_oplog::{CreateNode, NodeId, OpKind, Operation, RankKey};
use uuid::Uuid;

pub const POOL: usize = 10;
const KEYS: [&str; 9] = ["0i", "1", "5", "9", "i", "i5", "m", "r", "z"];
const STATUSES: [&str; 3] = ["todo", "doing", "done"];
const TAGS: [&str; 3] = ["home", "work", "later"];

pub fn node_id(index: usize) -> NodeId {
    Uuid::from_u128(0x5eed_0000 + (index % POOL) as u128)
}

fn key(index: usize) -> RankKey {
    RankKey::parse(KEYS[index % KEYS.len()]).unwrap()
}

#[derive(Debug, Clone)]
pub enum Action {
    Create {
        node: usize,
        parent: Option<usize>,
        key: usize,
        text: u8,
    },
    Text {
        node: usize,
        text: u8,
    },
    Move {
        node: usize,
        parent: Option<usize>,
        key: usize,
    },
    Status {
        node: usize,
        status: usize,
    },
    Collapse {
        node: usize,
        collapsed: bool,
    },
    Delete {
        node: usize,
        at: Option<i64>,
    },
    Restore {
        node: usize,
    },
    Tag {
        node: usize,
        tag: usize,
        add: bool,
    },
    Due {
        node: usize,
        due: Option<i64>,
    },
}

impl Action {
    pub fn to_kind(&self) -> OpKind {
        match *self {
            Action::Create {
                node,
                parent,
                key: k,
                text,
            } => CreateNode::new(parent.map(node_id), key(k))
                .with_id(node_id(node))
                .with_text(format!("node {text}"))
                .into(),
            Action::Text { node, text } => OpKind::update_text(node_id(node), format!("text {text}")),
            Action::Move {
                node,
                parent,
                key: k,
            } => OpKind::move_to(node_id(node), parent.map(node_id), key(k)),
            Action::Status { node, status } => {
                OpKind::set_status(node_id(node), STATUSES[status % STATUSES.len()])
            }
            Action::Collapse { node, collapsed } => OpKind::ToggleCollapsed {
                node_id: node_id(node),
                collapsed,
            },
            Action::Delete { node, at } => OpKind::Tombstone {
                node_id: node_id(node),
                deleted_at: at,
            },
            Action::Restore { node } => OpKind::restore(node_id(node)),
            Action::Tag { node, tag, add } => {
                let tag = TAGS[tag % TAGS.len()];
                if add {
                    OpKind::add_tag(node_id(node), tag)
                } else {
                    OpKind::remove_tag(node_id(node), tag)
                }
            }
            Action::Due { node, due } => OpKind::SetDueDate {
                node_id: node_id(node),
                due_date: due,
            },
        }
    }
}

fn slot() -> impl Strategy<Value = usize> {
    0..POOL
}

pub fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        3 => (slot(), proptest::option::of(slot()), 0..KEYS.len(), any::<u8>()).prop_map(
            |(node, parent, key, text)| Action::Create {
                node,
                parent,
                key,
                text
            }
        ),
        2 => (slot(), any::<u8>()).prop_map(|(node, text)| Action::Text { node, text }),
        2 => (slot(), proptest::option::of(slot()), 0..KEYS.len())
            .prop_map(|(node, parent, key)| Action::Move { node, parent, key }),
        1 => (slot(), 0..STATUSES.len()).prop_map(|(node, status)| Action::Status { node, status }),
        1 => (slot(), any::<bool>()).prop_map(|(node, collapsed)| Action::Collapse { node, collapsed }),
        1 => (slot(), proptest::option::of(0..10_000i64))
            .prop_map(|(node, at)| Action::Delete { node, at }),
        1 => slot().prop_map(|node| Action::Restore { node }),
        2 => (slot(), 0..TAGS.len(), any::<bool>())
            .prop_map(|(node, tag, add)| Action::Tag { node, tag, add }),
        1 => (slot(), proptest::option::of(0..1_000_000i64))
            .prop_map(|(node, due)| Action::Due { node, due }),
    ]
}

/// Stamps actions with consecutive sequence numbers starting at 1.
pub fn stamp(actions: &[Action]) -> Vec<Operation> {
    actions
        .iter()
        .enumerate()
        .map(|(i, action)| {
            let seq = i as u64 + 1;
            Operation::new(1, seq, 1_000 + seq as i64, action.to_kind())
        })
        .collect()
}

pub fn log_strategy(max_len: usize) -> impl Strategy<Value = Vec<Operation>> {
    proptest::collection::vec(action_strategy(), 0..max_len).prop_map(|actions| stamp(&actions))
}
