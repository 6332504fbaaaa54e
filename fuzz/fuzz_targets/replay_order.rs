#![no_main]

//! Replaying the same log in any delivery order must produce the same tree.
//!
//! Each 4-byte chunk becomes one operation against a small pool of node ids,
//! so the log is dense with missing parents, duplicate creates and cycles.

use libfuzzer_sys::fuzz_target;
use strata_oplog::{CreateNode, NodeId, OpKind, Operation, RankKey, TreeState, replay};
use uuid::Uuid;

const POOL: u8 = 8;
const KEYS: [&str; 6] = ["1", "5", "i", "i5", "r", "z"];

fn node(byte: u8) -> NodeId {
    Uuid::from_u128(u128::from(byte % POOL) + 1)
}

fn parent(byte: u8) -> Option<NodeId> {
    (byte % (POOL + 1) != POOL).then(|| node(byte))
}

fn key(byte: u8) -> RankKey {
    RankKey::parse(KEYS[usize::from(byte) % KEYS.len()]).unwrap_or_else(|_| RankKey::initial())
}

fn decode(chunk: &[u8]) -> OpKind {
    let (tag, a, b, c) = (chunk[0], chunk[1], chunk[2], chunk[3]);
    match tag % 9 {
        0 => CreateNode::new(parent(b), key(c))
            .with_id(node(a))
            .with_text(format!("n{c}"))
            .into(),
        1 => OpKind::update_text(node(a), format!("t{b}")),
        2 => OpKind::move_to(node(a), parent(b), key(c)),
        3 => OpKind::set_status(node(a), ["todo", "doing", "done"][usize::from(b % 3)]),
        4 => OpKind::ToggleCollapsed {
            node_id: node(a),
            collapsed: b % 2 == 0,
        },
        5 => OpKind::tombstone(node(a)),
        6 => OpKind::restore(node(a)),
        7 if b % 2 == 0 => OpKind::add_tag(node(a), format!("g{}", c % 3)),
        7 => OpKind::remove_tag(node(a), format!("g{}", c % 3)),
        _ => OpKind::SetDueDate {
            node_id: node(a),
            due_date: (b % 2 == 0).then_some(i64::from(c)),
        },
    }
}

fuzz_target!(|data: &[u8]| {
    let ops: Vec<Operation> = data
        .chunks_exact(4)
        .enumerate()
        .map(|(i, chunk)| {
            let seq = i as u64 + 1;
            Operation::new(1, seq, 1_000 + seq as i64, decode(chunk))
        })
        .collect();

    let (forward, _) = replay(TreeState::default(), &ops);

    let mut reversed = ops.clone();
    reversed.reverse();
    let (backward, _) = replay(TreeState::default(), &reversed);
    assert_eq!(forward, backward);

    // Resuming from a midpoint snapshot lands on the same tree.
    let mid = ops.len() / 2;
    let (prefix, _) = replay(TreeState::default(), &ops[..mid]);
    let (resumed, _) = replay(prefix.snapshot().into_state(), &ops);
    assert_eq!(forward, resumed);
});
