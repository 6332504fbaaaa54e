use std::fs;
use strata_oplog::{FileStore, OpKind, OpStore, Session, SessionConfig, SessionError, StoreError};
use tempfile::tempdir;

fn config() -> SessionConfig {
    SessionConfig {
        snapshot_every: 4,
        ..SessionConfig::default()
    }
}

#[test]
fn test_reopen_rebuilds_same_tree() {
    let dir = tempdir().unwrap();
    let mut session = Session::init(FileStore::open(dir.path()).unwrap(), config()).unwrap();
    let inbox = session.append_node(None, "Inbox").unwrap();
    let task = session.append_node(Some(inbox), "Call the plumber").unwrap();
    session.add_tag(task, "home").unwrap();
    session.set_status(task, "doing").unwrap();
    session.set_due_date(task, Some(1_700_000_000_000)).unwrap();
    let other = session.append_node(None, "Someday").unwrap();
    session.move_node(task, Some(other), None).unwrap();
    let expected = session.state().nodes().clone();
    drop(session);

    let reopened = Session::init(FileStore::open(dir.path()).unwrap(), config()).unwrap();
    assert_eq!(reopened.state().nodes(), &expected);
    // A snapshot was taken along the way and only the tail was replayed.
    let snapshot = reopened.store().load_snapshot().unwrap().unwrap();
    assert!(snapshot.seq_after >= 4);
}

#[test]
fn test_torn_final_append_loses_only_that_op() {
    let dir = tempdir().unwrap();
    let mut session = Session::init(
        FileStore::open(dir.path()).unwrap(),
        SessionConfig::default(),
    )
    .unwrap();
    let node = session.append_node(None, "kept").unwrap();
    session.submit(OpKind::update_text(node, "lost")).unwrap();
    drop(session);

    let oplog = dir.path().join("oplog");
    let bytes = fs::read(&oplog).unwrap();
    fs::write(&oplog, &bytes[..bytes.len() - 5]).unwrap();

    let mut reopened = Session::init(
        FileStore::open(dir.path()).unwrap(),
        SessionConfig::default(),
    )
    .unwrap();
    assert_eq!(reopened.state().get(node).unwrap().text, "kept");

    // The next op reuses the lost seq and the log stays readable.
    let op = reopened.submit(OpKind::update_text(node, "again")).unwrap();
    assert_eq!(op.seq, 2);
    drop(reopened);

    let last = Session::init(
        FileStore::open(dir.path()).unwrap(),
        SessionConfig::default(),
    )
    .unwrap();
    assert_eq!(last.state().get(node).unwrap().text, "again");
}

#[test]
fn test_compact_keeps_state() {
    let dir = tempdir().unwrap();
    let mut session = Session::init(
        FileStore::open(dir.path()).unwrap(),
        SessionConfig::default(),
    )
    .unwrap();
    for i in 0..10 {
        session.append_node(None, format!("item {i}")).unwrap();
    }
    session.snapshot_now().unwrap();
    let dropped = session.store_mut().compact().unwrap();
    assert_eq!(dropped, 10);
    let expected = session.state().clone();
    drop(session);

    let reopened = Session::init(
        FileStore::open(dir.path()).unwrap(),
        SessionConfig::default(),
    )
    .unwrap();
    assert_eq!(reopened.state(), &expected);
    assert_eq!(reopened.state().roots().len(), 10);
}

#[test]
fn test_unreadable_snapshot_rebuilds_from_log() {
    let dir = tempdir().unwrap();
    let mut session = Session::init(
        FileStore::open(dir.path()).unwrap(),
        SessionConfig::default(),
    )
    .unwrap();
    let first = session.append_node(None, "first").unwrap();
    session.snapshot_now().unwrap();
    let old_a = fs::read(dir.path().join("superblock_a")).unwrap();
    let old_b = fs::read(dir.path().join("superblock_b")).unwrap();

    let second = session.append_node(None, "second").unwrap();
    session.snapshot_now().unwrap();
    let expected = session.state().nodes().clone();
    drop(session);

    // Superblocks from the first save now name a segment that is gone.
    fs::write(dir.path().join("superblock_a"), &old_a).unwrap();
    fs::write(dir.path().join("superblock_b"), &old_b).unwrap();
    let store = FileStore::open(dir.path()).unwrap();
    assert!(store.load_snapshot().is_err());
    assert_eq!(store.load_ops_since(0).unwrap().len(), 2);

    let mut reopened = Session::init(store, SessionConfig::default()).unwrap();
    assert_eq!(reopened.state().nodes(), &expected);
    assert!(reopened.state().contains(first));
    assert!(reopened.state().contains(second));

    // Saving again repairs the snapshot.
    reopened.snapshot_now().unwrap();
    assert_eq!(
        reopened.store().load_snapshot().unwrap().unwrap().seq_after,
        2
    );
}

#[test]
fn test_unreadable_snapshot_after_compaction_is_an_error() {
    let dir = tempdir().unwrap();
    let mut session = Session::init(
        FileStore::open(dir.path()).unwrap(),
        SessionConfig::default(),
    )
    .unwrap();
    session.append_node(None, "a").unwrap();
    session.append_node(None, "b").unwrap();
    session.snapshot_now().unwrap();
    session.store_mut().compact().unwrap();
    session.append_node(None, "c").unwrap();
    drop(session);

    fs::write(dir.path().join("superblock_a"), b"{}").unwrap();
    fs::write(dir.path().join("superblock_b"), b"{}").unwrap();

    let err = Session::init(
        FileStore::open(dir.path()).unwrap(),
        SessionConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Store(StoreError::Corrupt(_))
    ));
}
