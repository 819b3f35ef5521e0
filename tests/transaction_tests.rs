mod common;

use common::{create_test_workspace, manager, snapshot};
use std::fs;
use std::sync::Arc;
use workspace_broker::{
    MemoryAuditSink, OperationKind, Outcome, TransactionState, WorkspaceError,
};

#[test]
fn test_commit_then_rollback_overwrite() {
    let temp = create_test_workspace();
    let ws = manager(temp.path());

    let mut first = ws.begin();
    ws.write(&mut first, "new.txt", "hello", false).unwrap();
    ws.commit(&mut first).unwrap();

    let mut second = ws.begin();
    ws.write(&mut second, "new.txt", "world", true).unwrap();
    assert_eq!(
        fs::read_to_string(temp.path().join("new.txt")).unwrap(),
        "world"
    );

    ws.rollback(&mut second).unwrap();
    assert_eq!(
        fs::read_to_string(temp.path().join("new.txt")).unwrap(),
        "hello"
    );
}

#[test]
fn test_rollback_of_fresh_write_deletes_file() {
    let temp = create_test_workspace();
    let ws = manager(temp.path());
    let before = snapshot(temp.path());

    let mut txn = ws.begin();
    ws.write(&mut txn, "fresh.txt", "content", false).unwrap();
    ws.rollback(&mut txn).unwrap();

    assert!(!temp.path().join("fresh.txt").exists());
    assert_eq!(snapshot(temp.path()), before);
}

#[test]
fn test_delete_nested_directory_restored_byte_for_byte() {
    let temp = create_test_workspace();
    let ws = manager(temp.path());
    let before = snapshot(temp.path());

    let mut txn = ws.begin();
    ws.delete(&mut txn, "src").unwrap();
    assert!(!temp.path().join("src").exists());

    ws.rollback(&mut txn).unwrap();
    assert_eq!(snapshot(temp.path()), before);
    assert_eq!(
        fs::read(temp.path().join("src/lib/data.bin")).unwrap(),
        vec![0u8, 159, 146, 150, 255]
    );
}

#[test]
fn test_rename_onto_existing_restores_both() {
    let temp = create_test_workspace();
    let ws = manager(temp.path());

    let mut txn = ws.begin();
    ws.rename(&mut txn, "a.txt", "b.txt").unwrap();
    assert!(!temp.path().join("a.txt").exists());
    assert_eq!(
        fs::read_to_string(temp.path().join("b.txt")).unwrap(),
        "hello"
    );

    ws.rollback(&mut txn).unwrap();
    assert_eq!(
        fs::read_to_string(temp.path().join("a.txt")).unwrap(),
        "hello"
    );
    assert_eq!(
        fs::read_to_string(temp.path().join("b.txt")).unwrap(),
        "bee"
    );
}

#[test]
fn test_mixed_sequence_rolls_back_in_reverse() {
    let temp = create_test_workspace();
    let ws = manager(temp.path());
    let before = snapshot(temp.path());

    let mut txn = ws.begin();
    ws.create_dir(&mut txn, "build/out").unwrap();
    ws.write(&mut txn, "build/out/result.txt", "42", false).unwrap();
    ws.append(&mut txn, "docs/readme.md", "More text\n").unwrap();
    ws.rename(&mut txn, "src/lib", "vendor/lib").unwrap();
    ws.delete(&mut txn, "b.txt").unwrap();
    ws.write(&mut txn, "a.txt", "changed", true).unwrap();
    assert_ne!(snapshot(temp.path()), before);

    let report = ws.rollback(&mut txn).unwrap();
    assert!(report.left_in_place.is_empty());
    assert_eq!(txn.state(), TransactionState::RolledBack);
    assert_eq!(snapshot(temp.path()), before);
}

#[test]
fn test_rollback_twice_is_noop() {
    let temp = create_test_workspace();
    let ws = manager(temp.path());

    let mut txn = ws.begin();
    ws.write(&mut txn, "a.txt", "changed", true).unwrap();
    ws.delete(&mut txn, "docs").unwrap();

    ws.rollback(&mut txn).unwrap();
    let after_first = snapshot(temp.path());

    let report = ws.rollback(&mut txn).unwrap();
    assert!(report.reverted.is_empty());
    assert_eq!(snapshot(temp.path()), after_first);
}

#[test]
fn test_commit_keeps_changes_and_removes_backups() {
    let temp = create_test_workspace();
    let ws = manager(temp.path());

    let mut txn = ws.begin();
    ws.delete(&mut txn, "docs").unwrap();
    let backups = txn.backup_location().unwrap().to_path_buf();
    assert!(backups.exists());

    ws.commit(&mut txn).unwrap();
    assert!(!backups.exists());
    assert!(!temp.path().join("docs").exists());

    let err = ws.rollback(&mut txn).unwrap_err();
    assert!(matches!(
        err,
        WorkspaceError::TransactionClosed(TransactionState::Committed)
    ));
}

#[test]
fn test_untracked_content_keeps_created_directory() {
    let temp = create_test_workspace();
    let ws = manager(temp.path());

    let mut txn = ws.begin();
    ws.create_dir(&mut txn, "scratch").unwrap();
    fs::write(temp.path().join("scratch/outside.txt"), "not tracked").unwrap();

    let report = ws.rollback(&mut txn).unwrap();
    assert_eq!(report.left_in_place.len(), 1);
    assert!(temp.path().join("scratch/outside.txt").exists());
}

#[test]
fn test_rollback_is_audited() {
    let temp = create_test_workspace();
    let sink = Arc::new(MemoryAuditSink::new());
    let ws = manager(temp.path()).with_audit_sink(Arc::clone(&sink));

    let mut txn = ws.begin();
    ws.read(&mut txn, "a.txt").unwrap();
    ws.delete(&mut txn, "b.txt").unwrap();
    ws.rollback(&mut txn).unwrap();

    let rolled_back: Vec<_> = sink
        .events()
        .into_iter()
        .filter(|e| e.outcome == Outcome::RolledBack)
        .collect();
    assert_eq!(rolled_back.len(), 1);
    assert_eq!(rolled_back[0].operation, OperationKind::Delete);
}
