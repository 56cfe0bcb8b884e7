use std::sync::Arc;

use sessionvault_core::{CoreError, SourceDescriptor, SourceKind, WalEntryKind};
use sessionvault_engine::{Config, LocalFileSourceReader, SessionStore, WholeDocumentReplayer};
use sessionvault_local::LocalFsBackend;
use tempfile::TempDir;

fn store(dir: &TempDir) -> SessionStore {
    let backend = Arc::new(LocalFsBackend::new(dir.path()));
    SessionStore::new(backend, Arc::new(WholeDocumentReplayer::new()), Config::default())
        .with_source_reader(SourceKind::Local, Arc::new(LocalFileSourceReader::new()))
}

#[tokio::test]
async fn basic_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    store.create_empty("t1", "s1").await.unwrap();

    store
        .append_patch("t1", "s1", "add a", b"a".to_vec(), b"a".to_vec())
        .await
        .unwrap();
    store
        .append_patch("t1", "s1", "add b", b"a,b".to_vec(), b"a,b".to_vec())
        .await
        .unwrap();
    let entry = store
        .append_patch("t1", "s1", "add c", b"a,b,c".to_vec(), b"a,b,c".to_vec())
        .await
        .unwrap();

    assert_eq!(store.get("t1", "s1").await.unwrap(), b"a,b,c");
    assert_eq!(entry.wal_tip, 3);
    assert_eq!(entry.cursor, 3);
    let expected: std::collections::BTreeSet<u64> = [1, 2, 3].into_iter().collect();
    assert!(entry.checkpoint_positions.is_superset(&expected));
}

#[tokio::test]
async fn undo_branching() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    store.create_empty("t1", "s1").await.unwrap();
    store
        .append_patch("t1", "s1", "add a", b"a".to_vec(), b"a".to_vec())
        .await
        .unwrap();
    store
        .append_patch("t1", "s1", "add b", b"a,b".to_vec(), b"a,b".to_vec())
        .await
        .unwrap();
    store
        .append_patch("t1", "s1", "add c", b"a,b,c".to_vec(), b"a,b,c".to_vec())
        .await
        .unwrap();

    let moved = store.undo("t1", "s1", 2).await.unwrap();
    assert_eq!(moved.new_cursor, 1);
    assert_eq!(store.get("t1", "s1").await.unwrap(), b"a");

    let entry = store
        .append_patch("t1", "s1", "add b'", b"a,b'".to_vec(), b"a,b'".to_vec())
        .await
        .unwrap();
    assert_eq!(store.get("t1", "s1").await.unwrap(), b"a,b'");
    assert_eq!(entry.wal_tip, 2);

    let history = store.history("t1", "s1", 0, 0).await.unwrap();
    assert!(history.entries.iter().all(|e| e.description != "add b"));
    assert!(history.entries.iter().all(|e| e.description != "add c"));
}

#[tokio::test]
async fn jump_to_baseline() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    store.create_empty("t1", "s1").await.unwrap();
    store
        .append_patch("t1", "s1", "add a", b"a".to_vec(), b"a".to_vec())
        .await
        .unwrap();
    store
        .append_patch("t1", "s1", "add b", b"a,b".to_vec(), b"a,b".to_vec())
        .await
        .unwrap();
    store
        .append_patch("t1", "s1", "add c", b"a,b,c".to_vec(), b"a,b,c".to_vec())
        .await
        .unwrap();

    let moved = store.jump_to("t1", "s1", 0).await.unwrap();
    assert_eq!(moved.new_cursor, 0);
    assert_eq!(store.get("t1", "s1").await.unwrap(), b"");
}

#[tokio::test]
async fn compaction_preserves_document() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    store.create_empty("t1", "s1").await.unwrap();
    store
        .append_patch("t1", "s1", "add a", b"a".to_vec(), b"a".to_vec())
        .await
        .unwrap();
    store
        .append_patch("t1", "s1", "add b", b"a,b".to_vec(), b"a,b".to_vec())
        .await
        .unwrap();
    store
        .append_patch("t1", "s1", "add c", b"a,b,c".to_vec(), b"a,b,c".to_vec())
        .await
        .unwrap();

    let entry = store.compact("t1", "s1", false).await.unwrap();
    assert_eq!(entry.wal_tip, 0);
    assert_eq!(entry.cursor, 0);
    assert!(entry.checkpoint_positions.is_empty());
    assert_eq!(store.get("t1", "s1").await.unwrap(), b"a,b,c");
}

#[tokio::test]
async fn external_sync_gates_edits_and_is_undoable() {
    let dir = TempDir::new().unwrap();
    let source_dir = TempDir::new().unwrap();
    let store = store(&dir);

    let path = source_dir.path().join("doc.bin");
    tokio::fs::write(&path, b"x").await.unwrap();
    let source = SourceDescriptor {
        kind: SourceKind::Local,
        connection_id: None,
        path: path.to_string_lossy().to_string(),
        file_id: None,
        auto_sync: true,
        metadata: None,
    };

    store
        .open_file("t1", "s1", source.clone(), b"x".to_vec())
        .await
        .unwrap();
    store
        .append_patch("t1", "s1", "add y", b"x,y".to_vec(), b"x,y".to_vec())
        .await
        .unwrap();

    tokio::fs::write(&path, b"x,y,z").await.unwrap();
    let pending = store
        .check_for_changes("t1", "s1", &source)
        .await
        .unwrap();
    assert!(pending.is_some());

    let blocked = store
        .append_patch("t1", "s1", "add w", b"x,y,w".to_vec(), b"x,y,w".to_vec())
        .await;
    assert!(matches!(blocked, Err(CoreError::EditsBlocked(_))));

    let outcome = store.sync("t1", "s1", &source).await.unwrap();
    assert!(matches!(outcome, sessionvault_engine::SyncOutcome::Synced(_)));
    assert_eq!(store.get("t1", "s1").await.unwrap(), b"x,y,z");

    let history = store.history("t1", "s1", 0, 0).await.unwrap();
    let tip_entry = history.entries.last().unwrap();
    assert_eq!(tip_entry.kind, WalEntryKind::ExternalSync);

    store.undo("t1", "s1", 1).await.unwrap();
    assert_eq!(store.get("t1", "s1").await.unwrap(), b"x,y");
}

#[tokio::test]
async fn cross_process_concurrency_both_sessions_visible() {
    let dir = TempDir::new().unwrap();
    let backend_a = Arc::new(LocalFsBackend::new(dir.path()));
    let backend_b = Arc::new(LocalFsBackend::new(dir.path()));
    let store_a = SessionStore::new(
        backend_a,
        Arc::new(WholeDocumentReplayer::new()),
        Config::default(),
    );
    let store_b = SessionStore::new(
        backend_b,
        Arc::new(WholeDocumentReplayer::new()),
        Config::default(),
    );

    let (r1, r2) = tokio::join!(
        store_a.create_empty("t1", "s1"),
        store_b.create_empty("t1", "s2"),
    );
    r1.unwrap();
    r2.unwrap();

    let from_a = store_a.list("t1").await.unwrap();
    let from_b = store_b.list("t1").await.unwrap();
    for listing in [&from_a, &from_b] {
        assert_eq!(listing.len(), 2);
        assert!(listing.iter().any(|e| e.id == "s1"));
        assert!(listing.iter().any(|e| e.id == "s2"));
    }
}
