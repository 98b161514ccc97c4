use storage::SnapshotManager;
use tempfile::tempdir;

#[tokio::test]
async fn latest_snapshot_picks_highest_sequence() {
    let dir = tempdir().unwrap();
    let manager = SnapshotManager::new(dir.path().join("snapshots"));

    assert!(manager.latest_snapshot().await.unwrap().is_none());

    manager.create_snapshot(2, b"{\"v\":2}").await.unwrap();
    manager.create_snapshot(10, b"{\"v\":10}").await.unwrap();
    manager.create_snapshot(7, b"{\"v\":7}").await.unwrap();
    tokio::fs::write(dir.path().join("snapshots/notes.txt"), b"ignored")
        .await
        .unwrap();

    let (sequence, path) = manager.latest_snapshot().await.unwrap().unwrap();
    assert_eq!(sequence, 10);
    assert!(path.ends_with("snapshot_00000000000000000010.json"));

    let (sequence, bytes) = manager.load_latest().await.unwrap().unwrap();
    assert_eq!(sequence, 10);
    assert_eq!(bytes, b"{\"v\":10}");
}

#[tokio::test]
async fn append_snapshot_increments_sequence_and_leaves_no_temp_files() {
    let dir = tempdir().unwrap();
    let manager = SnapshotManager::new(dir.path());

    let (first, _) = manager.append_snapshot(b"one").await.unwrap();
    let (second, _) = manager.append_snapshot(b"two").await.unwrap();
    assert_eq!((first, second), (1, 2));

    let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
    while let Some(entry) = entries.next_entry().await.unwrap() {
        let name = entry.file_name();
        assert!(!name.to_string_lossy().ends_with(".tmp"));
    }
}

#[tokio::test]
async fn retention_keeps_only_the_newest_snapshots() {
    let dir = tempdir().unwrap();
    let manager = SnapshotManager::new(dir.path()).with_retention(2);

    for payload in [&b"one"[..], b"two", b"three", b"four"] {
        manager.append_snapshot(payload).await.unwrap();
    }

    let sequences: Vec<u64> = manager
        .list_snapshots()
        .await
        .unwrap()
        .into_iter()
        .map(|(sequence, _)| sequence)
        .collect();
    assert_eq!(sequences, [3, 4]);
    assert_eq!(manager.load_latest().await.unwrap().unwrap(), (4, b"four".to_vec()));

    let unbounded = SnapshotManager::new(dir.path()).with_retention(0);
    unbounded.append_snapshot(b"five").await.unwrap();
    assert_eq!(unbounded.list_snapshots().await.unwrap().len(), 3);
    assert_eq!(unbounded.prune().await.unwrap(), 0);
}
