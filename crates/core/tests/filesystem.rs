//! Filesystem adapter behavior against the in-memory service

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use osc_core::fs::{DirEntry, NodeKind};
use osc_core::memory::Operation;
use osc_core::{
    Code, CompressionEstimator, FilesystemAdapter, MemoryService, Node, TransportClient,
};

async fn mount(keys: &[&str]) -> (FilesystemAdapter, Arc<MemoryService>) {
    let service = Arc::new(MemoryService::new().with_bucket("bucket"));
    for key in keys {
        service
            .insert("bucket", key, Bytes::from(format!("contents of {key}")))
            .await;
    }
    let adapter = FilesystemAdapter::new(TransportClient::new(service.clone()), "bucket");
    (adapter, service)
}

fn text(len: usize) -> Vec<u8> {
    b"the quick brown fox jumps over the lazy dog\n"
        .iter()
        .copied()
        .cycle()
        .take(len)
        .collect()
}

fn listing(entries: &[DirEntry]) -> Vec<(String, NodeKind)> {
    entries.iter().map(|e| (e.name.clone(), e.kind)).collect()
}

#[tokio::test]
async fn listing_groups_keys_into_children() {
    let (fs, _) = mount(&["a/b", "a/c/d"]).await;

    let root = fs.readdir(&Node::root()).await.unwrap();
    assert_eq!(
        listing(&root),
        vec![
            (".".to_string(), NodeKind::Directory),
            ("a".to_string(), NodeKind::Directory),
        ]
    );

    let a = fs.lookup(&Node::root(), "a").await.unwrap();
    let entries = fs.readdir(&a).await.unwrap();
    assert_eq!(
        listing(&entries),
        vec![
            (".".to_string(), NodeKind::Directory),
            ("b".to_string(), NodeKind::File),
            ("c".to_string(), NodeKind::Directory),
        ]
    );
}

#[tokio::test]
async fn directory_removal_requires_emptiness() {
    let (fs, service) = mount(&[]).await;
    let root = Node::root();

    let dir = fs.mkdir(&root, "x").await.unwrap();
    let (_, mut handle) = fs.create(&dir, "y").await.unwrap();
    fs.write(&mut handle, 0, b"payload").await.unwrap();
    fs.release(handle).await.unwrap();

    let err = fs.remove(&root, "x", true).await.unwrap_err();
    assert_eq!(err.errno(), libc::ENOTEMPTY);

    fs.remove(&dir, "y", false).await.unwrap();
    fs.remove(&root, "x", true).await.unwrap();
    assert!(service.keys("bucket").await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn cached_verdict_lives_for_the_ttl() {
    let (fs, service) = mount(&[]).await;
    let root = Node::root();

    assert!(fs.lookup(&root, "late").await.unwrap_err().is_not_found());
    service.insert("bucket", "late", Bytes::from_static(b"x")).await;

    tokio::time::advance(Duration::from_secs(59)).await;
    assert!(fs.lookup(&root, "late").await.unwrap_err().is_not_found());

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(fs.lookup(&root, "late").await.unwrap(), Node::file("late"));
}

#[tokio::test]
async fn reserved_names_are_never_fetched() {
    let (fs, service) = mount(&["autorun.inf"]).await;

    for name in [
        "Input",
        ".Trash",
        ".Trash-1000",
        ".xdg-volume-info",
        "autorun.inf",
    ] {
        assert!(fs.lookup(&Node::root(), name).await.unwrap_err().is_not_found());
    }
    assert_eq!(service.calls(Operation::HeadObject), 0);
    assert_eq!(service.calls(Operation::ListObjects), 0);
    assert!(fs.cache().is_empty());
}

#[tokio::test]
async fn rename_moves_file() {
    let (fs, service) = mount(&["old.txt", "dest/"]).await;
    let root = Node::root();
    let dest = fs.lookup(&root, "dest").await.unwrap();

    fs.rename(&root, "old.txt", &dest, "new.txt").await.unwrap();

    assert_eq!(service.keys("bucket").await, vec!["dest/", "dest/new.txt"]);
    assert!(fs.lookup(&root, "old.txt").await.unwrap_err().is_not_found());
    let node = fs.lookup(&dest, "new.txt").await.unwrap();
    let handle = fs.open(&node).await.unwrap();
    assert_eq!(
        &fs.read(&handle, 0, 1024).await.unwrap()[..],
        b"contents of old.txt"
    );
}

#[tokio::test]
async fn rename_moves_directory_marker() {
    let (fs, service) = mount(&["olddir/"]).await;

    fs.rename(&Node::root(), "olddir", &Node::root(), "newdir")
        .await
        .unwrap();
    assert_eq!(service.keys("bucket").await, vec!["newdir/"]);
}

#[tokio::test]
async fn rename_is_not_atomic() {
    let (fs, service) = mount(&["src"]).await;
    service.fail(Operation::DeleteObject, Code::PermissionDenied, 1);

    let err = fs
        .rename(&Node::root(), "src", &Node::root(), "dst")
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::PermissionDenied);
    assert_eq!(service.keys("bucket").await, vec!["dst", "src"]);
}

#[tokio::test]
async fn rename_of_missing_source_changes_nothing() {
    let (fs, service) = mount(&["other"]).await;

    let err = fs
        .rename(&Node::root(), "ghost", &Node::root(), "dst")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(service.keys("bucket").await, vec!["other"]);
    assert_eq!(service.calls(Operation::PutObject), 0);
}

#[tokio::test]
async fn file_lifecycle() {
    let (fs, _) = mount(&[]).await;
    let root = Node::root();

    let (node, mut handle) = fs.create(&root, "notes.txt").await.unwrap();
    assert_eq!(fs.getattr(&node).await.unwrap().size, 0);

    fs.write(&mut handle, 0, b"first line\n").await.unwrap();
    fs.write(&mut handle, 11, b"second line\n").await.unwrap();
    fs.flush(&handle).await.unwrap();
    fs.release(handle).await.unwrap();

    let node = fs.lookup(&root, "notes.txt").await.unwrap();
    assert_eq!(fs.getattr(&node).await.unwrap().size, 23);

    let handle = fs.open(&node).await.unwrap();
    assert_eq!(handle.size, 23);
    assert_eq!(&fs.read(&handle, 11, 6).await.unwrap()[..], b"second");
    assert!(fs.read(&handle, 23, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn compressed_file_reports_decompressed_size() {
    let service = Arc::new(MemoryService::new().with_bucket("bucket"));
    let client = TransportClient::new(service.clone())
        .with_estimator(CompressionEstimator::new(256 * 1024, 0.9));
    let data = text(1024 * 1024);
    client.put_object("bucket", "log.txt", data.clone()).await.unwrap();

    let (stored, compressed) = service.stored("bucket", "log.txt").await.unwrap();
    assert!(compressed);
    assert!(stored.len() < data.len());

    let fs = FilesystemAdapter::new(client, "bucket");
    let node = fs.lookup(&Node::root(), "log.txt").await.unwrap();
    let attr = fs.getattr(&node).await.unwrap();
    let handle = fs.open(&node).await.unwrap();
    let contents = fs.read(&handle, 0, u32::MAX).await.unwrap();

    assert_eq!(attr.size, data.len() as u64);
    assert_eq!(handle.size, attr.size);
    assert_eq!(contents.len() as u64, attr.size);
}
