//! Command logic driven against the in-memory service

use std::sync::Arc;

use bytes::Bytes;
use clap::Parser;
use osc_cli::commands::ls::EntryKind;
use osc_cli::commands::{Cli, Commands, get, ls, mb, put, rb, rm, stat};
use osc_core::memory::Operation;
use osc_core::{Code, MemoryService, TransportClient};

fn setup() -> (TransportClient, Arc<MemoryService>) {
    let service = Arc::new(MemoryService::new().with_bucket("bucket"));
    (TransportClient::new(service.clone()), service)
}

#[tokio::test]
async fn test_put_then_get() {
    let (client, service) = setup();

    let output = put::run(&client, "bucket", "notes/today.txt", Bytes::from_static(b"hello world"))
        .await
        .unwrap();
    assert_eq!(output.size_bytes, 11);
    assert_eq!(output.key, "notes/today.txt");
    assert!(service.stored("bucket", "notes/today.txt").await.is_some());

    let data = get::run(&client, "bucket", "notes/today.txt", None).await.unwrap();
    assert_eq!(&data[..], b"hello world");

    let part = get::run(&client, "bucket", "notes/today.txt", Some("bytes=6-10"))
        .await
        .unwrap();
    assert_eq!(&part[..], b"world");
}

#[tokio::test]
async fn test_get_missing_object() {
    let (client, _service) = setup();
    let err = get::run(&client, "bucket", "absent", None).await.unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn test_ls_groups_prefixes() {
    let (client, service) = setup();
    for key in ["a.txt", "docs/", "docs/readme", "docs/img/logo.png"] {
        service.insert("bucket", key, Bytes::from_static(b"x")).await;
    }

    let top = ls::run(&client, "bucket", "", false, None).await.unwrap();
    let names: Vec<&str> = top.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["a.txt", "docs/"]);
    assert_eq!(top[1].kind, EntryKind::Prefix);

    let inside = ls::run(&client, "bucket", "docs/", true, None).await.unwrap();
    let names: Vec<&str> = inside.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["docs/img/logo.png", "docs/readme"]);

    let buckets = ls::run_buckets(&client).await.unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].kind, EntryKind::Bucket);
}

#[tokio::test]
async fn test_rm_single_object() {
    let (client, service) = setup();
    service.insert("bucket", "a", Bytes::from_static(b"x")).await;

    assert_eq!(rm::run(&client, "bucket", "a", false).await.unwrap(), ["a"]);
    assert!(service.keys("bucket").await.is_empty());

    let err = rm::run(&client, "bucket", "a", false).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(rm::run(&client, "bucket", "a", true).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rm_recursive_removes_marker() {
    let (client, service) = setup();
    for key in ["dir/", "dir/a", "dir/sub/b", "other"] {
        service.insert("bucket", key, Bytes::from_static(b"x")).await;
    }

    let removed = rm::run_recursive(&client, "bucket", "dir").await.unwrap();
    assert_eq!(removed.len(), 3);
    assert_eq!(service.keys("bucket").await, ["other"]);
    assert_eq!(service.calls(Operation::DeleteObjects), 1);

    let err = rm::run_recursive(&client, "bucket", "dir").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_bucket_lifecycle() {
    let (client, _service) = setup();

    assert!(mb::run(&client, "fresh", false).await.unwrap());
    assert!(!mb::run(&client, "fresh", true).await.unwrap());
    let err = mb::run(&client, "fresh", false).await.unwrap_err();
    assert_eq!(err.code(), Code::AlreadyExists);

    put::run(&client, "fresh", "k", Bytes::from_static(b"v")).await.unwrap();
    let err = rb::run(&client, "fresh", false).await.unwrap_err();
    assert_eq!(err.code(), Code::FailedPrecondition);

    assert_eq!(rb::run(&client, "fresh", true).await.unwrap(), 1);
    let err = client.head_bucket("fresh").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_stat_reports_stored_size() {
    let (client, _service) = setup();
    put::run(&client, "bucket", "k", Bytes::from(vec![7u8; 4096])).await.unwrap();

    let output = stat::run(&client, "bucket", "k").await.unwrap();
    assert_eq!(output.name, "bucket/k");
    assert_eq!(output.size_bytes, 4096);
    assert!(!output.compressed);
}

#[test]
fn test_parse_global_flags_after_subcommand() {
    let cli = Cli::try_parse_from(["osc", "ls", "-r", "--json", "--bucket", "photos"]).unwrap();
    assert!(cli.json);
    assert_eq!(cli.bucket.as_deref(), Some("photos"));
    match cli.command {
        Commands::Ls(args) => {
            assert!(args.recursive);
            assert!(args.path.is_none());
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn test_parse_get_with_range() {
    let cli = Cli::try_parse_from(["osc", "get", "bucket/key", "out.bin", "--range", "bytes=0-9"])
        .unwrap();
    match cli.command {
        Commands::Get(args) => {
            assert_eq!(args.source, "bucket/key");
            assert_eq!(args.range.as_deref(), Some("bytes=0-9"));
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn test_parse_rejects_rm_without_paths() {
    assert!(Cli::try_parse_from(["osc", "rm"]).is_err());
}
