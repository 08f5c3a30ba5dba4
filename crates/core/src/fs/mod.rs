//! Filesystem view of a bucket
//!
//! [`FilesystemAdapter`] turns POSIX-style requests into object operations.
//! Directories are emulated from key prefixes and zero-length `name/`
//! markers. Every entry point runs under one adapter-wide lock, so requests
//! are served one at a time, including their remote round trips.

pub mod cache;
pub mod node;
pub mod resolver;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::{Bytes, BytesMut};
use tokio::sync::Mutex;

use crate::client::TransportClient;
use crate::error::{Code, Error, Result};
use crate::path;
use crate::traits::ListOptions;

pub use cache::{ExistenceCache, Presence};
pub use node::{DirEntry, FileHandle, Node, NodeAttr, NodeKind};
pub use resolver::{PathResolver, Resolution};

/// Mounted view of one bucket
pub struct FilesystemAdapter {
    client: TransportClient,
    bucket: String,
    resolver: PathResolver,
    cache: Arc<ExistenceCache>,
    lock: Mutex<()>,
}

impl FilesystemAdapter {
    pub fn new(client: TransportClient, bucket: impl Into<String>) -> Self {
        Self::with_cache(client, bucket, Arc::new(ExistenceCache::default()))
    }

    /// Build an adapter around a caller-supplied cache
    pub fn with_cache(
        client: TransportClient,
        bucket: impl Into<String>,
        cache: Arc<ExistenceCache>,
    ) -> Self {
        let bucket = bucket.into();
        Self {
            resolver: PathResolver::new(client.clone(), bucket.clone(), cache.clone()),
            client,
            bucket,
            cache,
            lock: Mutex::new(()),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn cache(&self) -> &Arc<ExistenceCache> {
        &self.cache
    }

    pub fn client(&self) -> &TransportClient {
        &self.client
    }

    /// Attributes of `node`; files are refreshed with a head call
    pub async fn getattr(&self, node: &Node) -> Result<NodeAttr> {
        let _guard = self.lock.lock().await;
        match node {
            Node::Directory { .. } => Ok(NodeAttr::directory()),
            Node::File { path, .. } => self.file_attr(path).await,
        }
    }

    /// Find `name` inside `parent`
    pub async fn lookup(&self, parent: &Node, name: &str) -> Result<Node> {
        let _guard = self.lock.lock().await;
        let parent = expect_dir(parent)?;

        match self.resolver.resolve(parent, name).await? {
            Resolution::File(path) => Ok(Node::file(path)),
            Resolution::Directory(path) => Ok(Node::directory(path)),
            Resolution::Absent => Err(Error::not_found(format!(
                "no such entry: {}",
                path::join(parent, name)
            ))),
        }
    }

    /// Open a file after checking that it still exists
    pub async fn open(&self, node: &Node) -> Result<FileHandle> {
        let _guard = self.lock.lock().await;
        let Node::File { path, .. } = node else {
            return Err(Error::IsADirectory(node.path().to_string()));
        };

        let attr = self.file_attr(path).await?;
        tracing::debug!(path = %path, size = attr.size, "opened file");
        Ok(FileHandle::new(path.clone(), attr.size, attr.mtime))
    }

    /// Create an empty file and open it
    pub async fn create(&self, parent: &Node, name: &str) -> Result<(Node, FileHandle)> {
        let _guard = self.lock.lock().await;
        let parent = expect_dir(parent)?;
        check_new_name(name)?;

        let full_path = path::join(parent, name);
        self.client
            .put_object(&self.bucket, &full_path, Bytes::new())
            .await?;
        self.cache.insert(full_path.clone(), Presence::FILE);

        let now = SystemTime::now();
        tracing::debug!(path = %full_path, "created file");
        Ok((
            Node::File {
                path: full_path.clone(),
                size: 0,
                mtime: Some(now),
            },
            FileHandle::new(full_path, 0, now),
        ))
    }

    /// Write `data` at `offset`
    ///
    /// The object is rewritten in full: existing bytes before `offset` are
    /// kept (zero-filled if the object is shorter) and the object ends at
    /// `offset + data.len()`.
    pub async fn write(&self, handle: &mut FileHandle, offset: u64, data: &[u8]) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let offset = usize::try_from(offset).map_err(|_| {
            Error::remote(Code::OutOfRange, format!("write offset {offset} too large"))
        })?;

        let payload = if offset == 0 {
            Bytes::copy_from_slice(data)
        } else {
            let current = self.fetch_or_empty(&handle.path).await?;
            let mut buf = BytesMut::with_capacity(offset + data.len());
            buf.extend_from_slice(&current[..offset.min(current.len())]);
            buf.resize(offset, 0);
            buf.extend_from_slice(data);
            buf.freeze()
        };

        self.client
            .put_object(&self.bucket, &handle.path, payload.clone())
            .await?;
        self.cache.insert(handle.path.clone(), Presence::FILE);

        handle.size = payload.len() as u64;
        handle.mtime = SystemTime::now();
        tracing::debug!(path = %handle.path, offset, len = data.len(), size = handle.size, "wrote file");
        Ok(data.len())
    }

    /// Cut or zero-extend a file to `size` bytes
    pub async fn truncate(&self, node: &Node, size: u64) -> Result<NodeAttr> {
        let _guard = self.lock.lock().await;
        let Node::File { path, .. } = node else {
            return Err(Error::IsADirectory(node.path().to_string()));
        };
        let size = usize::try_from(size).map_err(|_| {
            Error::remote(Code::OutOfRange, format!("truncate size {size} too large"))
        })?;

        let current = self.fetch_or_empty(path).await?;
        if current.len() != size {
            let mut buf = BytesMut::from(&current[..size.min(current.len())]);
            buf.resize(size, 0);
            self.client
                .put_object(&self.bucket, path, buf.freeze())
                .await?;
            self.cache.insert(path.clone(), Presence::FILE);
        }
        Ok(NodeAttr::file(size as u64, SystemTime::now()))
    }

    /// Read up to `size` bytes at `offset`; past the end yields nothing
    pub async fn read(&self, handle: &FileHandle, offset: u64, size: u32) -> Result<Bytes> {
        let _guard = self.lock.lock().await;
        let data = self.client.get_object(&self.bucket, &handle.path).await?;

        let len = data.len() as u64;
        if offset >= len {
            return Ok(Bytes::new());
        }
        let end = offset.saturating_add(u64::from(size)).min(len);
        Ok(data.slice(offset as usize..end as usize))
    }

    pub async fn flush(&self, handle: &FileHandle) -> Result<()> {
        let _guard = self.lock.lock().await;
        tracing::debug!(path = %handle.path, "flush");
        Ok(())
    }

    pub async fn release(&self, handle: FileHandle) -> Result<()> {
        let _guard = self.lock.lock().await;
        tracing::debug!(path = %handle.path, size = handle.size, "released file");
        Ok(())
    }

    /// Remove a file, or an empty directory when `is_dir` is set
    pub async fn remove(&self, parent: &Node, name: &str, is_dir: bool) -> Result<()> {
        let _guard = self.lock.lock().await;
        let parent = expect_dir(parent)?;
        let full_path = path::join(parent, name);

        if is_dir {
            let marker = path::marker_key(&full_path);
            let keys = self
                .client
                .list_objects(
                    &self.bucket,
                    ListOptions::with_prefix(path::dir_prefix(&full_path)),
                )
                .await?;
            if keys.is_empty() {
                return Err(Error::not_found(format!("no such directory: {full_path}")));
            }
            if keys.iter().any(|key| *key != marker) {
                return Err(Error::NotEmpty(full_path));
            }

            self.client.delete_object(&self.bucket, &marker).await?;
            self.cache.invalidate_tree(&full_path);
        } else {
            self.client.head_object(&self.bucket, &full_path).await?;
            self.client.delete_object(&self.bucket, &full_path).await?;
            self.cache.invalidate(&full_path);
        }

        tracing::debug!(path = %full_path, is_dir, "removed");
        Ok(())
    }

    /// Create a directory by writing its zero-length marker
    pub async fn mkdir(&self, parent: &Node, name: &str) -> Result<Node> {
        let _guard = self.lock.lock().await;
        let parent = expect_dir(parent)?;
        check_new_name(name)?;

        let full_path = path::join(parent, name);
        self.client
            .put_object(&self.bucket, &path::marker_key(&full_path), Bytes::new())
            .await?;
        self.cache.insert(full_path.clone(), Presence::DIRECTORY);

        tracing::debug!(path = %full_path, "created directory");
        Ok(Node::directory(full_path))
    }

    /// Entries of a directory, `.` first
    pub async fn readdir(&self, dir: &Node) -> Result<Vec<DirEntry>> {
        let _guard = self.lock.lock().await;
        let prefix = path::dir_prefix(expect_dir(dir)?);

        let keys = self
            .client
            .list_objects(&self.bucket, ListOptions::with_prefix(prefix.clone()))
            .await?;
        Ok(group_children(&prefix, &keys))
    }

    /// Move `parent/name` to `new_parent/new_name`
    ///
    /// Fetch, write, then delete. A failure after the write leaves both the
    /// source and the destination in place.
    pub async fn rename(
        &self,
        parent: &Node,
        name: &str,
        new_parent: &Node,
        new_name: &str,
    ) -> Result<()> {
        let _guard = self.lock.lock().await;
        let old_path = path::join(expect_dir(parent)?, name);
        let new_path = path::join(expect_dir(new_parent)?, new_name);
        check_new_name(new_name)?;

        let result = self.move_object(&old_path, &new_path).await;
        self.cache.invalidate_tree(&old_path);
        self.cache.invalidate_tree(&new_path);
        result
    }

    async fn move_object(&self, old_path: &str, new_path: &str) -> Result<()> {
        let (source, destination, data) = match self.client.get_object(&self.bucket, old_path).await
        {
            Ok(data) => (old_path.to_string(), new_path.to_string(), data),
            Err(e) if e.is_not_found() => {
                let marker = path::marker_key(old_path);
                let data = self.client.get_object(&self.bucket, &marker).await?;
                (marker, path::marker_key(new_path), data)
            }
            Err(e) => return Err(e),
        };

        self.client
            .put_object(&self.bucket, &destination, data)
            .await?;
        self.client.delete_object(&self.bucket, &source).await?;

        tracing::debug!(from = %source, to = %destination, "renamed");
        Ok(())
    }

    async fn file_attr(&self, path: &str) -> Result<NodeAttr> {
        let meta = self.client.head_object(&self.bucket, path).await?;
        let mtime = meta
            .last_modified
            .map(SystemTime::from)
            .unwrap_or_else(SystemTime::now);
        let size = match meta.logical_size() {
            Some(size) => size,
            // Compressed without a recorded size: only a full read knows
            None => self.client.get_object(&self.bucket, path).await?.len() as u64,
        };
        Ok(NodeAttr::file(size, mtime))
    }

    async fn fetch_or_empty(&self, path: &str) -> Result<Bytes> {
        match self.client.get_object(&self.bucket, path).await {
            Ok(data) => Ok(data),
            Err(e) if e.is_not_found() => Ok(Bytes::new()),
            Err(e) => Err(e),
        }
    }
}

fn expect_dir(node: &Node) -> Result<&str> {
    match node {
        Node::Directory { path } => Ok(path),
        Node::File { path, .. } => Err(Error::NotADirectory(path.clone())),
    }
}

fn check_new_name(name: &str) -> Result<()> {
    path::validate_name(name)?;
    if path::is_reserved(name) {
        return Err(Error::remote(
            Code::PermissionDenied,
            format!("'{name}' is a reserved name"),
        ));
    }
    Ok(())
}

/// Group the keys under `prefix` into immediate children
fn group_children(prefix: &str, keys: &[String]) -> Vec<DirEntry> {
    let mut entries = vec![DirEntry::new(".", NodeKind::Directory)];
    let mut seen = HashSet::new();

    for key in keys {
        let Some(remainder) = key.strip_prefix(prefix) else {
            continue;
        };
        if remainder.is_empty() {
            continue;
        }

        let mut components = remainder.split('/');
        let Some(first) = components.next().filter(|c| !c.is_empty()) else {
            continue;
        };
        if !seen.insert(first) {
            continue;
        }

        let is_dir = components.next().is_some() || key.ends_with('/');
        let kind = if is_dir {
            NodeKind::Directory
        } else {
            NodeKind::File
        };
        entries.push(DirEntry::new(first, kind));
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryService, Operation};

    fn names(entries: &[DirEntry]) -> Vec<(&str, NodeKind)> {
        entries.iter().map(|e| (e.name.as_str(), e.kind)).collect()
    }

    fn keys(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    async fn adapter_with(keys: &[&str]) -> (FilesystemAdapter, Arc<MemoryService>) {
        let service = Arc::new(MemoryService::new().with_bucket("bucket"));
        for key in keys {
            service.insert("bucket", key, Bytes::from(key.to_string())).await;
        }
        let adapter = FilesystemAdapter::new(TransportClient::new(service.clone()), "bucket");
        (adapter, service)
    }

    #[test]
    fn test_group_children() {
        let entries = group_children("", &keys(&["a/b", "a/c/d", "top.txt", "dir/"]));
        assert_eq!(
            names(&entries),
            vec![
                (".", NodeKind::Directory),
                ("a", NodeKind::Directory),
                ("top.txt", NodeKind::File),
                ("dir", NodeKind::Directory),
            ]
        );
    }

    #[test]
    fn test_group_children_skips_marker_and_duplicates() {
        let entries = group_children("a/", &keys(&["a/", "a/b", "a/c/d", "a/c/e", "a/c/"]));
        assert_eq!(
            names(&entries),
            vec![
                (".", NodeKind::Directory),
                ("b", NodeKind::File),
                ("c", NodeKind::Directory),
            ]
        );
    }

    #[test]
    fn test_group_children_empty_directory() {
        let entries = group_children("empty/", &keys(&["empty/"]));
        assert_eq!(names(&entries), vec![(".", NodeKind::Directory)]);
    }

    #[tokio::test]
    async fn test_lookup_in_file_is_not_a_directory() {
        let (adapter, _) = adapter_with(&["f"]).await;
        let err = adapter.lookup(&Node::file("f"), "x").await.unwrap_err();
        assert_eq!(err.errno(), libc::ENOTDIR);
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let (adapter, _) = adapter_with(&[]).await;
        let err = adapter.open(&Node::file("gone")).await.unwrap_err();
        assert_eq!(err.errno(), libc::ENOENT);
    }

    #[tokio::test]
    async fn test_open_directory_is_rejected() {
        let (adapter, _) = adapter_with(&["d/"]).await;
        let err = adapter.open(&Node::directory("d")).await.unwrap_err();
        assert_eq!(err.errno(), libc::EISDIR);
    }

    #[tokio::test]
    async fn test_write_at_offset_extends_object() {
        let (adapter, service) = adapter_with(&[]).await;
        let (_, mut handle) = adapter.create(&Node::root(), "f").await.unwrap();

        adapter.write(&mut handle, 0, b"hello").await.unwrap();
        adapter.write(&mut handle, 5, b" world").await.unwrap();
        assert_eq!(handle.size, 11);

        let (data, _) = service.stored("bucket", "f").await.unwrap();
        assert_eq!(&data[..], b"hello world");
    }

    #[tokio::test]
    async fn test_write_past_end_zero_fills() {
        let (adapter, service) = adapter_with(&[]).await;
        let (_, mut handle) = adapter.create(&Node::root(), "f").await.unwrap();

        adapter.write(&mut handle, 3, b"x").await.unwrap();
        let (data, _) = service.stored("bucket", "f").await.unwrap();
        assert_eq!(&data[..], b"\0\0\0x");
    }

    #[tokio::test]
    async fn test_write_at_zero_replaces_object() {
        let (adapter, service) = adapter_with(&["f"]).await;
        let mut handle = adapter.open(&Node::file("f")).await.unwrap();

        adapter.write(&mut handle, 0, b"Z").await.unwrap();
        let (data, _) = service.stored("bucket", "f").await.unwrap();
        assert_eq!(&data[..], b"Z");
    }

    #[tokio::test]
    async fn test_truncate() {
        let (adapter, service) = adapter_with(&["file"]).await;

        adapter.truncate(&Node::file("file"), 2).await.unwrap();
        assert_eq!(&service.stored("bucket", "file").await.unwrap().0[..], b"fi");

        adapter.truncate(&Node::file("file"), 4).await.unwrap();
        assert_eq!(
            &service.stored("bucket", "file").await.unwrap().0[..],
            b"fi\0\0"
        );

        let puts = service.calls(Operation::PutObject);
        adapter.truncate(&Node::file("file"), 4).await.unwrap();
        assert_eq!(service.calls(Operation::PutObject), puts);
    }

    #[tokio::test]
    async fn test_read_bounds() {
        let (adapter, _) = adapter_with(&["0123456789"]).await;
        let handle = adapter.open(&Node::file("0123456789")).await.unwrap();

        assert_eq!(&adapter.read(&handle, 2, 3).await.unwrap()[..], b"234");
        assert_eq!(&adapter.read(&handle, 8, 100).await.unwrap()[..], b"89");
        assert!(adapter.read(&handle, 10, 4).await.unwrap().is_empty());
        assert!(adapter.read(&handle, 1 << 40, 4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_updates_cached_negative_lookup() {
        let (adapter, _) = adapter_with(&[]).await;
        let root = Node::root();

        assert!(adapter.lookup(&root, "new").await.unwrap_err().is_not_found());
        adapter.create(&root, "new").await.unwrap();
        assert_eq!(
            adapter.lookup(&root, "new").await.unwrap(),
            Node::file("new")
        );
    }

    #[tokio::test]
    async fn test_remove_file_and_directory() {
        let (adapter, service) = adapter_with(&["d/", "f"]).await;
        let root = Node::root();

        adapter.remove(&root, "f", false).await.unwrap();
        adapter.remove(&root, "d", true).await.unwrap();
        assert!(service.keys("bucket").await.is_empty());

        let err = adapter.remove(&root, "f", false).await.unwrap_err();
        assert!(err.is_not_found());
        let err = adapter.remove(&root, "d", true).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_reserved_names_cannot_be_created() {
        let (adapter, _) = adapter_with(&[]).await;
        let err = adapter.mkdir(&Node::root(), ".Trash").await.unwrap_err();
        assert_eq!(err.errno(), libc::EACCES);
    }

    #[tokio::test]
    async fn test_getattr_reports_remote_size() {
        let (adapter, _) = adapter_with(&["abc"]).await;
        let attr = adapter.getattr(&Node::file("abc")).await.unwrap();
        assert_eq!(attr.kind, NodeKind::File);
        assert_eq!(attr.size, 3);

        let attr = adapter.getattr(&Node::root()).await.unwrap();
        assert_eq!(attr.kind, NodeKind::Directory);
        assert_eq!(attr.perm, 0o755);
    }
}
