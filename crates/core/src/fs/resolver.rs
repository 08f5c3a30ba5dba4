//! Name resolution against a flat key space
//!
//! Buckets have no directories. A name is a directory when a `name/` marker
//! object exists or when any key lives under `name/`.

use std::sync::Arc;

use crate::client::TransportClient;
use crate::error::Result;
use crate::fs::cache::{ExistenceCache, Presence};
use crate::path;
use crate::traits::ListOptions;

/// Outcome of resolving a name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Absent,
    File(String),
    Directory(String),
}

impl Resolution {
    fn from_presence(path: String, presence: Presence) -> Self {
        match presence {
            Presence { exists: false, .. } => Resolution::Absent,
            Presence { is_dir: true, .. } => Resolution::Directory(path),
            Presence { is_dir: false, .. } => Resolution::File(path),
        }
    }

    fn presence(&self) -> Presence {
        match self {
            Resolution::Absent => Presence::ABSENT,
            Resolution::File(_) => Presence::FILE,
            Resolution::Directory(_) => Presence::DIRECTORY,
        }
    }
}

pub struct PathResolver {
    client: TransportClient,
    bucket: String,
    cache: Arc<ExistenceCache>,
}

impl PathResolver {
    pub fn new(client: TransportClient, bucket: impl Into<String>, cache: Arc<ExistenceCache>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            cache,
        }
    }

    /// Resolve `name` inside the directory at `parent`
    pub async fn resolve(&self, parent: &str, name: &str) -> Result<Resolution> {
        if path::is_reserved(name) {
            return Ok(Resolution::Absent);
        }
        self.resolve_path(path::join(parent, name)).await
    }

    /// Resolve a full logical path
    ///
    /// Not-found answers from the service are verdicts; any other failure is
    /// returned and leaves the cache untouched.
    pub async fn resolve_path(&self, full_path: String) -> Result<Resolution> {
        if path::is_reserved(path::file_name(&full_path)) {
            return Ok(Resolution::Absent);
        }

        if let Some(presence) = self.cache.get(&full_path) {
            tracing::debug!(path = %full_path, ?presence, "lookup served from cache");
            return Ok(Resolution::from_presence(full_path, presence));
        }

        let resolution = self.resolve_remote(full_path.clone()).await?;
        tracing::debug!(path = %full_path, ?resolution, "lookup resolved remotely");
        self.cache.insert(full_path, resolution.presence());
        Ok(resolution)
    }

    async fn resolve_remote(&self, full_path: String) -> Result<Resolution> {
        if self.exists(&full_path).await? {
            return Ok(Resolution::File(full_path));
        }

        if self.exists(&path::marker_key(&full_path)).await? {
            return Ok(Resolution::Directory(full_path));
        }

        let children = self
            .client
            .list_objects(
                &self.bucket,
                ListOptions::with_prefix(path::dir_prefix(&full_path)).max_keys(1),
            )
            .await?;
        if !children.is_empty() {
            return Ok(Resolution::Directory(full_path));
        }

        Ok(Resolution::Absent)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self.client.head_object(&self.bucket, key).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryService, Operation};
    use bytes::Bytes;

    async fn resolver_with(keys: &[&str]) -> (PathResolver, Arc<MemoryService>) {
        let service = Arc::new(MemoryService::new().with_bucket("bucket"));
        for key in keys {
            service.insert("bucket", key, Bytes::new()).await;
        }
        let client = TransportClient::new(service.clone());
        let resolver = PathResolver::new(client, "bucket", Arc::new(ExistenceCache::default()));
        (resolver, service)
    }

    #[tokio::test]
    async fn test_file_explicit_and_implicit_directories() {
        let (resolver, _) = resolver_with(&["f.txt", "marked/", "implied/deep/x"]).await;

        assert_eq!(
            resolver.resolve("", "f.txt").await.unwrap(),
            Resolution::File("f.txt".into())
        );
        assert_eq!(
            resolver.resolve("", "marked").await.unwrap(),
            Resolution::Directory("marked".into())
        );
        assert_eq!(
            resolver.resolve("", "implied").await.unwrap(),
            Resolution::Directory("implied".into())
        );
        assert_eq!(
            resolver.resolve("implied", "deep").await.unwrap(),
            Resolution::Directory("implied/deep".into())
        );
        assert_eq!(resolver.resolve("", "nope").await.unwrap(), Resolution::Absent);
    }

    #[tokio::test]
    async fn test_reserved_names_skip_remote_and_cache() {
        let (resolver, service) = resolver_with(&[".Trash"]).await;

        assert_eq!(resolver.resolve("", ".Trash").await.unwrap(), Resolution::Absent);
        assert_eq!(service.calls(Operation::HeadObject), 0);
        assert!(resolver.cache.is_empty());
    }

    #[tokio::test]
    async fn test_negative_verdict_is_cached() {
        let (resolver, service) = resolver_with(&[]).await;

        assert_eq!(resolver.resolve("", "ghost").await.unwrap(), Resolution::Absent);
        let heads = service.calls(Operation::HeadObject);
        assert_eq!(heads, 2);
        assert_eq!(service.calls(Operation::ListObjects), 1);

        assert_eq!(resolver.resolve("", "ghost").await.unwrap(), Resolution::Absent);
        assert_eq!(service.calls(Operation::HeadObject), heads);
    }

    #[tokio::test]
    async fn test_remote_failure_is_not_cached() {
        let (resolver, service) = resolver_with(&["f"]).await;
        service.fail(
            Operation::HeadObject,
            crate::error::Code::PermissionDenied,
            1,
        );

        assert!(resolver.resolve("", "f").await.is_err());
        assert!(resolver.cache.is_empty());
        assert_eq!(
            resolver.resolve("", "f").await.unwrap(),
            Resolution::File("f".into())
        );
    }
}
