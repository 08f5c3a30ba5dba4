//! ObjectService trait definition
//!
//! This trait is the remote operation surface the transport client is built
//! on. It mirrors the streaming RPC service of an object storage cache: puts
//! are client-streamed (one parameters frame, then chunk frames) and gets are
//! server-streamed (one metadata frame, then chunk frames). Connection setup
//! and authentication happen before a service value exists.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// User metadata key recording whether the stored bytes are gzip data
pub const COMPRESSED_METADATA_KEY: &str = "osc-compressed";

/// User metadata key recording the size of the object before compression
pub const ORIGINAL_SIZE_METADATA_KEY: &str = "osc-original-size";

/// Ordered stream of frames received from the service
pub type FrameStream<T> = BoxStream<'static, Result<T>>;

/// First frame of every put stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutParameters {
    pub bucket: String,
    pub key: String,
    /// Whether the chunk frames that follow carry gzip data
    pub is_compressed: bool,
    /// Length of the payload before compression
    pub original_size: u64,
}

/// One message of a put stream
#[derive(Debug, Clone, PartialEq)]
pub enum PutFrame {
    Parameters(PutParameters),
    Chunk(Bytes),
}

/// Acknowledgement returned once a put stream is closed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutAck {
    pub etag: Option<String>,
}

/// Request that opens a get stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetRequest {
    pub bucket: String,
    pub key: String,
    /// Byte range expression (`bytes=start-end`), passed through untouched
    pub range: Option<String>,
}

/// First frame of every get stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetMetadata {
    pub is_compressed: bool,
}

/// One message of a get stream
#[derive(Debug, Clone, PartialEq)]
pub enum GetFrame {
    Metadata(GetMetadata),
    Chunk(Bytes),
}

/// Options for list operations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Prefix to filter by
    pub prefix: Option<String>,

    /// Only return keys lexicographically after this one
    pub start_after: Option<String>,

    /// Maximum number of keys to return
    pub max_keys: Option<i32>,
}

impl ListOptions {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..Default::default()
        }
    }

    pub fn max_keys(mut self, max_keys: i32) -> Self {
        self.max_keys = Some(max_keys);
        self
    }

    pub fn start_after(mut self, key: impl Into<String>) -> Self {
        self.start_after = Some(key.into());
        self
    }
}

/// Bucket description
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketInfo {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<Timestamp>,
}

impl BucketInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Metadata snapshot returned by a head call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_language: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_side_encryption: Option<String>,

    /// Stored size in bytes
    pub size: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<Timestamp>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub user_metadata: HashMap<String, String>,
}

impl ObjectMetadata {
    /// Whether the stored bytes are gzip data written by this client
    pub fn is_compressed(&self) -> bool {
        self.user_metadata
            .get(COMPRESSED_METADATA_KEY)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    /// Size a reader sees after decompression.
    ///
    /// `None` when the object is compressed but carries no recorded
    /// original size.
    pub fn logical_size(&self) -> Option<u64> {
        if !self.is_compressed() {
            return Some(self.size);
        }
        self.user_metadata
            .get(ORIGINAL_SIZE_METADATA_KEY)
            .and_then(|v| v.parse().ok())
    }
}

/// Remote operations of an object storage service
///
/// Implemented by the S3 adapter and by the in-memory service; mocked in
/// tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectService: Send + Sync {
    /// Create a bucket
    async fn create_bucket(&self, bucket: &str) -> Result<()>;

    /// Delete a bucket
    async fn delete_bucket(&self, bucket: &str) -> Result<()>;

    /// List buckets
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>>;

    /// Get bucket metadata
    async fn head_bucket(&self, bucket: &str) -> Result<BucketInfo>;

    /// Consume a put stream: one parameters frame followed by chunk frames.
    /// The end of `frames` closes the send side.
    async fn put_object_stream(&self, frames: BoxStream<'static, PutFrame>) -> Result<PutAck>;

    /// Open a get stream: one metadata frame followed by chunk frames
    async fn get_object_stream(&self, request: GetRequest) -> Result<FrameStream<GetFrame>>;

    /// Delete one object
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    /// Delete several objects, returning how many deletions were confirmed
    async fn delete_objects(&self, bucket: &str, keys: Vec<String>) -> Result<usize>;

    /// Stream the keys of a bucket in lexicographic order
    async fn list_objects(&self, bucket: &str, options: ListOptions)
    -> Result<FrameStream<String>>;

    /// Get object metadata
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMetadata>;

    /// Copy `copy_source` (`bucket/key`) to `key` in `bucket`
    async fn copy_object(&self, bucket: &str, copy_source: &str, key: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_options_builder() {
        let options = ListOptions::with_prefix("a/").max_keys(1).start_after("a/b");
        assert_eq!(options.prefix.as_deref(), Some("a/"));
        assert_eq!(options.max_keys, Some(1));
        assert_eq!(options.start_after.as_deref(), Some("a/b"));
    }

    #[test]
    fn test_metadata_serialization_skips_empty_fields() {
        let meta = ObjectMetadata {
            size: 12,
            etag: Some("abc".into()),
            ..Default::default()
        };
        let rendered = toml::to_string(&meta).unwrap();
        assert!(rendered.contains("size = 12"));
        assert!(rendered.contains("etag = \"abc\""));
        assert!(!rendered.contains("content_type"));
        assert!(!rendered.contains("user_metadata"));
    }

    #[test]
    fn test_logical_size() {
        let mut meta = ObjectMetadata {
            size: 40,
            ..Default::default()
        };
        assert_eq!(meta.logical_size(), Some(40));

        meta.user_metadata
            .insert(COMPRESSED_METADATA_KEY.to_string(), "true".to_string());
        assert_eq!(meta.logical_size(), None);

        meta.user_metadata
            .insert(ORIGINAL_SIZE_METADATA_KEY.to_string(), "4096".to_string());
        assert_eq!(meta.logical_size(), Some(4096));
    }
}
