//! In-process object service
//!
//! Keeps buckets and objects in memory and behaves like a small S3-style
//! store: lexicographic listings, inclusive byte ranges, idempotent deletes.
//! Failures can be injected per operation, which is how the retry and
//! rename behavior is exercised in tests.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use jiff::Timestamp;
use tokio::sync::RwLock;

use crate::chunk::SMALL_CHUNK_SIZE;
use crate::error::{Code, Error, Result};
use crate::traits::{
    BucketInfo, FrameStream, GetFrame, GetMetadata, GetRequest, ListOptions, ObjectMetadata,
    ObjectService, PutAck, PutFrame,
};

pub use crate::traits::{COMPRESSED_METADATA_KEY, ORIGINAL_SIZE_METADATA_KEY};

/// Remote operations that can be counted and made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateBucket,
    DeleteBucket,
    ListBuckets,
    HeadBucket,
    PutObject,
    GetObject,
    DeleteObject,
    DeleteObjects,
    ListObjects,
    HeadObject,
    CopyObject,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    is_compressed: bool,
    original_size: u64,
    last_modified: Timestamp,
}

impl StoredObject {
    fn etag(&self) -> String {
        // Content-derived, good enough to tell writes apart
        let hash = self
            .data
            .iter()
            .fold(0xcbf2_9ce4_8422_2325u64, |acc, b| {
                (acc ^ u64::from(*b)).wrapping_mul(0x100_0000_01b3)
            });
        format!("\"{hash:016x}\"")
    }
}

#[derive(Debug)]
struct Bucket {
    created: Timestamp,
    objects: BTreeMap<String, StoredObject>,
}

impl Bucket {
    fn new() -> Self {
        Self {
            created: Timestamp::now(),
            objects: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Fault {
    code: Code,
    remaining: usize,
}

/// [`ObjectService`] backed by process memory
#[derive(Debug, Default)]
pub struct MemoryService {
    buckets: RwLock<BTreeMap<String, Bucket>>,
    faults: DashMap<Operation, Fault>,
    calls: DashMap<Operation, usize>,
}

impl MemoryService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an empty bucket already in place
    pub fn with_bucket(mut self, name: impl Into<String>) -> Self {
        self.buckets.get_mut().insert(name.into(), Bucket::new());
        self
    }

    /// Make the next `times` calls of `operation` fail with `code`
    pub fn fail(&self, operation: Operation, code: Code, times: usize) {
        self.faults.insert(
            operation,
            Fault {
                code,
                remaining: times,
            },
        );
    }

    /// Drop every pending injected failure
    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    /// Number of times `operation` has been invoked, failures included
    pub fn calls(&self, operation: Operation) -> usize {
        self.calls.get(&operation).map(|c| *c).unwrap_or(0)
    }

    /// Raw stored bytes and compression flag, bypassing the service surface
    pub async fn stored(&self, bucket: &str, key: &str) -> Option<(Bytes, bool)> {
        let buckets = self.buckets.read().await;
        buckets
            .get(bucket)?
            .objects
            .get(key)
            .map(|obj| (obj.data.clone(), obj.is_compressed))
    }

    /// Store an object directly, without going through a put stream
    pub async fn insert(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        let data: Bytes = data.into();
        let mut buckets = self.buckets.write().await;
        buckets
            .entry(bucket.to_string())
            .or_insert_with(Bucket::new)
            .objects
            .insert(
                key.to_string(),
                StoredObject {
                    original_size: data.len() as u64,
                    data,
                    is_compressed: false,
                    last_modified: Timestamp::now(),
                },
            );
    }

    /// Every key in `bucket`, in order
    pub async fn keys(&self, bucket: &str) -> Vec<String> {
        let buckets = self.buckets.read().await;
        buckets
            .get(bucket)
            .map(|b| b.objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn record(&self, operation: Operation) -> Result<()> {
        *self.calls.entry(operation).or_insert(0) += 1;

        if let Some(mut fault) = self.faults.get_mut(&operation)
            && fault.remaining > 0
        {
            fault.remaining -= 1;
            return Err(Error::remote(
                fault.code,
                format!("injected {operation} failure"),
            ));
        }
        Ok(())
    }
}

fn no_such_bucket(bucket: &str) -> Error {
    Error::not_found(format!("NoSuchBucket: {bucket}"))
}

fn no_such_key(key: &str) -> Error {
    Error::not_found(format!("NoSuchKey: {key}"))
}

/// Resolve `bytes=start-end`, `bytes=start-` or `bytes=-suffix` against an
/// object of `len` bytes into a half-open interval
fn resolve_range(range: &str, len: usize) -> Result<(usize, usize)> {
    let invalid = || Error::invalid_argument(format!("invalid range '{range}'"));

    let spec = range.strip_prefix("bytes=").ok_or_else(invalid)?;
    let (start, end) = spec.split_once('-').ok_or_else(invalid)?;

    let (start, end) = match (start.trim(), end.trim()) {
        ("", suffix) => {
            let suffix: usize = suffix.parse().map_err(|_| invalid())?;
            (len.saturating_sub(suffix), len)
        }
        (start, "") => (start.parse().map_err(|_| invalid())?, len),
        (start, end) => {
            let start: usize = start.parse().map_err(|_| invalid())?;
            let end: usize = end.parse().map_err(|_| invalid())?;
            if end < start {
                return Err(invalid());
            }
            (start, end.saturating_add(1).min(len))
        }
    };

    if start >= len && len > 0 {
        return Err(Error::remote(
            Code::OutOfRange,
            format!("range '{range}' starts beyond {len} bytes"),
        ));
    }
    Ok((start.min(len), end))
}

#[async_trait]
impl ObjectService for MemoryService {
    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        self.record(Operation::CreateBucket)?;
        let mut buckets = self.buckets.write().await;
        if buckets.contains_key(bucket) {
            return Err(Error::remote(
                Code::AlreadyExists,
                format!("BucketAlreadyOwnedByYou: {bucket}"),
            ));
        }
        buckets.insert(bucket.to_string(), Bucket::new());
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.record(Operation::DeleteBucket)?;
        let mut buckets = self.buckets.write().await;
        match buckets.get(bucket) {
            None => Err(no_such_bucket(bucket)),
            Some(b) if !b.objects.is_empty() => Err(Error::remote(
                Code::FailedPrecondition,
                format!("BucketNotEmpty: {bucket}"),
            )),
            Some(_) => {
                buckets.remove(bucket);
                Ok(())
            }
        }
    }

    async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        self.record(Operation::ListBuckets)?;
        let buckets = self.buckets.read().await;
        Ok(buckets
            .iter()
            .map(|(name, b)| BucketInfo {
                name: name.clone(),
                region: None,
                creation_date: Some(b.created),
            })
            .collect())
    }

    async fn head_bucket(&self, bucket: &str) -> Result<BucketInfo> {
        self.record(Operation::HeadBucket)?;
        let buckets = self.buckets.read().await;
        let b = buckets.get(bucket).ok_or_else(|| no_such_bucket(bucket))?;
        Ok(BucketInfo {
            name: bucket.to_string(),
            region: None,
            creation_date: Some(b.created),
        })
    }

    async fn put_object_stream(&self, mut frames: BoxStream<'static, PutFrame>) -> Result<PutAck> {
        self.record(Operation::PutObject)?;

        let params = match frames.next().await {
            Some(PutFrame::Parameters(params)) => params,
            Some(PutFrame::Chunk(_)) | None => {
                return Err(Error::invalid_argument(
                    "put stream must start with a parameters frame",
                ));
            }
        };

        let mut data = BytesMut::new();
        while let Some(frame) = frames.next().await {
            match frame {
                PutFrame::Chunk(chunk) => data.extend_from_slice(&chunk),
                PutFrame::Parameters(_) => {
                    return Err(Error::invalid_argument(
                        "put stream sent a second parameters frame",
                    ));
                }
            }
        }

        let mut buckets = self.buckets.write().await;
        let bucket = buckets
            .get_mut(&params.bucket)
            .ok_or_else(|| no_such_bucket(&params.bucket))?;
        let object = StoredObject {
            data: data.freeze(),
            is_compressed: params.is_compressed,
            original_size: params.original_size,
            last_modified: Timestamp::now(),
        };
        let etag = object.etag();
        bucket.objects.insert(params.key, object);

        Ok(PutAck { etag: Some(etag) })
    }

    async fn get_object_stream(&self, request: GetRequest) -> Result<FrameStream<GetFrame>> {
        self.record(Operation::GetObject)?;

        let object = {
            let buckets = self.buckets.read().await;
            let bucket = buckets
                .get(&request.bucket)
                .ok_or_else(|| no_such_bucket(&request.bucket))?;
            bucket
                .objects
                .get(&request.key)
                .cloned()
                .ok_or_else(|| no_such_key(&request.key))?
        };

        let body = match &request.range {
            Some(range) => {
                let (start, end) = resolve_range(range, object.data.len())?;
                object.data.slice(start..end)
            }
            None => object.data.clone(),
        };

        let metadata = GetMetadata {
            is_compressed: object.is_compressed,
        };
        let chunks = (0..body.len())
            .step_by(SMALL_CHUNK_SIZE)
            .map(move |start| {
                let end = (start + SMALL_CHUNK_SIZE).min(body.len());
                Ok(GetFrame::Chunk(body.slice(start..end)))
            });

        Ok(
            stream::iter(std::iter::once(Ok(GetFrame::Metadata(metadata))).chain(chunks))
                .boxed(),
        )
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.record(Operation::DeleteObject)?;
        let mut buckets = self.buckets.write().await;
        let b = buckets
            .get_mut(bucket)
            .ok_or_else(|| no_such_bucket(bucket))?;
        b.objects.remove(key);
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: Vec<String>) -> Result<usize> {
        self.record(Operation::DeleteObjects)?;
        let mut buckets = self.buckets.write().await;
        let b = buckets
            .get_mut(bucket)
            .ok_or_else(|| no_such_bucket(bucket))?;
        for key in &keys {
            b.objects.remove(key);
        }
        Ok(keys.len())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        options: ListOptions,
    ) -> Result<FrameStream<String>> {
        self.record(Operation::ListObjects)?;
        let buckets = self.buckets.read().await;
        let b = buckets.get(bucket).ok_or_else(|| no_such_bucket(bucket))?;

        let prefix = options.prefix.unwrap_or_default();
        let limit = match options.max_keys {
            Some(n) if n >= 0 => n as usize,
            _ => usize::MAX,
        };

        let keys: Vec<Result<String>> = b
            .objects
            .range(prefix.clone()..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(&prefix))
            .filter(|key| match &options.start_after {
                Some(after) => key.as_str() > after.as_str(),
                None => true,
            })
            .take(limit)
            .map(|key| Ok(key.clone()))
            .collect();

        Ok(stream::iter(keys).boxed())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMetadata> {
        self.record(Operation::HeadObject)?;
        let buckets = self.buckets.read().await;
        let b = buckets.get(bucket).ok_or_else(|| no_such_bucket(bucket))?;
        let object = b.objects.get(key).ok_or_else(|| no_such_key(key))?;

        let mut user_metadata = HashMap::new();
        user_metadata.insert(
            COMPRESSED_METADATA_KEY.to_string(),
            object.is_compressed.to_string(),
        );
        user_metadata.insert(
            ORIGINAL_SIZE_METADATA_KEY.to_string(),
            object.original_size.to_string(),
        );

        Ok(ObjectMetadata {
            content_type: Some("application/octet-stream".to_string()),
            content_encoding: object.is_compressed.then(|| "gzip".to_string()),
            etag: Some(object.etag()),
            size: object.data.len() as u64,
            last_modified: Some(object.last_modified),
            user_metadata,
            ..Default::default()
        })
    }

    async fn copy_object(&self, bucket: &str, copy_source: &str, key: &str) -> Result<()> {
        self.record(Operation::CopyObject)?;
        let (src_bucket, src_key) = copy_source.split_once('/').ok_or_else(|| {
            Error::invalid_argument(format!("copy source '{copy_source}' is not bucket/key"))
        })?;

        let mut buckets = self.buckets.write().await;
        let mut object = buckets
            .get(src_bucket)
            .ok_or_else(|| no_such_bucket(src_bucket))?
            .objects
            .get(src_key)
            .cloned()
            .ok_or_else(|| no_such_key(src_key))?;
        object.last_modified = Timestamp::now();

        buckets
            .get_mut(bucket)
            .ok_or_else(|| no_such_bucket(bucket))?
            .objects
            .insert(key.to_string(), object);
        Ok(())
    }
}
