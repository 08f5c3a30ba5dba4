//! Transport client
//!
//! Wraps an [`ObjectService`] and turns each logical operation into framed
//! streams run under a [`BackoffExecutor`]. Uploads are compressed when the
//! estimator says it pays off and split into chunks sized by
//! [`plan_chunk_size`]; downloads are reassembled in arrival order and
//! inflated when the service marks them compressed.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;

use crate::chunk::plan_chunk_size;
use crate::compression::{self, CompressionEstimator};
use crate::config::Config;
use crate::error::{Code, Error, Result};
use crate::retry::{BackoffExecutor, RetryPolicy};
use crate::traits::{
    BucketInfo, GetFrame, GetRequest, ListOptions, ObjectMetadata, ObjectService, PutFrame,
    PutParameters,
};

/// Streaming, retrying client for an object storage service
#[derive(Clone)]
pub struct TransportClient {
    service: Arc<dyn ObjectService>,
    executor: BackoffExecutor,
    estimator: CompressionEstimator,
}

impl TransportClient {
    /// Create a client with the default retry policy and compression settings
    pub fn new(service: Arc<dyn ObjectService>) -> Self {
        Self {
            service,
            executor: BackoffExecutor::default(),
            estimator: CompressionEstimator::default(),
        }
    }

    /// Create a client tuned by the `[retry]` and `[transfer]` sections
    pub fn from_config(service: Arc<dyn ObjectService>, config: &Config) -> Self {
        Self::new(service)
            .with_retry_policy(config.retry.policy())
            .with_estimator(CompressionEstimator::new(
                config.transfer.compression_threshold,
                config.transfer.compression_benefit_ratio,
            ))
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.executor = BackoffExecutor::new(policy, self.executor.cancellation().clone());
        self
    }

    pub fn with_estimator(mut self, estimator: CompressionEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    /// Bind the client to a cancellation signal shared with its caller
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.executor = BackoffExecutor::new(*self.executor.policy(), cancel);
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        self.executor.cancellation()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        self.executor.policy()
    }

    pub async fn create_bucket(&self, bucket: &str) -> Result<()> {
        self.executor
            .execute_unit(|| async {
                self.service
                    .create_bucket(bucket)
                    .await
                    .map_err(|e| bucket_error(e, bucket, "failed to create bucket"))
            })
            .await
    }

    pub async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.executor
            .execute_unit(|| async {
                self.service
                    .delete_bucket(bucket)
                    .await
                    .map_err(|e| bucket_error(e, bucket, "failed to delete bucket"))
            })
            .await
    }

    pub async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        self.executor
            .execute(|| async {
                self.service
                    .list_buckets()
                    .await
                    .map_err(|e| e.context("failed to list buckets"))
            })
            .await
    }

    pub async fn head_bucket(&self, bucket: &str) -> Result<BucketInfo> {
        self.executor
            .execute(|| async {
                self.service
                    .head_bucket(bucket)
                    .await
                    .map_err(|e| bucket_error(e, bucket, "failed to head bucket"))
            })
            .await
    }

    /// Upload `data` to `bucket/key`
    ///
    /// The compression decision is made once; every retry re-sends the
    /// parameters frame and all chunks from the start.
    pub async fn put_object(&self, bucket: &str, key: &str, data: impl Into<Bytes>) -> Result<()> {
        let data = data.into();
        let original_len = data.len();
        let (payload, is_compressed) = self.estimator.compress_if_beneficial(data)?;
        let chunk_size = plan_chunk_size(payload.len());

        tracing::debug!(
            bucket,
            key,
            size = original_len,
            sent = payload.len(),
            is_compressed,
            chunk_size,
            "put object"
        );

        self.executor
            .execute_unit(|| {
                let params = PutParameters {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    is_compressed,
                    original_size: original_len as u64,
                };
                let frames = put_frames(params, payload.clone(), chunk_size);
                async move {
                    self.service
                        .put_object_stream(frames)
                        .await
                        .map(|_| ())
                        .map_err(|e| e.context("failed to put object"))
                }
            })
            .await
    }

    /// Download the whole object at `bucket/key`
    pub async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
        self.fetch(GetRequest {
            bucket: bucket.to_string(),
            key: key.to_string(),
            range: None,
        })
        .await
    }

    /// Download part of an object; `range` is a `bytes=start-end` expression
    /// honored by the service
    ///
    /// Ranges address stored bytes, so a range over an object that was
    /// uploaded compressed fails with [`Error::Compression`].
    pub async fn get_object_range(&self, bucket: &str, key: &str, range: &str) -> Result<Bytes> {
        self.fetch(GetRequest {
            bucket: bucket.to_string(),
            key: key.to_string(),
            range: Some(range.to_string()),
        })
        .await
    }

    async fn fetch(&self, request: GetRequest) -> Result<Bytes> {
        tracing::debug!(
            bucket = %request.bucket,
            key = %request.key,
            range = ?request.range,
            "get object"
        );
        self.executor
            .execute(|| {
                let request = request.clone();
                async move { self.receive(request).await }
            })
            .await
    }

    async fn receive(&self, request: GetRequest) -> Result<Bytes> {
        let ranged = request.range.is_some();
        let mut frames = self
            .service
            .get_object_stream(request)
            .await
            .map_err(|e| e.context("failed to start get stream"))?;

        let is_compressed = match frames.next().await {
            Some(Ok(GetFrame::Metadata(meta))) => meta.is_compressed,
            Some(Ok(GetFrame::Chunk(_))) => {
                return Err(Error::invalid_argument(
                    "get stream sent a chunk before the metadata frame",
                ));
            }
            Some(Err(e)) => return Err(e.context("error receiving metadata")),
            None => {
                return Err(Error::invalid_argument(
                    "get stream ended before the metadata frame",
                ));
            }
        };

        if is_compressed && ranged {
            return Err(Error::Compression(
                "byte range requested on a compressed object".to_string(),
            ));
        }

        let mut buf = BytesMut::new();
        while let Some(frame) = frames.next().await {
            match frame.map_err(|e| e.context("error receiving chunk"))? {
                GetFrame::Chunk(chunk) => buf.extend_from_slice(&chunk),
                GetFrame::Metadata(_) => {
                    return Err(Error::invalid_argument(
                        "get stream sent a second metadata frame",
                    ));
                }
            }
        }

        if is_compressed {
            Ok(Bytes::from(compression::decompress(&buf)?))
        } else {
            Ok(buf.freeze())
        }
    }

    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        tracing::debug!(bucket, key, "delete object");
        self.executor
            .execute_unit(|| async {
                self.service
                    .delete_object(bucket, key)
                    .await
                    .map_err(|e| e.context("failed to delete object"))
            })
            .await
    }

    /// Delete `keys`; succeeds only if every deletion is confirmed
    pub async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        self.executor
            .execute_unit(|| async {
                let deleted = self
                    .service
                    .delete_objects(bucket, keys.to_vec())
                    .await
                    .map_err(|e| e.context("failed to delete objects"))?;
                if deleted != keys.len() {
                    return Err(Error::PartialDelete {
                        requested: keys.len(),
                        deleted,
                    });
                }
                Ok(())
            })
            .await
    }

    /// Collect the keys matching `options`
    pub async fn list_objects(&self, bucket: &str, options: ListOptions) -> Result<Vec<String>> {
        self.executor
            .execute(|| {
                let options = options.clone();
                async move {
                    let keys = self
                        .service
                        .list_objects(bucket, options)
                        .await
                        .map_err(|e| e.context("failed to list objects"))?;
                    keys.try_collect::<Vec<_>>()
                        .await
                        .map_err(|e| e.context("error receiving key"))
                }
            })
            .await
    }

    pub async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMetadata> {
        self.executor
            .execute(|| async {
                self.service
                    .head_object(bucket, key)
                    .await
                    .map_err(|e| e.context("failed to head object"))
            })
            .await
    }

    /// Server-side copy of `copy_source` (`bucket/key`) to `bucket/key`
    pub async fn copy_object(&self, bucket: &str, copy_source: &str, key: &str) -> Result<()> {
        self.executor
            .execute_unit(|| async {
                self.service
                    .copy_object(bucket, copy_source, key)
                    .await
                    .map_err(|e| e.context("failed to copy object"))
            })
            .await
    }
}

/// Parameters frame followed by `payload` cut into `chunk_size` slices
fn put_frames(
    params: PutParameters,
    payload: Bytes,
    chunk_size: usize,
) -> BoxStream<'static, PutFrame> {
    let len = payload.len();
    let chunks = (0..len)
        .step_by(chunk_size)
        .map(move |start| PutFrame::Chunk(payload.slice(start..(start + chunk_size).min(len))));

    stream::iter(std::iter::once(PutFrame::Parameters(params)).chain(chunks)).boxed()
}

fn bucket_error(err: Error, bucket: &str, action: &str) -> Error {
    match err.code() {
        Code::NotFound => err.context(&format!("bucket does not exist: {bucket}")),
        Code::PermissionDenied => err.context(&format!("access to bucket denied: {bucket}")),
        Code::InvalidArgument => err.context(&format!("invalid bucket name: {bucket}")),
        _ => err.context(action),
    }
}
