//! S3 client implementation
//!
//! Wraps aws-sdk-s3 and implements the ObjectService trait from osc-core.
//! Put streams are gathered into a single `PutObject`; get streams are fed
//! straight from the response body.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use bytes::BytesMut;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};

use osc_core::config::EndpointConfig;
use osc_core::memory::{COMPRESSED_METADATA_KEY, ORIGINAL_SIZE_METADATA_KEY};
use osc_core::traits::{FrameStream, GetMetadata, PutAck};
use osc_core::{
    BucketInfo, Error, GetFrame, GetRequest, ListOptions, ObjectMetadata, ObjectService,
    PutFrame, Result,
};

use crate::error::classify;

/// Largest page S3 returns from one `ListObjectsV2` call
const MAX_PAGE_KEYS: usize = 1000;

/// S3 client wrapper
#[derive(Clone)]
pub struct S3Client {
    inner: aws_sdk_s3::Client,
}

impl S3Client {
    /// Create a client for the configured endpoint
    ///
    /// Credentials come from the SDK default provider chain (environment,
    /// shared profile, instance metadata).
    pub async fn new(endpoint: &EndpointConfig) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(endpoint.region.clone()));
        if let Some(url) = &endpoint.url {
            loader = loader.endpoint_url(url);
        }
        let config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&config)
            .force_path_style(endpoint.force_path_style)
            .build();

        tracing::debug!(
            endpoint = endpoint.url.as_deref().unwrap_or("default"),
            region = %endpoint.region,
            "configured S3 client"
        );

        Ok(Self::from_client(aws_sdk_s3::Client::from_conf(s3_config)))
    }

    /// Wrap an already configured SDK client
    pub fn from_client(inner: aws_sdk_s3::Client) -> Self {
        Self { inner }
    }

    /// Get the underlying aws-sdk-s3 client
    pub fn inner(&self) -> &aws_sdk_s3::Client {
        &self.inner
    }
}

fn timestamp(value: &aws_sdk_s3::primitives::DateTime) -> Option<jiff::Timestamp> {
    jiff::Timestamp::from_second(value.secs()).ok()
}

fn is_compressed(metadata: Option<&std::collections::HashMap<String, String>>) -> bool {
    metadata
        .and_then(|m| m.get(COMPRESSED_METADATA_KEY))
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Paging cursor for `ListObjectsV2`
struct ListCursor {
    client: aws_sdk_s3::Client,
    bucket: String,
    options: ListOptions,
    token: Option<String>,
    remaining: usize,
    done: bool,
}

impl ListCursor {
    async fn next_page(mut self) -> Result<Option<(Vec<String>, Self)>> {
        if self.done || self.remaining == 0 {
            return Ok(None);
        }

        let mut request = self.inner_request();
        if self.remaining < MAX_PAGE_KEYS {
            request = request.max_keys(self.remaining as i32);
        }
        if let Some(token) = &self.token {
            request = request.continuation_token(token);
        }

        let response = request.send().await.map_err(classify)?;

        let keys: Vec<String> = response
            .contents()
            .iter()
            .filter_map(|object| object.key().map(str::to_string))
            .take(self.remaining)
            .collect();

        self.remaining -= keys.len();
        self.token = response.next_continuation_token().map(str::to_string);
        self.done = !response.is_truncated().unwrap_or(false) || self.token.is_none();

        Ok(Some((keys, self)))
    }

    fn inner_request(&self) -> aws_sdk_s3::operation::list_objects_v2::builders::ListObjectsV2FluentBuilder {
        let mut request = self.client.list_objects_v2().bucket(&self.bucket);
        if let Some(prefix) = &self.options.prefix {
            request = request.prefix(prefix);
        }
        if let Some(start_after) = &self.options.start_after {
            request = request.start_after(start_after);
        }
        request
    }
}

#[async_trait]
impl ObjectService for S3Client {
    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        self.inner
            .create_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(classify)?;

        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.inner
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(classify)?;

        Ok(())
    }

    async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        let response = self.inner.list_buckets().send().await.map_err(classify)?;

        let buckets = response
            .buckets()
            .iter()
            .map(|b| BucketInfo {
                name: b.name().unwrap_or_default().to_string(),
                region: b.bucket_region().map(str::to_string),
                creation_date: b.creation_date().and_then(timestamp),
            })
            .collect();

        Ok(buckets)
    }

    async fn head_bucket(&self, bucket: &str) -> Result<BucketInfo> {
        let response = self
            .inner
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(classify)?;

        Ok(BucketInfo {
            name: bucket.to_string(),
            region: response.bucket_region().map(str::to_string),
            creation_date: None,
        })
    }

    async fn put_object_stream(&self, mut frames: BoxStream<'static, PutFrame>) -> Result<PutAck> {
        let params = match frames.next().await {
            Some(PutFrame::Parameters(params)) => params,
            Some(PutFrame::Chunk(_)) | None => {
                return Err(Error::invalid_argument(
                    "put stream must start with a parameters frame",
                ));
            }
        };

        let mut body = BytesMut::new();
        while let Some(frame) = frames.next().await {
            match frame {
                PutFrame::Chunk(chunk) => body.extend_from_slice(&chunk),
                PutFrame::Parameters(_) => {
                    return Err(Error::invalid_argument(
                        "put stream sent a second parameters frame",
                    ));
                }
            }
        }

        let size = body.len();
        let mut request = self
            .inner
            .put_object()
            .bucket(&params.bucket)
            .key(&params.key)
            .metadata(COMPRESSED_METADATA_KEY, params.is_compressed.to_string())
            .metadata(ORIGINAL_SIZE_METADATA_KEY, params.original_size.to_string())
            .body(ByteStream::from(body.freeze()));
        if params.is_compressed {
            request = request.content_encoding("gzip");
        }

        let response = request.send().await.map_err(classify)?;
        tracing::debug!(bucket = %params.bucket, key = %params.key, size, "stored object");

        Ok(PutAck {
            etag: response.e_tag().map(|etag| etag.trim_matches('"').to_string()),
        })
    }

    async fn get_object_stream(&self, request: GetRequest) -> Result<FrameStream<GetFrame>> {
        let mut builder = self
            .inner
            .get_object()
            .bucket(&request.bucket)
            .key(&request.key);
        if let Some(range) = &request.range {
            builder = builder.range(range);
        }

        let response = builder.send().await.map_err(classify)?;
        let metadata = GetMetadata {
            is_compressed: is_compressed(response.metadata()),
        };

        let chunks = stream::unfold(Some(response.body), |state| async move {
            let mut body = state?;
            match body.next().await {
                Some(Ok(bytes)) => Some((Ok(GetFrame::Chunk(bytes)), Some(body))),
                Some(Err(e)) => Some((
                    Err(Error::unavailable(format!("error reading object body: {e}"))),
                    None,
                )),
                None => None,
            }
        });

        Ok(stream::iter([Ok(GetFrame::Metadata(metadata))])
            .chain(chunks)
            .boxed())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.inner
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(classify)?;

        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: Vec<String>) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }

        let objects = keys
            .iter()
            .map(|k| ObjectIdentifier::builder().key(k).build())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::invalid_argument(e.to_string()))?;

        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(false)
            .build()
            .map_err(|e| Error::invalid_argument(e.to_string()))?;

        let response = self
            .inner
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(classify)?;

        if !response.errors().is_empty() {
            let failed: Vec<&str> = response.errors().iter().filter_map(|e| e.key()).collect();
            tracing::warn!(?failed, "failed to delete some objects");
        }

        Ok(response.deleted().len())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        options: ListOptions,
    ) -> Result<FrameStream<String>> {
        let remaining = match options.max_keys {
            Some(n) if n >= 0 => n as usize,
            _ => usize::MAX,
        };
        let cursor = ListCursor {
            client: self.inner.clone(),
            bucket: bucket.to_string(),
            options,
            token: None,
            remaining,
            done: false,
        };

        Ok(stream::try_unfold(cursor, ListCursor::next_page)
            .map_ok(|keys| stream::iter(keys.into_iter().map(Ok)))
            .try_flatten()
            .boxed())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMetadata> {
        let response = self
            .inner
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(classify)?;

        Ok(ObjectMetadata {
            content_type: response.content_type().map(str::to_string),
            content_encoding: response.content_encoding().map(str::to_string),
            content_language: response.content_language().map(str::to_string),
            etag: response.e_tag().map(|etag| etag.trim_matches('"').to_string()),
            version_id: response.version_id().map(str::to_string),
            server_side_encryption: response
                .server_side_encryption()
                .map(|sse| sse.as_str().to_string()),
            size: response.content_length().unwrap_or(0).max(0) as u64,
            last_modified: response.last_modified().and_then(timestamp),
            user_metadata: response.metadata().cloned().unwrap_or_default(),
        })
    }

    async fn copy_object(&self, bucket: &str, copy_source: &str, key: &str) -> Result<()> {
        self.inner
            .copy_object()
            .copy_source(copy_source)
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(classify)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_compressed_flag_from_metadata() {
        let mut metadata = HashMap::new();
        assert!(!is_compressed(None));
        assert!(!is_compressed(Some(&metadata)));

        metadata.insert(COMPRESSED_METADATA_KEY.to_string(), "true".to_string());
        assert!(is_compressed(Some(&metadata)));

        metadata.insert(COMPRESSED_METADATA_KEY.to_string(), "false".to_string());
        assert!(!is_compressed(Some(&metadata)));
    }

    #[test]
    fn test_timestamp_conversion() {
        let value = aws_sdk_s3::primitives::DateTime::from_secs(1_700_000_000);
        assert_eq!(
            timestamp(&value).map(|t| t.as_second()),
            Some(1_700_000_000)
        );
    }

    #[tokio::test]
    async fn test_from_client_keeps_configuration() {
        let config = aws_sdk_s3::config::Builder::new()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new("eu-west-1"))
            .force_path_style(true)
            .build();
        let client = S3Client::from_client(aws_sdk_s3::Client::from_conf(config));
        assert_eq!(
            client.inner().config().region().map(|r| r.as_ref()),
            Some("eu-west-1")
        );
    }
}
