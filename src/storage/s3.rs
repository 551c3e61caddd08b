//! S3-Compatible Backend
//!
//! Object storage on AWS S3 or any S3-compatible service (MinIO, Ceph RGW).
//! Objects larger than one chunk go through a multipart upload with one part
//! per chunk; a failed multipart upload is aborted so no parts linger.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream as S3Body;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;
use futures::StreamExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info};

use super::{
    generate_storage_key, read_chunk, with_deadline, ByteSource, ByteStream, StorageError,
    StorageResult,
};
use crate::domain::StorageBackend;
use crate::error::{Error, Result};

/// Smallest part S3 accepts in a multipart upload, except for the last one
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// S3 backend configuration
#[derive(Debug, Clone)]
pub struct S3BackendConfig {
    /// Backend name within the registry
    pub name: String,
    /// Target bucket
    pub bucket: String,
    /// Region (or region identifier for S3-compatible providers)
    pub region: String,
    /// Custom endpoint, e.g. "http://localhost:9000" for MinIO
    pub endpoint_url: Option<String>,
    /// Part size for multipart uploads and read buffer for downloads
    pub chunk_size: usize,
    /// Upper bound for each backend call
    pub operation_timeout: Option<Duration>,
}

/// S3-compatible storage backend
#[derive(Debug, Clone)]
pub struct S3Backend {
    name: String,
    client: Client,
    bucket: String,
    chunk_size: usize,
    operation_timeout: Option<Duration>,
}

impl S3Backend {
    /// Connect using the default AWS credential chain.
    pub async fn connect(config: S3BackendConfig) -> Result<Self> {
        if config.bucket.trim().is_empty() {
            return Err(Error::Config(format!(
                "backend '{}': bucket name is required",
                config.name
            )));
        }

        let region_provider =
            RegionProviderChain::first_try(aws_config::Region::new(config.region.clone()));
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint_url {
            // Path-style addressing is required by MinIO and most compatibles
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self::with_client(config, Client::from_conf(builder.build())))
    }

    /// Build from an existing client.
    pub fn with_client(config: S3BackendConfig, client: Client) -> Self {
        Self {
            name: config.name,
            client,
            bucket: config.bucket,
            chunk_size: config.chunk_size.max(MIN_PART_SIZE),
            operation_timeout: config.operation_timeout,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_single(&self, key: &str, content_type: &str, body: Bytes) -> StorageResult<()> {
        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(S3Body::from(body))
            .send();

        with_deadline("put_object", self.operation_timeout, async {
            request.await.map(|_| ()).map_err(sdk_failure)
        })
        .await
    }

    async fn put_multipart(
        &self,
        key: &str,
        content_type: &str,
        first: Bytes,
        source: &mut ByteSource,
    ) -> StorageResult<u64> {
        let create = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send();
        let created = with_deadline("create_multipart_upload", self.operation_timeout, async {
            create.await.map_err(sdk_failure)
        })
        .await?;

        let upload_id = created
            .upload_id()
            .ok_or_else(|| StorageError::backend("no upload id returned for multipart upload"))?
            .to_string();

        match self.upload_parts(key, &upload_id, first, source).await {
            Ok(total) => Ok(total),
            Err(e) => {
                let abort = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await;
                if let Err(abort_err) = abort {
                    error!(
                        backend = %self.name,
                        key = %key,
                        error = %DisplayErrorContext(&abort_err),
                        "Failed to abort multipart upload"
                    );
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        first: Bytes,
        source: &mut ByteSource,
    ) -> StorageResult<u64> {
        let mut parts = Vec::new();
        let mut part_number = 1i32;
        let mut total = 0u64;
        let mut next = Some(first);

        while let Some(chunk) = next.take() {
            total += chunk.len() as u64;

            let request = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(S3Body::from(chunk))
                .send();
            let uploaded = with_deadline("upload_part", self.operation_timeout, async {
                request.await.map_err(sdk_failure)
            })
            .await?;

            let etag = uploaded.e_tag().ok_or_else(|| {
                StorageError::backend(format!("no ETag returned for part {}", part_number))
            })?;
            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(etag)
                    .build(),
            );

            part_number += 1;
            next = read_chunk(source, self.chunk_size)
                .await
                .map_err(StorageError::backend)?;
        }

        let complete = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send();
        with_deadline("complete_multipart_upload", self.operation_timeout, async {
            complete.await.map_err(sdk_failure)
        })
        .await?;

        Ok(total)
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upload(
        &self,
        mut source: ByteSource,
        file_name: &str,
        content_type: &str,
    ) -> StorageResult<String> {
        let key = generate_storage_key(file_name);
        let start = std::time::Instant::now();

        let first = read_chunk(&mut source, self.chunk_size)
            .await
            .map_err(StorageError::backend)?
            .unwrap_or_default();

        let size = if first.len() < self.chunk_size {
            // The whole object fits in one chunk
            let size = first.len() as u64;
            self.put_single(&key, content_type, first).await?;
            size
        } else {
            self.put_multipart(&key, content_type, first, &mut source)
                .await?
        };

        info!(
            backend = %self.name,
            bucket = %self.bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 upload successful"
        );
        Ok(key)
    }

    async fn download(&self, key: &str) -> StorageResult<ByteStream> {
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send();

        let response = with_deadline("get_object", self.operation_timeout, async {
            request.await.map_err(|e| {
                let missing = e
                    .as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false);
                if missing {
                    StorageError::NotFound(key.to_string())
                } else {
                    sdk_failure(e)
                }
            })
        })
        .await?;

        debug!(backend = %self.name, key = %key, "S3 download opened");

        let stream = ReaderStream::with_capacity(response.body.into_async_read(), self.chunk_size)
            .map(|chunk| chunk.map_err(StorageError::backend));
        Ok(Box::pin(stream))
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        // S3 deletes are idempotent, so probe first to report whether the
        // object existed
        if !self.exists(key).await? {
            return Ok(false);
        }

        let request = self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send();
        with_deadline("delete_object", self.operation_timeout, async {
            request.await.map_err(sdk_failure)
        })
        .await?;

        Ok(true)
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let request = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send();

        with_deadline("head_object", self.operation_timeout, async {
            match request.await {
                Ok(_) => Ok(true),
                Err(e) => {
                    let missing = e
                        .as_service_error()
                        .map(|se| se.is_not_found())
                        .unwrap_or(false);
                    if missing {
                        Ok(false)
                    } else {
                        Err(sdk_failure(e))
                    }
                }
            }
        })
        .await
    }
}

/// Map an SDK error onto the storage taxonomy, keeping the full context.
fn sdk_failure<E, R>(err: SdkError<E, R>) -> StorageError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match &err {
        SdkError::TimeoutError(_) => {
            StorageError::Timeout(format!("{}", DisplayErrorContext(&err)))
        }
        _ => StorageError::backend(format!("{}", DisplayErrorContext(&err))),
    }
}
