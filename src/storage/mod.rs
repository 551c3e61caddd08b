//! Storage Backends
//!
//! Streaming transfer primitives shared by every backend, and the concrete
//! backend implementations.
//!
//! # Streaming discipline
//!
//! Uploads read the caller's [`ByteSource`] in chunks of at most
//! `chunk_size` bytes and downloads yield a [`ByteStream`] of chunks of at
//! most `chunk_size` bytes, so a transfer holds O(chunk size) memory
//! regardless of object size.
//!
//! # Keys
//!
//! Keys are `YYYY/MM/DD/<uuid><.ext>`: date-partitioned for lifecycle
//! housekeeping and unique per upload. The original extension is kept when
//! it is a short run of ASCII letters, digits, `-` or `_`.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::{Stream, TryStreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;
use uuid::Uuid;

use crate::config::BackendConfig;
use crate::domain::StorageBackend;
use crate::error::Result;

pub mod local;
pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;

pub use local::LocalFsBackend;
pub use memory::{BackendStats, InMemoryBackend};
#[cfg(feature = "s3")]
pub use s3::S3Backend;

/// Default transfer chunk size (4MB)
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Smallest accepted chunk size (64KB)
pub const MIN_CHUNK_SIZE: usize = 64 * 1024;

/// Longest file extension carried over into storage keys
const MAX_KEY_EXTENSION_LEN: usize = 16;

/// Caller-supplied upload body.
pub type ByteSource = Pin<Box<dyn AsyncRead + Send>>;

/// Live, lazily-read download body.
pub type ByteStream = BoxStream<'static, StorageResult<Bytes>>;

/// Result type for backend operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Errors raised by storage backends
#[derive(Error, Debug)]
pub enum StorageError {
    /// No object stored under the key
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Backend did not answer within the operation deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Key is not a valid locator for this backend
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    /// Network, protocol, I/O or unexpected-response failure
    #[error("Backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StorageError {
    /// Wrap any backend-side failure.
    pub fn backend(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        StorageError::Backend(err.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

// =============================================================================
// Byte Sources
// =============================================================================

/// Wrap any async reader as an upload body.
pub fn source_from_reader<R>(reader: R) -> ByteSource
where
    R: AsyncRead + Send + 'static,
{
    Box::pin(reader)
}

/// Upload body over an in-memory buffer.
pub fn source_from_bytes(data: impl Into<Bytes>) -> ByteSource {
    Box::pin(std::io::Cursor::new(data.into()))
}

/// Upload body over a stream of chunks, e.g. a request body.
pub fn source_from_stream<S>(stream: S) -> ByteSource
where
    S: Stream<Item = std::io::Result<Bytes>> + Send + 'static,
{
    Box::pin(StreamReader::new(stream))
}

/// Read up to `chunk_size` bytes from `source`.
///
/// Returns `None` once the source is exhausted. A returned chunk is shorter
/// than `chunk_size` only when the source ended inside it.
pub async fn read_chunk(
    source: &mut ByteSource,
    chunk_size: usize,
) -> std::io::Result<Option<Bytes>> {
    let mut buf = BytesMut::with_capacity(chunk_size);
    while buf.len() < chunk_size {
        let remaining = (chunk_size - buf.len()) as u64;
        let read = (&mut *source).take(remaining).read_buf(&mut buf).await?;
        if read == 0 {
            break;
        }
    }

    if buf.is_empty() {
        Ok(None)
    } else {
        Ok(Some(buf.freeze()))
    }
}

/// Drain a download stream into one buffer. Intended for tests and small
/// objects only; it defeats the chunked streaming bound.
pub async fn collect_stream(stream: ByteStream) -> StorageResult<Bytes> {
    let chunks: Vec<Bytes> = stream.try_collect().await?;
    let mut out = BytesMut::with_capacity(chunks.iter().map(Bytes::len).sum());
    for chunk in chunks {
        out.extend_from_slice(&chunk);
    }
    Ok(out.freeze())
}

// =============================================================================
// Keys
// =============================================================================

/// Generate a storage key for a new upload of `file_name`.
pub fn generate_storage_key(file_name: &str) -> String {
    let date = chrono::Utc::now().format("%Y/%m/%d");
    let token = Uuid::new_v4().simple();
    format!("{}/{}{}", date, token, key_extension(file_name))
}

/// Extension of `file_name` including the dot, or empty.
///
/// The extension is kept when it is at most 16 characters of ASCII
/// letters, digits, `-` or `_`. Anything else is dropped so keys stay valid
/// paths and object names on every backend.
fn key_extension(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| {
            !ext.is_empty()
                && ext.len() <= MAX_KEY_EXTENSION_LEN
                && ext
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        })
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default()
}

// =============================================================================
// Helpers
// =============================================================================

/// Run a backend operation under an optional deadline.
pub(crate) async fn with_deadline<T, F>(
    operation: &str,
    limit: Option<Duration>,
    fut: F,
) -> StorageResult<T>
where
    F: Future<Output = StorageResult<T>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout(format!(
                "{} exceeded {:?}",
                operation, limit
            ))),
        },
        None => fut.await,
    }
}

/// Build every configured backend.
pub async fn build_backends(configs: &[BackendConfig]) -> Result<Vec<Arc<dyn StorageBackend>>> {
    let mut backends: Vec<Arc<dyn StorageBackend>> = Vec::with_capacity(configs.len());

    for config in configs {
        let backend: Arc<dyn StorageBackend> = match config {
            BackendConfig::Local {
                name,
                root,
                chunk_size,
                operation_timeout_secs,
            } => Arc::new(
                LocalFsBackend::new(name.clone(), root.clone(), *chunk_size)
                    .await?
                    .with_operation_timeout(operation_timeout_secs.map(Duration::from_secs)),
            ),
            BackendConfig::Memory { name, chunk_size } => {
                Arc::new(InMemoryBackend::with_chunk_size(name.clone(), *chunk_size))
            }
            #[cfg(feature = "s3")]
            BackendConfig::S3 {
                name,
                bucket,
                region,
                endpoint_url,
                chunk_size,
                operation_timeout_secs,
            } => Arc::new(
                S3Backend::connect(s3::S3BackendConfig {
                    name: name.clone(),
                    bucket: bucket.clone(),
                    region: region.clone(),
                    endpoint_url: endpoint_url.clone(),
                    chunk_size: *chunk_size,
                    operation_timeout: operation_timeout_secs.map(Duration::from_secs),
                })
                .await?,
            ),
            #[cfg(not(feature = "s3"))]
            BackendConfig::S3 { name, .. } => {
                return Err(crate::error::Error::Config(format!(
                    "backend '{}' requires the `s3` feature",
                    name
                )));
            }
        };

        tracing::info!(backend = %backend.name(), kind = config.kind(), "Storage backend ready");
        backends.push(backend);
    }

    Ok(backends)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        let key = generate_storage_key("a.bin");
        let parts: Vec<&str> = key.split('/').collect();

        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0].len(), 4);
        assert_eq!(parts[1].len(), 2);
        assert_eq!(parts[2].len(), 2);
        assert!(parts[3].ends_with(".bin"));
        assert_eq!(parts[3].len(), 32 + ".bin".len());
    }

    #[test]
    fn test_keys_are_unique() {
        let a = generate_storage_key("report.pdf");
        let b = generate_storage_key("report.pdf");
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_extension() {
        assert_eq!(key_extension("a.bin"), ".bin");
        assert_eq!(key_extension("archive.tar.gz"), ".gz");
        assert_eq!(key_extension("README"), "");
        assert_eq!(key_extension(".hidden"), "");
        assert_eq!(key_extension("a.tar-gz"), ".tar-gz");
        assert_eq!(key_extension("photo.raw_2"), ".raw_2");
        assert_eq!(key_extension("weird.ex t"), "");
        assert_eq!(key_extension("odd.a%2Fb"), "");
        assert_eq!(key_extension("../../etc/passwd"), "");
        assert_eq!(key_extension("x.averyveryverylongextension"), "");
    }

    #[tokio::test]
    async fn test_read_chunk_bounded() {
        let mut source = source_from_bytes(vec![7u8; 10_000]);

        let mut sizes = Vec::new();
        while let Some(chunk) = read_chunk(&mut source, 4096).await.unwrap() {
            sizes.push(chunk.len());
        }

        assert_eq!(sizes, vec![4096, 4096, 1808]);
    }

    #[tokio::test]
    async fn test_read_chunk_from_fragmented_stream() {
        let pieces = (0..10).map(|i| Ok(Bytes::from(vec![i as u8; 3])));
        let mut source = source_from_stream(futures::stream::iter(pieces));

        let first = read_chunk(&mut source, 8).await.unwrap().unwrap();
        assert_eq!(first.len(), 8);
        let second = read_chunk(&mut source, 8).await.unwrap().unwrap();
        assert_eq!(second.len(), 8);
        let third = read_chunk(&mut source, 8).await.unwrap().unwrap();
        assert_eq!(third.len(), 8);
        let fourth = read_chunk(&mut source, 8).await.unwrap().unwrap();
        assert_eq!(fourth.len(), 6);
        assert!(read_chunk(&mut source, 8).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deadline_maps_to_timeout() {
        let result: StorageResult<()> = with_deadline(
            "download",
            Some(Duration::from_millis(10)),
            futures::future::pending(),
        )
        .await;

        assert!(matches!(result, Err(StorageError::Timeout(_))));
    }
}
