//! In-Memory Backend
//!
//! Object store held in process memory. Used for tests, development and as a
//! scratch tier; contents do not survive a restart.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use tracing::debug;

use super::{
    generate_storage_key, read_chunk, ByteSource, ByteStream, StorageError, StorageResult,
    DEFAULT_CHUNK_SIZE,
};
use crate::domain::StorageBackend;

/// In-memory backend statistics
#[derive(Debug, Clone, Default)]
pub struct BackendStats {
    /// Total objects stored
    pub object_count: u64,
    /// Total bytes stored
    pub total_bytes: u64,
    /// Read operations
    pub reads: u64,
    /// Write operations
    pub writes: u64,
    /// Delete operations
    pub deletes: u64,
}

/// In-memory storage backend.
///
/// Holds each object as one immutable buffer keyed by its storage key.
/// Downloads hand out `chunk_size` slices of that buffer. Contents are lost
/// when the backend is dropped.
pub struct InMemoryBackend {
    name: String,
    chunk_size: usize,
    objects: DashMap<String, Bytes>,
    object_count: AtomicU64,
    total_bytes: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl InMemoryBackend {
    /// Create a new in-memory backend with the default chunk size
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_chunk_size(name, DEFAULT_CHUNK_SIZE)
    }

    /// Create a new in-memory backend streaming downloads in `chunk_size` pieces
    pub fn with_chunk_size(name: impl Into<String>, chunk_size: usize) -> Self {
        Self {
            name: name.into(),
            chunk_size: chunk_size.max(1),
            objects: DashMap::new(),
            object_count: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    /// Chunk size used for transfers
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Get storage statistics
    pub fn stats(&self) -> BackendStats {
        BackendStats {
            object_count: self.object_count.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }

    /// Keys of every stored object
    pub fn keys(&self) -> Vec<String> {
        self.objects.iter().map(|e| e.key().clone()).collect()
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("name", &self.name)
            .field("chunk_size", &self.chunk_size)
            .field("objects", &self.objects.len())
            .finish()
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upload(
        &self,
        mut source: ByteSource,
        file_name: &str,
        _content_type: &str,
    ) -> StorageResult<String> {
        self.writes.fetch_add(1, Ordering::Relaxed);

        let mut data = BytesMut::new();
        while let Some(chunk) = read_chunk(&mut source, self.chunk_size)
            .await
            .map_err(StorageError::backend)?
        {
            data.extend_from_slice(&chunk);
        }

        let key = generate_storage_key(file_name);
        let size = data.len() as u64;
        self.objects.insert(key.clone(), data.freeze());
        self.object_count.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(size, Ordering::Relaxed);

        debug!(backend = %self.name, key = %key, size_bytes = size, "Object stored in memory");
        Ok(key)
    }

    async fn download(&self, key: &str) -> StorageResult<ByteStream> {
        self.reads.fetch_add(1, Ordering::Relaxed);

        let data = self
            .objects
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;

        // Slices share the stored buffer, so chunks are zero-copy
        let chunk_size = self.chunk_size;
        let len = data.len();
        let chunks = (0..len)
            .step_by(chunk_size)
            .map(move |start| Ok(data.slice(start..(start + chunk_size).min(len))));

        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        self.deletes.fetch_add(1, Ordering::Relaxed);

        match self.objects.remove(key) {
            Some((_, data)) => {
                self.object_count.fetch_sub(1, Ordering::Relaxed);
                self.total_bytes
                    .fetch_sub(data.len() as u64, Ordering::Relaxed);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.objects.contains_key(key))
    }
}
