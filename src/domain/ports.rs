//! Domain Ports (Port/Adapter Pattern)
//!
//! Core abstractions the transfer pipelines depend on. Infrastructure
//! adapters implement these traits to provide concrete implementations.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Gateway Pipelines                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │  StorageBackend │ MetadataStore │ EventPublisher    │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │  LocalFs │ InMemory │ S3 │ InMemoryMetadataStore    │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;

use super::events::DomainEvent;
use super::model::{FileId, FileRecord};
use crate::error::Result;
use crate::storage::{ByteSource, ByteStream, StorageResult};

// =============================================================================
// Storage Backend Port
// =============================================================================

/// Port for a durable byte store addressed by opaque keys.
///
/// Implementations move bytes in bounded chunks so that a transfer of an
/// N-byte object holds O(chunk size) memory, not O(N).
///
/// Object-not-found is reported as [`StorageError::NotFound`] on download,
/// and as `Ok(false)` on delete and exists. Every other failure, timeouts
/// included, is an error carrying its cause.
///
/// [`StorageError::NotFound`]: crate::storage::StorageError::NotFound
#[async_trait]
pub trait StorageBackend: Send + Sync + std::fmt::Debug {
    /// Unique name of this backend within the registry.
    fn name(&self) -> &str;

    /// Stream `source` into the store and return the generated storage key.
    async fn upload(
        &self,
        source: ByteSource,
        file_name: &str,
        content_type: &str,
    ) -> StorageResult<String>;

    /// Open a lazily-read byte stream for `key`.
    ///
    /// The caller owns the stream; dropping it releases the underlying
    /// resource.
    async fn download(&self, key: &str) -> StorageResult<ByteStream>;

    /// Remove the object. Returns true iff an object existed and was removed.
    async fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;
}

// =============================================================================
// Metadata Store Port
// =============================================================================

/// Port for the file record store.
///
/// Implementations must be safe for concurrent reads, inserts and removals
/// without external locking, and linearizable per key.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Commit a new record. Fails if the identifier is already present.
    async fn insert(&self, record: FileRecord) -> Result<()>;

    /// Look up a record.
    async fn get(&self, id: &FileId) -> Result<Option<FileRecord>>;

    /// Remove a record. Returns true if it was present.
    async fn remove(&self, id: &FileId) -> Result<bool>;

    /// Number of committed records.
    async fn count(&self) -> Result<u64>;
}

// =============================================================================
// Event Publisher Port
// =============================================================================

/// Port for publishing domain events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a single event.
    async fn publish(&self, event: DomainEvent) -> Result<()>;
}
