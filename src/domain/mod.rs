//! Domain Layer
//!
//! File records, the ports the transfer pipelines depend on, and the domain
//! events they emit.
//!
//! - **Model** (`model.rs`) - File identifiers and immutable file records
//! - **Ports** (`ports.rs`) - Trait abstractions for storage backends, the
//!   metadata store and event publishing
//! - **Events** (`events.rs`) - Domain events for audit and reconciliation
//!
//! # Usage
//!
//! ```ignore
//! use filegate::domain::{MetadataStore, StorageBackend};
//!
//! async fn locate<M: MetadataStore>(metadata: &M, id: &FileId) -> Result<String> {
//!     let record = metadata.get(id).await?.ok_or_else(|| Error::NotFound(id.clone()))?;
//!     Ok(record.storage_key().to_string())
//! }
//! ```

pub mod events;
pub mod model;
pub mod ports;

pub use events::DomainEvent;
pub use model::{FileId, FileInfo, FileRecord};
pub use ports::{EventPublisher, MetadataStore, StorageBackend};
