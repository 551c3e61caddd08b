//! Domain Events
//!
//! Immutable records of significant occurrences in the gateway.
//!
//! Besides the regular lifecycle events, two events describe the known
//! inconsistency windows between the object stores and the metadata store:
//!
//! - [`DomainEvent::OrphanedObject`]: bytes were stored but the record could
//!   not be committed.
//! - [`DomainEvent::DanglingRecord`]: a record points at bytes that are gone.
//!
//! No compensation is attempted for either; the events exist so operators
//! can reconcile.
//!
//! # Example
//!
//! ```ignore
//! let event = DomainEvent::file_stored(record.id().as_str(), "primary", "2024/01/01/ab.bin", 1024);
//! event_publisher.publish(event).await?;
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Domain event representing a significant occurrence in the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    /// Bytes were stored and the record committed.
    FileStored {
        file_id: String,
        backend: String,
        storage_key: String,
        size_bytes: u64,
        timestamp: DateTime<Utc>,
    },

    /// Bytes and record were both removed.
    FileDeleted {
        file_id: String,
        backend: String,
        storage_key: String,
        timestamp: DateTime<Utc>,
    },

    /// A backend holds bytes without a corresponding record.
    OrphanedObject {
        backend: String,
        storage_key: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A record points at bytes that no longer exist on its backend.
    DanglingRecord {
        file_id: String,
        backend: String,
        storage_key: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::FileStored { timestamp, .. } => *timestamp,
            DomainEvent::FileDeleted { timestamp, .. } => *timestamp,
            DomainEvent::OrphanedObject { timestamp, .. } => *timestamp,
            DomainEvent::DanglingRecord { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::FileStored { .. } => "FileStored",
            DomainEvent::FileDeleted { .. } => "FileDeleted",
            DomainEvent::OrphanedObject { .. } => "OrphanedObject",
            DomainEvent::DanglingRecord { .. } => "DanglingRecord",
        }
    }

    /// Get the file ID if applicable.
    pub fn file_id(&self) -> Option<&str> {
        match self {
            DomainEvent::FileStored { file_id, .. } => Some(file_id),
            DomainEvent::FileDeleted { file_id, .. } => Some(file_id),
            DomainEvent::DanglingRecord { file_id, .. } => Some(file_id),
            DomainEvent::OrphanedObject { .. } => None,
        }
    }

    /// True for events reporting a gap between the backend and the metadata
    /// store that an operator has to reconcile.
    pub fn needs_reconciliation(&self) -> bool {
        matches!(
            self,
            DomainEvent::OrphanedObject { .. } | DomainEvent::DanglingRecord { .. }
        )
    }

    /// Get the backend name.
    pub fn backend(&self) -> &str {
        match self {
            DomainEvent::FileStored { backend, .. }
            | DomainEvent::FileDeleted { backend, .. }
            | DomainEvent::OrphanedObject { backend, .. }
            | DomainEvent::DanglingRecord { backend, .. } => backend,
        }
    }
}

// =============================================================================
// Event Builders
// =============================================================================

impl DomainEvent {
    /// Create a FileStored event.
    pub fn file_stored(
        file_id: impl Into<String>,
        backend: impl Into<String>,
        storage_key: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        DomainEvent::FileStored {
            file_id: file_id.into(),
            backend: backend.into(),
            storage_key: storage_key.into(),
            size_bytes,
            timestamp: Utc::now(),
        }
    }

    /// Create a FileDeleted event.
    pub fn file_deleted(
        file_id: impl Into<String>,
        backend: impl Into<String>,
        storage_key: impl Into<String>,
    ) -> Self {
        DomainEvent::FileDeleted {
            file_id: file_id.into(),
            backend: backend.into(),
            storage_key: storage_key.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create an OrphanedObject event.
    pub fn orphaned_object(
        backend: impl Into<String>,
        storage_key: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        DomainEvent::OrphanedObject {
            backend: backend.into(),
            storage_key: storage_key.into(),
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a DanglingRecord event.
    pub fn dangling_record(
        file_id: impl Into<String>,
        backend: impl Into<String>,
        storage_key: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        DomainEvent::DanglingRecord {
            file_id: file_id.into(),
            backend: backend.into(),
            storage_key: storage_key.into(),
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = DomainEvent::file_stored("file-123", "primary", "2024/01/01/ab.bin", 4096);

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("FileStored"));
        assert!(json.contains("file-123"));

        let deserialized: DomainEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.event_type(), "FileStored");
    }

    #[test]
    fn test_file_id_extraction() {
        let event = DomainEvent::file_deleted("file-456", "primary", "k");
        assert_eq!(event.file_id(), Some("file-456"));

        let orphan = DomainEvent::orphaned_object("secondary", "k", "commit failed");
        assert_eq!(orphan.file_id(), None);
        assert_eq!(orphan.backend(), "secondary");
        assert!(orphan.needs_reconciliation());
        assert!(!event.needs_reconciliation());
    }

    #[test]
    fn test_timestamp() {
        let before = Utc::now();
        let event = DomainEvent::dangling_record("file-1", "primary", "k", "metadata error");
        let after = Utc::now();

        assert!(event.timestamp() >= before);
        assert!(event.timestamp() <= after);
        assert_eq!(event.event_type(), "DanglingRecord");
    }
}
