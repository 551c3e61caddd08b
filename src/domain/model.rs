//! File Records
//!
//! Value objects describing stored files independently of their bytes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Globally unique, opaque file identifier (value object).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    /// Generate a fresh identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for FileId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for FileId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Metadata for one stored object.
///
/// Records are immutable: every field is fixed at construction and only
/// exposed through getters. The backend name in particular never changes, so
/// reads and deletes always target the backend that received the upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    id: FileId,
    file_name: String,
    content_type: String,
    size: u64,
    storage_key: String,
    backend: String,
    uploaded_at: DateTime<Utc>,
    tags: Option<String>,
}

impl FileRecord {
    /// Create a record for bytes that were just stored under `storage_key`
    /// on `backend`. A new identifier and creation timestamp are assigned.
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        size: u64,
        storage_key: impl Into<String>,
        backend: impl Into<String>,
        tags: Option<String>,
    ) -> Self {
        Self {
            id: FileId::generate(),
            file_name: file_name.into(),
            content_type: content_type.into(),
            size,
            storage_key: storage_key.into(),
            backend: backend.into(),
            uploaded_at: Utc::now(),
            tags,
        }
    }

    pub fn id(&self) -> &FileId {
        &self.id
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Caller-declared size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    /// Name of the backend holding the bytes.
    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn uploaded_at(&self) -> DateTime<Utc> {
        self.uploaded_at
    }

    pub fn tags(&self) -> Option<&str> {
        self.tags.as_deref()
    }

    /// Externally visible projection of the record.
    pub fn info(&self) -> FileInfo {
        FileInfo {
            id: self.id.clone(),
            file_name: self.file_name.clone(),
            content_type: self.content_type.clone(),
            size: self.size,
            uploaded_at: self.uploaded_at,
        }
    }
}

/// File description returned by upload and info lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub id: FileId,
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
}
