//! Metadata Store
//!
//! In-memory implementation of the [`MetadataStore`] port. Records live in a
//! sharded concurrent map, so reads and writes on different identifiers never
//! contend on one lock and each identifier sees its operations in a single
//! total order.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::domain::{FileId, FileRecord, MetadataStore};
use crate::error::{Error, Result};

/// DashMap-backed file record store
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    records: DashMap<FileId, FileRecord>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn insert(&self, record: FileRecord) -> Result<()> {
        match self.records.entry(record.id().clone()) {
            Entry::Occupied(existing) => Err(Error::Metadata(format!(
                "file id {} is already taken",
                existing.key()
            ))),
            Entry::Vacant(slot) => {
                debug!(file_id = %record.id(), backend = %record.backend(), "Record committed");
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn get(&self, id: &FileId) -> Result<Option<FileRecord>> {
        Ok(self.records.get(id).map(|entry| entry.value().clone()))
    }

    async fn remove(&self, id: &FileId) -> Result<bool> {
        Ok(self.records.remove(id).is_some())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.records.len() as u64)
    }
}
