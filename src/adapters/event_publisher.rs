//! Event Publishers
//!
//! The gateway's default publisher turns file events into structured log
//! records. Gaps between a backend and the metadata store go out at warn
//! level with the backend and storage key an operator needs to reconcile.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::domain::events::DomainEvent;
use crate::domain::ports::EventPublisher;
use crate::error::Result;

/// Publishes file events as tracing records with one field per event
/// attribute.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventPublisher;

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        match &event {
            DomainEvent::FileStored {
                file_id,
                backend,
                storage_key,
                size_bytes,
                ..
            } => info!(
                file_id = %file_id,
                backend = %backend,
                storage_key = %storage_key,
                size_bytes = *size_bytes,
                "File stored"
            ),
            DomainEvent::FileDeleted {
                file_id,
                backend,
                storage_key,
                ..
            } => info!(
                file_id = %file_id,
                backend = %backend,
                storage_key = %storage_key,
                "File deleted"
            ),
            DomainEvent::OrphanedObject {
                backend,
                storage_key,
                reason,
                ..
            } => warn!(
                backend = %backend,
                storage_key = %storage_key,
                reason = %reason,
                "Object stored without a metadata record"
            ),
            DomainEvent::DanglingRecord {
                file_id,
                backend,
                storage_key,
                reason,
                ..
            } => warn!(
                file_id = %file_id,
                backend = %backend,
                storage_key = %storage_key,
                reason = %reason,
                "Metadata record points at missing bytes"
            ),
        }

        Ok(())
    }
}

/// Keeps every published event so tests can assert on what the gateway
/// reported.
#[derive(Debug, Default)]
pub struct InMemoryEventCollector {
    events: parking_lot::RwLock<Vec<DomainEvent>>,
}

impl InMemoryEventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events of one type (`"FileStored"`, `"OrphanedObject"`, ...), in
    /// publish order.
    pub fn events_of_type(&self, event_type: &str) -> Vec<DomainEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }

    /// Orphaned objects and dangling records still awaiting an operator.
    pub fn unreconciled(&self) -> Vec<DomainEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.needs_reconciliation())
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventCollector {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        self.events.write().push(event);
        Ok(())
    }
}
