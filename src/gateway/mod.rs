//! Transfer Pipelines
//!
//! [`FileGateway`] runs uploads, downloads, info lookups and deletions by
//! composing admission control, backend selection, streaming transfer and
//! metadata bookkeeping.
//!
//! # Consistency
//!
//! The backend and the metadata store are not transactionally linked. If a
//! record cannot be committed after its bytes were stored, the object is
//! left orphaned and an [`DomainEvent::OrphanedObject`] is published. If a
//! record cannot be removed after its bytes were deleted, it is left
//! dangling and a [`DomainEvent::DanglingRecord`] is published. Nothing is
//! rolled back.

mod stream;

pub use stream::PermitStream;

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::adapters::LoggingEventPublisher;
use crate::admission::{AdmissionController, AdmissionSnapshot, OperationClass};
use crate::config::GatewayConfig;
use crate::domain::{
    DomainEvent, EventPublisher, FileId, FileInfo, FileRecord, MetadataStore, StorageBackend,
};
use crate::error::{Error, Result};
use crate::metadata::InMemoryMetadataStore;
use crate::selector::{build_selector, BackendSelector};
use crate::storage::{build_backends, ByteSource, ByteStream};

// =============================================================================
// Requests and Responses
// =============================================================================

/// A file to store
pub struct UploadRequest {
    /// Upload body
    pub source: ByteSource,
    /// Original file name
    pub file_name: String,
    /// Declared content type
    pub content_type: String,
    /// Declared size in bytes; recorded as given
    pub declared_size: u64,
    /// Free-form tags
    pub tags: Option<String>,
}

impl UploadRequest {
    pub fn new(
        source: ByteSource,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        declared_size: u64,
    ) -> Self {
        Self {
            source,
            file_name: file_name.into(),
            content_type: content_type.into(),
            declared_size,
            tags: None,
        }
    }

    pub fn with_tags(mut self, tags: impl Into<String>) -> Self {
        self.tags = Some(tags.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.file_name.trim().is_empty() {
            return Err(Error::InvalidInput("file name must not be empty".into()));
        }
        if self.content_type.trim().is_empty() {
            return Err(Error::InvalidInput("content type must not be empty".into()));
        }
        if self.declared_size == 0 {
            return Err(Error::InvalidInput("declared size must be positive".into()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadRequest")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("declared_size", &self.declared_size)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

/// An open download.
///
/// The download slot is held by `stream` until it is drained, fails or is
/// dropped.
pub struct FileDownload {
    pub stream: ByteStream,
    pub content_type: String,
    pub file_name: String,
    /// Declared size from the file record
    pub size: u64,
}

impl std::fmt::Debug for FileDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileDownload")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Upload pipeline stage, reported when a run fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    Validating,
    AdmissionWait,
    Selecting,
    Transferring,
    CommittingMetadata,
    Done,
}

impl std::fmt::Display for UploadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UploadStage::Validating => "validating",
            UploadStage::AdmissionWait => "admission-wait",
            UploadStage::Selecting => "selecting",
            UploadStage::Transferring => "transferring",
            UploadStage::CommittingMetadata => "committing-metadata",
            UploadStage::Done => "done",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Gateway
// =============================================================================

/// Admission-controlled file gateway
pub struct FileGateway {
    admission: AdmissionController,
    selector: Arc<dyn BackendSelector>,
    metadata: Arc<dyn MetadataStore>,
    events: Arc<dyn EventPublisher>,
}

impl FileGateway {
    /// Assemble a gateway. Events go to the log until
    /// [`with_event_publisher`](Self::with_event_publisher) is called.
    pub fn new(
        admission: AdmissionController,
        selector: Arc<dyn BackendSelector>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            admission,
            selector,
            metadata,
            events: Arc::new(LoggingEventPublisher),
        }
    }

    pub fn with_event_publisher(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = events;
        self
    }

    /// Build backends, selector, admission pools and an in-memory metadata
    /// store from configuration.
    pub async fn from_config(config: &GatewayConfig) -> Result<Self> {
        config.validate()?;

        let backends = build_backends(&config.backends).await?;
        let selector = build_selector(config.selection, backends)?;
        let admission = AdmissionController::new(&config.admission)?;

        info!(
            upload_slots = config.admission.upload_slots,
            download_slots = config.admission.download_slots,
            "File gateway assembled"
        );

        Ok(Self::new(
            admission,
            selector,
            Arc::new(InMemoryMetadataStore::new()),
        ))
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn selector(&self) -> &Arc<dyn BackendSelector> {
        &self.selector
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    /// Admission counters for every class.
    pub fn admission_snapshot(&self) -> Vec<AdmissionSnapshot> {
        self.admission.snapshot_all()
    }

    /// Store a file and commit its record.
    #[instrument(
        skip(self, request),
        fields(file_name = %request.file_name, declared_size = request.declared_size)
    )]
    pub async fn upload(&self, request: UploadRequest) -> Result<FileInfo> {
        let mut stage = UploadStage::Validating;
        let result = self.run_upload(request, &mut stage).await;

        match &result {
            Ok(info) => info!(file_id = %info.id, "Upload complete"),
            Err(e) => warn!(stage = %stage, error = %e, "Upload failed"),
        }
        result
    }

    async fn run_upload(&self, request: UploadRequest, stage: &mut UploadStage) -> Result<FileInfo> {
        request.validate()?;

        *stage = UploadStage::AdmissionWait;
        let permit = self.admission.acquire(OperationClass::Upload).await?;

        *stage = UploadStage::Selecting;
        let backend = self.selector.select();

        *stage = UploadStage::Transferring;
        let UploadRequest {
            source,
            file_name,
            content_type,
            declared_size,
            tags,
        } = request;
        let key = backend
            .upload(source, &file_name, &content_type)
            .await
            .map_err(|e| Error::storage(backend.name(), e))?;

        *stage = UploadStage::CommittingMetadata;
        let record = FileRecord::new(
            file_name,
            content_type,
            declared_size,
            key.clone(),
            backend.name(),
            tags,
        );
        let id = record.id().clone();
        let info = record.info();

        if let Err(e) = self.metadata.insert(record).await {
            drop(permit);
            warn!(
                backend = %backend.name(),
                storage_key = %key,
                error = %e,
                "Record commit failed, stored object is orphaned"
            );
            self.emit(DomainEvent::orphaned_object(
                backend.name(),
                &key,
                format!("record commit failed: {}", e),
            ))
            .await;
            return Err(e);
        }
        drop(permit);

        *stage = UploadStage::Done;
        self.emit(DomainEvent::file_stored(
            id.as_str(),
            backend.name(),
            &key,
            declared_size,
        ))
        .await;

        Ok(info)
    }

    /// Open a download. An unknown id fails without touching admission.
    #[instrument(skip(self, id), fields(file_id = %id))]
    pub async fn download(&self, id: &FileId) -> Result<FileDownload> {
        let record = self.lookup(id).await?;

        let permit = self.admission.acquire(OperationClass::Download).await?;
        let backend = self.selector.resolve(record.backend())?;

        let stream = match backend.download(record.storage_key()).await {
            Ok(stream) => stream,
            Err(e) if e.is_not_found() => {
                drop(permit);
                self.report_dangling(&record, backend.as_ref(), "object missing on download")
                    .await;
                return Err(Error::NotFound(id.clone()));
            }
            Err(e) => return Err(Error::storage(backend.name(), e)),
        };

        debug!(backend = %backend.name(), storage_key = %record.storage_key(), "Download opened");

        Ok(FileDownload {
            stream: Box::pin(PermitStream::new(stream, permit)),
            content_type: record.content_type().to_string(),
            file_name: record.file_name().to_string(),
            size: record.size(),
        })
    }

    /// Describe a stored file.
    pub async fn get_info(&self, id: &FileId) -> Result<FileInfo> {
        Ok(self.lookup(id).await?.info())
    }

    /// Delete the stored bytes, then the record.
    ///
    /// Returns whether the backend still held the object. The record is
    /// removed either way.
    #[instrument(skip(self, id), fields(file_id = %id))]
    pub async fn delete(&self, id: &FileId) -> Result<bool> {
        let record = self.lookup(id).await?;
        let backend = self.selector.resolve(record.backend())?;

        let existed = backend
            .delete(record.storage_key())
            .await
            .map_err(|e| Error::storage(backend.name(), e))?;

        if !existed {
            warn!(
                backend = %backend.name(),
                storage_key = %record.storage_key(),
                "Object was already absent from backend"
            );
        }

        match self.metadata.remove(id).await {
            Ok(true) => {}
            // A concurrent delete removed the record first
            Ok(false) => return Err(Error::NotFound(id.clone())),
            Err(e) => {
                self.report_dangling(
                    &record,
                    backend.as_ref(),
                    &format!("record removal failed: {}", e),
                )
                .await;
                return Err(e);
            }
        }

        self.emit(DomainEvent::file_deleted(
            id.as_str(),
            backend.name(),
            record.storage_key(),
        ))
        .await;
        info!(backend = %backend.name(), existed, "File deleted");

        Ok(existed)
    }

    async fn lookup(&self, id: &FileId) -> Result<FileRecord> {
        self.metadata
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.clone()))
    }

    async fn report_dangling(&self, record: &FileRecord, backend: &dyn StorageBackend, reason: &str) {
        warn!(
            file_id = %record.id(),
            backend = %backend.name(),
            storage_key = %record.storage_key(),
            reason,
            "Record points at a missing object"
        );
        self.emit(DomainEvent::dangling_record(
            record.id().as_str(),
            backend.name(),
            record.storage_key(),
            reason,
        ))
        .await;
    }

    async fn emit(&self, event: DomainEvent) {
        if let Err(e) = self.events.publish(event).await {
            warn!(error = %e, "Failed to publish domain event");
        }
    }
}

impl std::fmt::Debug for FileGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileGateway")
            .field("admission", &self.admission)
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}
