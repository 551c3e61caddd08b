//! Test doubles shared by the integration suites.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use filegate::adapters::InMemoryEventCollector;
use filegate::domain::{EventPublisher, FileId, FileRecord, MetadataStore, StorageBackend};
use filegate::metadata::InMemoryMetadataStore;
use filegate::selector::build_selector;
use filegate::storage::{
    ByteSource, ByteStream, InMemoryBackend, StorageError, StorageResult,
};
use filegate::{AdmissionConfig, AdmissionController, Error, FileGateway, Result, SelectionPolicy};

/// Poll `cond` until it holds or two seconds pass.
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// Memory backend whose uploads block until the test opens the gate.
#[derive(Debug)]
pub struct GatedBackend {
    inner: InMemoryBackend,
    gate: Semaphore,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl GatedBackend {
    pub fn new(name: &str) -> Self {
        Self {
            inner: InMemoryBackend::new(name),
            gate: Semaphore::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Let `n` blocked or future uploads proceed.
    pub fn open(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageBackend for GatedBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn upload(
        &self,
        source: ByteSource,
        file_name: &str,
        content_type: &str,
    ) -> StorageResult<String> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        self.gate
            .acquire()
            .await
            .map_err(StorageError::backend)?
            .forget();

        self.inner.upload(source, file_name, content_type).await
    }

    async fn download(&self, key: &str) -> StorageResult<ByteStream> {
        self.inner.download(key).await
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }
}

/// Backend on which every operation fails.
#[derive(Debug)]
pub struct FailingBackend {
    name: String,
    pub attempts: AtomicUsize,
}

impl FailingBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attempts: AtomicUsize::new(0),
        }
    }

    fn fail<T>(&self) -> StorageResult<T> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::backend("connection reset by peer"))
    }
}

#[async_trait]
impl StorageBackend for FailingBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upload(&self, _: ByteSource, _: &str, _: &str) -> StorageResult<String> {
        self.fail()
    }

    async fn download(&self, _: &str) -> StorageResult<ByteStream> {
        self.fail()
    }

    async fn delete(&self, _: &str) -> StorageResult<bool> {
        self.fail()
    }

    async fn exists(&self, _: &str) -> StorageResult<bool> {
        self.fail()
    }
}

/// Metadata store with switchable insert and remove failures.
#[derive(Debug, Default)]
pub struct FlakyMetadataStore {
    inner: InMemoryMetadataStore,
    pub fail_insert: AtomicBool,
    pub fail_remove: AtomicBool,
}

#[async_trait]
impl MetadataStore for FlakyMetadataStore {
    async fn insert(&self, record: FileRecord) -> Result<()> {
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(Error::Metadata("metadata volume is read-only".into()));
        }
        self.inner.insert(record).await
    }

    async fn get(&self, id: &FileId) -> Result<Option<FileRecord>> {
        self.inner.get(id).await
    }

    async fn remove(&self, id: &FileId) -> Result<bool> {
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(Error::Metadata("metadata volume is read-only".into()));
        }
        self.inner.remove(id).await
    }

    async fn count(&self) -> Result<u64> {
        self.inner.count().await
    }
}

/// Gateway over `backends` with round-robin selection and collected events.
pub fn gateway_with(
    backends: Vec<Arc<dyn StorageBackend>>,
    admission: AdmissionConfig,
    metadata: Arc<dyn MetadataStore>,
) -> (Arc<FileGateway>, Arc<InMemoryEventCollector>) {
    let selector = build_selector(SelectionPolicy::RoundRobin, backends).unwrap();
    let events = Arc::new(InMemoryEventCollector::new());
    let gateway = FileGateway::new(AdmissionController::new(&admission).unwrap(), selector, metadata)
        .with_event_publisher(Arc::clone(&events) as Arc<dyn EventPublisher>);
    (Arc::new(gateway), events)
}

pub fn pools(upload_slots: usize, download_slots: usize) -> AdmissionConfig {
    AdmissionConfig {
        upload_slots,
        download_slots,
    }
}
