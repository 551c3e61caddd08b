//! Admission Control
//!
//! Caps concurrent heavy transfers per operation class by queueing callers
//! instead of shedding them. Each class owns one fixed-size pool backed by a
//! [`tokio::sync::Semaphore`], which hands out slots in FIFO order.
//!
//! A slot is held by an [`AdmissionPermit`] and returned when the permit is
//! dropped, so release happens exactly once on every exit path. A caller
//! that stops waiting (drops the `acquire` future, times out, or cancels via
//! [`AdmissionController::acquire_cancellable`]) consumes nothing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Default upload pool size
pub const DEFAULT_UPLOAD_SLOTS: usize = 5;

/// Default download pool size
pub const DEFAULT_DOWNLOAD_SLOTS: usize = 10;

// =============================================================================
// Configuration
// =============================================================================

/// Class of admission-controlled operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationClass {
    Upload,
    Download,
}

impl OperationClass {
    pub const ALL: [OperationClass; 2] = [OperationClass::Upload, OperationClass::Download];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClass::Upload => "upload",
            OperationClass::Download => "download",
        }
    }
}

impl std::fmt::Display for OperationClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pool sizes, fixed at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Concurrent uploads allowed past admission
    pub upload_slots: usize,
    /// Concurrent downloads allowed past admission
    pub download_slots: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            upload_slots: DEFAULT_UPLOAD_SLOTS,
            download_slots: DEFAULT_DOWNLOAD_SLOTS,
        }
    }
}

impl AdmissionConfig {
    pub fn slots(&self, class: OperationClass) -> usize {
        match class {
            OperationClass::Upload => self.upload_slots,
            OperationClass::Download => self.download_slots,
        }
    }

    /// Pool sizes must be positive.
    pub fn validate(&self) -> Result<()> {
        for class in OperationClass::ALL {
            if self.slots(class) == 0 {
                return Err(Error::Config(format!(
                    "{} pool size must be at least 1",
                    class
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Controller
// =============================================================================

#[derive(Debug)]
struct Pool {
    class: OperationClass,
    capacity: usize,
    semaphore: Arc<Semaphore>,
    active: AtomicUsize,
    queued: AtomicUsize,
}

impl Pool {
    fn new(class: OperationClass, capacity: usize) -> Self {
        Self {
            class,
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
            active: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
        }
    }

    fn admit(self: &Arc<Self>, permit: OwnedSemaphorePermit) -> AdmissionPermit {
        self.active.fetch_add(1, Ordering::SeqCst);
        AdmissionPermit {
            pool: Arc::clone(self),
            _permit: permit,
        }
    }
}

/// Marks a caller as waiting for the lifetime of the guard.
struct QueuedGuard<'a>(&'a AtomicUsize);

impl<'a> QueuedGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for QueuedGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Per-class concurrency limiter
#[derive(Debug, Clone)]
pub struct AdmissionController {
    upload: Arc<Pool>,
    download: Arc<Pool>,
}

impl AdmissionController {
    /// Create a controller. Zero-sized pools are rejected.
    pub fn new(config: &AdmissionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            upload: Arc::new(Pool::new(OperationClass::Upload, config.upload_slots)),
            download: Arc::new(Pool::new(OperationClass::Download, config.download_slots)),
        })
    }

    fn pool(&self, class: OperationClass) -> &Arc<Pool> {
        match class {
            OperationClass::Upload => &self.upload,
            OperationClass::Download => &self.download,
        }
    }

    /// Wait for a slot of `class`. There is no deadline; dropping the
    /// returned future withdraws the caller from the queue.
    pub async fn acquire(&self, class: OperationClass) -> Result<AdmissionPermit> {
        let pool = self.pool(class);

        if let Ok(permit) = Arc::clone(&pool.semaphore).try_acquire_owned() {
            trace!(class = %class, "Admitted without waiting");
            return Ok(pool.admit(permit));
        }

        let queued = QueuedGuard::enter(&pool.queued);
        debug!(
            class = %class,
            capacity = pool.capacity,
            queued = pool.queued.load(Ordering::Relaxed),
            "Pool exhausted, waiting for a slot"
        );

        let permit = Arc::clone(&pool.semaphore)
            .acquire_owned()
            .await
            .map_err(|e| Error::Internal(format!("{} pool closed: {}", class, e)))?;
        drop(queued);

        Ok(pool.admit(permit))
    }

    /// Like [`acquire`](Self::acquire), but gives up when `cancel` fires.
    /// Returns `None` if cancelled; no slot is consumed in that case.
    pub async fn acquire_cancellable(
        &self,
        class: OperationClass,
        cancel: &CancellationToken,
    ) -> Result<Option<AdmissionPermit>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(class = %class, "Admission wait cancelled");
                Ok(None)
            }
            permit = self.acquire(class) => permit.map(Some),
        }
    }

    /// Point-in-time counters for one class. Diagnostic only.
    pub fn snapshot(&self, class: OperationClass) -> AdmissionSnapshot {
        let pool = self.pool(class);
        AdmissionSnapshot {
            class,
            capacity: pool.capacity,
            active: pool.active.load(Ordering::SeqCst),
            queued: pool.queued.load(Ordering::SeqCst),
            available: pool.semaphore.available_permits(),
        }
    }

    /// Snapshots of every class.
    pub fn snapshot_all(&self) -> Vec<AdmissionSnapshot> {
        OperationClass::ALL
            .iter()
            .map(|class| self.snapshot(*class))
            .collect()
    }
}

/// Admission counters for one class
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdmissionSnapshot {
    pub class: OperationClass,
    pub capacity: usize,
    pub active: usize,
    pub queued: usize,
    pub available: usize,
}

// =============================================================================
// Permit
// =============================================================================

/// One held admission slot. Dropping it returns the slot to its pool.
#[derive(Debug)]
pub struct AdmissionPermit {
    pool: Arc<Pool>,
    _permit: OwnedSemaphorePermit,
}

impl AdmissionPermit {
    pub fn class(&self) -> OperationClass {
        self.pool.class
    }

    /// Return the slot now.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        // Runs before the semaphore permit is dropped, so `active` never
        // exceeds capacity
        self.pool.active.fetch_sub(1, Ordering::SeqCst);
        trace!(class = %self.pool.class, "Admission slot released");
    }
}
