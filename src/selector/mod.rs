//! Backend Selection
//!
//! The [`BackendRegistry`] is the fixed set of named backends known at
//! startup. A [`BackendSelector`] picks a backend for each new upload and
//! resolves the backend recorded in an existing file record.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::StorageBackend;
use crate::error::{Error, Result};

// =============================================================================
// Registry
// =============================================================================

/// Immutable, ordered set of uniquely named backends
#[derive(Debug, Clone)]
pub struct BackendRegistry {
    ordered: Vec<Arc<dyn StorageBackend>>,
    by_name: HashMap<String, Arc<dyn StorageBackend>>,
}

impl BackendRegistry {
    /// Build a registry. Fails on an empty list or a repeated name.
    pub fn new(backends: Vec<Arc<dyn StorageBackend>>) -> Result<Self> {
        if backends.is_empty() {
            return Err(Error::Config(
                "backend registry requires at least one backend".into(),
            ));
        }

        let mut by_name = HashMap::with_capacity(backends.len());
        for backend in &backends {
            let name = backend.name().to_string();
            if by_name.insert(name.clone(), Arc::clone(backend)).is_some() {
                return Err(Error::Config(format!("duplicate backend name '{}'", name)));
            }
        }

        Ok(Self {
            ordered: backends,
            by_name,
        })
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn StorageBackend>> {
        self.by_name.get(name)
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Backend names in registry order.
    pub fn names(&self) -> Vec<&str> {
        self.ordered.iter().map(|b| b.name()).collect()
    }

    fn at(&self, index: usize) -> &Arc<dyn StorageBackend> {
        &self.ordered[index % self.ordered.len()]
    }
}

// =============================================================================
// Policies
// =============================================================================

/// Selection policy for new uploads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionPolicy {
    /// Cycle through backends in registry order
    #[default]
    RoundRobin,
    /// Uniformly random backend per upload
    Random,
}

impl std::fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionPolicy::RoundRobin => write!(f, "round-robin"),
            SelectionPolicy::Random => write!(f, "random"),
        }
    }
}

/// Chooses backends for uploads and resolves recorded backend names.
pub trait BackendSelector: Send + Sync + std::fmt::Debug {
    fn policy(&self) -> SelectionPolicy;

    fn registry(&self) -> &BackendRegistry;

    /// Backend for the next upload.
    fn select(&self) -> Arc<dyn StorageBackend>;

    /// Backend recorded under `name`. An unknown name is a configuration
    /// error: the registry no longer matches the stored records.
    fn resolve(&self, name: &str) -> Result<Arc<dyn StorageBackend>> {
        self.registry().get(name).cloned().ok_or_else(|| {
            Error::Config(format!("backend '{}' is not in the registry", name))
        })
    }
}

/// Round-robin selection over the registry order
#[derive(Debug)]
pub struct RoundRobinSelector {
    registry: BackendRegistry,
    cursor: Mutex<usize>,
}

impl RoundRobinSelector {
    pub fn new(registry: BackendRegistry) -> Self {
        Self {
            registry,
            cursor: Mutex::new(0),
        }
    }
}

impl BackendSelector for RoundRobinSelector {
    fn policy(&self) -> SelectionPolicy {
        SelectionPolicy::RoundRobin
    }

    fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    fn select(&self) -> Arc<dyn StorageBackend> {
        let index = {
            let mut cursor = self.cursor.lock();
            let index = *cursor;
            *cursor = (index + 1) % self.registry.len();
            index
        };

        let backend = Arc::clone(self.registry.at(index));
        debug!(backend = %backend.name(), index, "Selected backend");
        backend
    }
}

/// Uniformly random selection
#[derive(Debug)]
pub struct RandomSelector {
    registry: BackendRegistry,
}

impl RandomSelector {
    pub fn new(registry: BackendRegistry) -> Self {
        Self { registry }
    }
}

impl BackendSelector for RandomSelector {
    fn policy(&self) -> SelectionPolicy {
        SelectionPolicy::Random
    }

    fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    fn select(&self) -> Arc<dyn StorageBackend> {
        let index = rand::thread_rng().gen_range(0..self.registry.len());
        let backend = Arc::clone(self.registry.at(index));
        debug!(backend = %backend.name(), index, "Selected backend");
        backend
    }
}

/// Build the selector for `policy` over `backends`.
pub fn build_selector(
    policy: SelectionPolicy,
    backends: Vec<Arc<dyn StorageBackend>>,
) -> Result<Arc<dyn BackendSelector>> {
    let registry = BackendRegistry::new(backends)?;
    info!(policy = %policy, backends = ?registry.names(), "Backend selector ready");

    Ok(match policy {
        SelectionPolicy::RoundRobin => Arc::new(RoundRobinSelector::new(registry)),
        SelectionPolicy::Random => Arc::new(RandomSelector::new(registry)),
    })
}
