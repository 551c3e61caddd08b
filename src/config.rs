//! Gateway Configuration
//!
//! YAML configuration file describing the backend registry, the selection
//! policy and the admission pool sizes.
//!
//! ```yaml
//! selection: round-robin
//! admission:
//!   upload_slots: 5
//!   download_slots: 10
//! backends:
//!   - kind: local
//!     name: primary
//!     root: /var/lib/filegate
//!   - kind: s3
//!     name: archive
//!     bucket: filegate-archive
//!     region: eu-west-1
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::admission::AdmissionConfig;
use crate::error::{Error, Result};
use crate::selector::SelectionPolicy;
use crate::storage::{DEFAULT_CHUNK_SIZE, MIN_CHUNK_SIZE};

/// Top-level gateway configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Backend selection policy for new uploads
    pub selection: SelectionPolicy,
    /// Admission pool sizes
    pub admission: AdmissionConfig,
    /// Backend registry, in selection order
    pub backends: Vec<BackendConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            selection: SelectionPolicy::default(),
            admission: AdmissionConfig::default(),
            backends: vec![BackendConfig::Local {
                name: "local".to_string(),
                root: PathBuf::from("./data"),
                chunk_size: DEFAULT_CHUNK_SIZE,
                operation_timeout_secs: None,
            }],
        }
    }
}

/// One storage backend entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum BackendConfig {
    /// Directory on the local filesystem
    Local {
        name: String,
        root: PathBuf,
        #[serde(default = "default_chunk_size")]
        chunk_size: usize,
        #[serde(default)]
        operation_timeout_secs: Option<u64>,
    },

    /// Process memory; contents are lost on restart
    Memory {
        name: String,
        #[serde(default = "default_chunk_size")]
        chunk_size: usize,
    },

    /// S3-compatible bucket (requires the `s3` feature)
    S3 {
        name: String,
        bucket: String,
        #[serde(default = "default_region")]
        region: String,
        #[serde(default)]
        endpoint_url: Option<String>,
        #[serde(default = "default_s3_chunk_size")]
        chunk_size: usize,
        #[serde(default)]
        operation_timeout_secs: Option<u64>,
    },
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_s3_chunk_size() -> usize {
    // Multipart parts must be at least 5MB
    8 * 1024 * 1024
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl BackendConfig {
    /// Registry name of the backend.
    pub fn name(&self) -> &str {
        match self {
            BackendConfig::Local { name, .. }
            | BackendConfig::Memory { name, .. }
            | BackendConfig::S3 { name, .. } => name,
        }
    }

    /// Backend kind as written in the config file.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendConfig::Local { .. } => "local",
            BackendConfig::Memory { .. } => "memory",
            BackendConfig::S3 { .. } => "s3",
        }
    }

    fn chunk_size(&self) -> usize {
        match self {
            BackendConfig::Local { chunk_size, .. }
            | BackendConfig::Memory { chunk_size, .. }
            | BackendConfig::S3 { chunk_size, .. } => *chunk_size,
        }
    }
}

impl GatewayConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: GatewayConfig = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Config(format!("invalid gateway config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Reject configurations that could never serve a request.
    pub fn validate(&self) -> Result<()> {
        self.admission.validate()?;

        if self.backends.is_empty() {
            return Err(Error::Config("at least one backend is required".into()));
        }

        let mut seen = HashSet::new();
        for backend in &self.backends {
            let name = backend.name();
            if name.trim().is_empty() {
                return Err(Error::Config("backend name must not be empty".into()));
            }
            if !seen.insert(name) {
                return Err(Error::Config(format!("duplicate backend name '{}'", name)));
            }
            if backend.chunk_size() < MIN_CHUNK_SIZE {
                return Err(Error::Config(format!(
                    "backend '{}': chunk size {} is below the minimum of {}",
                    name,
                    backend.chunk_size(),
                    MIN_CHUNK_SIZE
                )));
            }
        }

        Ok(())
    }
}
