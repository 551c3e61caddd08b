//! Filegate - Admission-Controlled File Gateway
//!
//! Accepts file uploads, stores their bytes on one of several
//! interchangeable object storage backends, and serves downloads and
//! deletions by opaque identifier. Heavy transfers are bounded per
//! operation class by queueing, never by rejection.
//!
//! # Architecture
//!
//! ```text
//!                ┌────────────────────────────────────┐
//!   request ───▶ │        FileGateway (pipelines)      │
//!                └──┬──────────┬───────────┬──────────┘
//!                   │          │           │
//!          ┌────────▼───┐ ┌────▼─────┐ ┌───▼────────────┐
//!          │ Admission  │ │ Backend  │ │ Metadata Store │
//!          │ Controller │ │ Selector │ └────────────────┘
//!          └────────────┘ └────┬─────┘
//!                              │
//!              ┌───────────────┼───────────────┐
//!              ▼               ▼               ▼
//!          LocalFs         InMemory        S3 (feature)
//! ```
//!
//! # Modules
//!
//! - [`admission`] - Per-class concurrency limits with FIFO queueing
//! - [`selector`] - Backend registry and selection policies
//! - [`storage`] - Streaming transfer primitives and concrete backends
//! - [`metadata`] - File record store
//! - [`gateway`] - Upload, download, info and delete pipelines
//! - [`domain`] - File records, ports and domain events
//! - [`adapters`] - Event publishers
//! - [`config`] - YAML gateway configuration
//! - [`error`] - Error types

pub mod adapters;
pub mod admission;
pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod metadata;
pub mod selector;
pub mod storage;

// Re-export commonly used types
pub use admission::{AdmissionConfig, AdmissionController, AdmissionPermit, OperationClass};
pub use config::{BackendConfig, GatewayConfig};
pub use domain::{FileId, FileInfo, FileRecord};
pub use error::{Error, Result};
pub use gateway::{FileDownload, FileGateway, UploadRequest};
pub use selector::{BackendSelector, SelectionPolicy};
