//! Local Filesystem Backend
//!
//! Stores each object as one file under a root directory, at the path given
//! by its key. Uploads are written to a hidden `.partial` sibling and
//! renamed into place once complete, so an object is never observable under
//! its key until every byte is on disk. The partial file is removed on every
//! failure path, including cancellation.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::{
    generate_storage_key, read_chunk, with_deadline, ByteSource, ByteStream, StorageError,
    StorageResult, MIN_CHUNK_SIZE,
};
use crate::domain::StorageBackend;
use crate::error::{Error, Result};

/// Local filesystem storage backend
#[derive(Debug)]
pub struct LocalFsBackend {
    name: String,
    root: PathBuf,
    chunk_size: usize,
    operation_timeout: Option<Duration>,
}

impl LocalFsBackend {
    /// Create a backend rooted at `root`, creating the directory if needed.
    pub async fn new(
        name: impl Into<String>,
        root: impl Into<PathBuf>,
        chunk_size: usize,
    ) -> Result<Self> {
        let name = name.into();
        let root = root.into();

        if chunk_size < MIN_CHUNK_SIZE {
            return Err(Error::Config(format!(
                "backend '{}': chunk size {} is below the minimum of {}",
                name, chunk_size, MIN_CHUNK_SIZE
            )));
        }

        fs::create_dir_all(&root).await?;

        Ok(Self {
            name,
            root,
            chunk_size,
            operation_timeout: None,
        })
    }

    /// Bound every backend operation by `timeout`.
    pub fn with_operation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to a path under the root, rejecting anything that could
    /// escape it.
    fn object_path(&self, key: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(key);
        let well_formed = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));

        if !well_formed {
            return Err(StorageError::InvalidKey(key.to_string()));
        }

        Ok(self.root.join(relative))
    }

    /// Copy `source` into `partial`. Only calls into the filesystem run
    /// under the operation deadline; waiting on the caller's source does not.
    async fn write_object(
        &self,
        source: &mut ByteSource,
        partial: &Path,
    ) -> StorageResult<u64> {
        let limit = self.operation_timeout;
        let mut file = with_deadline("upload create", limit, create_file(partial)).await?;
        let mut written = 0u64;

        while let Some(chunk) = read_chunk(source, self.chunk_size)
            .await
            .map_err(StorageError::backend)?
        {
            let write = async { file.write_all(&chunk).await.map_err(StorageError::backend) };
            with_deadline("upload write", limit, write).await?;
            written += chunk.len() as u64;
        }

        let sync = async {
            file.flush().await.map_err(StorageError::backend)?;
            file.sync_all().await.map_err(StorageError::backend)
        };
        with_deadline("upload sync", limit, sync).await?;
        Ok(written)
    }

    /// Remove the now-empty date directories above a deleted object, stopping
    /// at the first one that still holds entries and never touching the root.
    async fn prune_empty_parents(&self, path: &Path) {
        let mut dir = path.parent();
        while let Some(current) = dir {
            if current == self.root || !current.starts_with(&self.root) {
                break;
            }
            match fs::remove_dir(current).await {
                Ok(()) => dir = current.parent(),
                Err(e) => {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        debug!(path = %current.display(), error = %e, "Stopped pruning key directories");
                    }
                    break;
                }
            }
        }
    }
}

/// Create `path` and its parent directories, retrying when a concurrent
/// delete prunes the parents between the two steps.
async fn create_file(path: &Path) -> StorageResult<File> {
    const ATTEMPTS: usize = 3;

    let parent = path
        .parent()
        .ok_or_else(|| StorageError::InvalidKey(path.display().to_string()))?;

    let mut attempt = 1;
    loop {
        fs::create_dir_all(parent)
            .await
            .map_err(StorageError::backend)?;
        match File::create(path).await {
            Ok(file) => return Ok(file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && attempt < ATTEMPTS => {
                attempt += 1;
            }
            Err(e) => return Err(StorageError::backend(e)),
        }
    }
}

/// Removes a partially written file unless disarmed.
struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "Failed to remove partial upload");
                }
            }
        }
    }
}

#[async_trait]
impl StorageBackend for LocalFsBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upload(
        &self,
        mut source: ByteSource,
        file_name: &str,
        _content_type: &str,
    ) -> StorageResult<String> {
        let key = generate_storage_key(file_name);
        let path = self.object_path(&key)?;

        let parent = path
            .parent()
            .ok_or_else(|| StorageError::InvalidKey(key.clone()))?;
        let object_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StorageError::InvalidKey(key.clone()))?;
        let partial_path = parent.join(format!(".{}.partial", object_name));

        let mut partial = PartialFile::new(partial_path.clone());
        let written = self.write_object(&mut source, &partial_path).await?;

        let rename = async {
            fs::rename(&partial_path, &path)
                .await
                .map_err(StorageError::backend)
        };
        with_deadline("upload rename", self.operation_timeout, rename).await?;
        partial.disarm();

        debug!(backend = %self.name, key = %key, size_bytes = written, "Object written");
        Ok(key)
    }

    async fn download(&self, key: &str) -> StorageResult<ByteStream> {
        let path = self.object_path(key)?;

        let open = async {
            File::open(&path).await.map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => StorageError::NotFound(key.to_string()),
                _ => StorageError::backend(e),
            })
        };
        let file = with_deadline("download", self.operation_timeout, open).await?;

        let stream = ReaderStream::with_capacity(file, self.chunk_size)
            .map(|chunk| chunk.map_err(StorageError::backend));
        Ok(Box::pin(stream))
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let path = self.object_path(key)?;

        let remove = async {
            match fs::remove_file(&path).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(StorageError::backend(e)),
            }
        };
        let removed = with_deadline("delete", self.operation_timeout, remove).await?;

        if removed {
            self.prune_empty_parents(&path).await;
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.object_path(key)?;

        let probe = async {
            match fs::metadata(&path).await {
                Ok(meta) => Ok(meta.is_file()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(StorageError::backend(e)),
            }
        };
        with_deadline("exists", self.operation_timeout, probe).await
    }
}
