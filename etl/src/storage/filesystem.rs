use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use object_store::local::LocalFileSystem;
use tracing::debug;

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::storage::ObjectStore;
use crate::storage::backend::BackendStore;

/// Object store backed by a local directory.
///
/// Writes are staged next to their final path and renamed into place, so readers never observe
/// a partially written object.
#[derive(Debug, Clone)]
pub struct FilesystemObjectStore {
    root: PathBuf,
    backend: BackendStore,
}

impl FilesystemObjectStore {
    /// Opens the store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> EtlResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        let local = LocalFileSystem::new_with_prefix(&root).map_err(|err| {
            etl_error!(
                ErrorKind::ConfigError,
                "Object store root is not usable",
                format!("cannot open `{}`", root.display()),
                source: err
            )
        })?;

        Ok(Self {
            root,
            backend: BackendStore::new(Arc::new(local)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ObjectStore for FilesystemObjectStore {
    fn name() -> &'static str {
        "filesystem"
    }

    async fn put(&self, path: &str, bytes: Bytes) -> EtlResult<()> {
        let size = bytes.len();
        self.backend.put(path, bytes).await?;

        debug!(path, size, "wrote object");

        Ok(())
    }

    async fn get(&self, path: &str) -> EtlResult<Bytes> {
        self.backend.get(path).await
    }

    async fn list(&self, prefix: &str) -> EtlResult<Vec<String>> {
        self.backend.list(prefix).await
    }

    async fn delete(&self, path: &str) -> EtlResult<()> {
        self.backend.delete(path).await
    }
}
