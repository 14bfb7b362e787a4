use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::concurrency::lease::TableLeases;
use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::state::checkpoint::{Checkpoint, validate_checkpoint_update};
use crate::store::checkpoint::CheckpointStore;
use crate::types::SourceTableId;

const CHECKPOINT_EXTENSION: &str = "json";

#[derive(Debug, Serialize, Deserialize)]
struct StoredCheckpoint {
    table_id: SourceTableId,
    checkpoint: Checkpoint,
}

fn load_failed(err: EtlError) -> EtlError {
    match err.kind() {
        ErrorKind::IoError => {
            err.with_kind(ErrorKind::CheckpointLoadFailed, "Checkpoint could not be read")
        }
        _ => err,
    }
}

fn save_failed(err: EtlError) -> EtlError {
    match err.kind() {
        ErrorKind::IoError => {
            err.with_kind(ErrorKind::CheckpointSaveFailed, "Checkpoint could not be written")
        }
        _ => err,
    }
}

/// Checkpoint store writing one JSON file per table.
///
/// Files are replaced by writing and syncing a temporary file, renaming it over the previous one
/// and syncing the directory. Saves of the same table are serialized through a per-table lease.
#[derive(Debug, Clone)]
pub struct FilesystemCheckpointStore {
    directory: PathBuf,
    leases: TableLeases,
}

impl FilesystemCheckpointStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self::with_leases(directory, TableLeases::new())
    }

    /// Creates a store whose saves take table leases from `leases`.
    pub fn with_leases(directory: impl Into<PathBuf>, leases: TableLeases) -> Self {
        Self {
            directory: directory.into(),
            leases,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Distinct table ids always map to distinct files: bytes outside `[A-Za-z0-9._-]` are
    /// written as `%XX`.
    fn checkpoint_path(&self, table_id: &SourceTableId) -> PathBuf {
        let mut file_stem = String::with_capacity(table_id.as_str().len());
        for byte in table_id.as_str().bytes() {
            match byte {
                b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'.' | b'_' | b'-' => {
                    file_stem.push(char::from(byte))
                }
                _ => file_stem.push_str(&format!("%{byte:02X}")),
            }
        }

        self.directory
            .join(format!("{file_stem}.{CHECKPOINT_EXTENSION}"))
    }

    async fn read_stored(&self, path: &Path) -> EtlResult<Option<StoredCheckpoint>> {
        match fs::read(path).await {
            Ok(content) => Ok(Some(serde_json::from_slice(&content)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn write_stored(&self, path: &Path, stored: &StoredCheckpoint) -> EtlResult<()> {
        fs::create_dir_all(&self.directory).await?;

        let content = serde_json::to_vec_pretty(stored)?;
        let temporary = self
            .directory
            .join(format!(".checkpoint-{}.tmp", Uuid::new_v4()));

        if let Err(err) = self.replace_with(&temporary, path, &content).await {
            let _ = fs::remove_file(&temporary).await;
            return Err(err.into());
        }

        Ok(())
    }

    async fn replace_with(&self, temporary: &Path, path: &Path, content: &[u8]) -> io::Result<()> {
        let mut file = fs::File::create(temporary).await?;
        file.write_all(content).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(temporary, path).await?;

        #[cfg(unix)]
        fs::File::open(&self.directory).await?.sync_all().await?;

        Ok(())
    }
}

impl CheckpointStore for FilesystemCheckpointStore {
    fn name() -> &'static str {
        "filesystem"
    }

    async fn get_checkpoint(&self, table_id: &SourceTableId) -> EtlResult<Option<Checkpoint>> {
        let path = self.checkpoint_path(table_id);
        let stored = self.read_stored(&path).await.map_err(load_failed)?;

        Ok(stored.map(|stored| stored.checkpoint))
    }

    async fn save_checkpoint(
        &self,
        table_id: &SourceTableId,
        checkpoint: &Checkpoint,
    ) -> EtlResult<()> {
        let _lease = self.leases.acquire(table_id.as_str()).await;

        let path = self.checkpoint_path(table_id);
        let current = self.read_stored(&path).await.map_err(load_failed)?;
        let current = current.as_ref().map(|stored| &stored.checkpoint);
        validate_checkpoint_update(current, checkpoint)?;

        let stored = StoredCheckpoint {
            table_id: table_id.clone(),
            checkpoint: checkpoint.clone(),
        };
        self.write_stored(&path, &stored).await.map_err(save_failed)?;

        debug!(%table_id, path = %path.display(), "saved checkpoint");

        Ok(())
    }

    async fn list_tracked_tables(&self) -> EtlResult<Vec<SourceTableId>> {
        let mut entries = match fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(load_failed(err.into())),
        };

        let mut table_ids = Vec::new();
        loop {
            let entry = entries.next_entry().await;
            let Some(entry) = entry.map_err(|err| load_failed(err.into()))? else {
                break;
            };

            let path = entry.path();
            let extension = path.extension().and_then(|extension| extension.to_str());
            if extension != Some(CHECKPOINT_EXTENSION) {
                continue;
            }

            if let Some(stored) = self.read_stored(&path).await.map_err(load_failed)? {
                table_ids.push(stored.table_id);
            }
        }

        table_ids.sort();
        Ok(table_ids)
    }
}
