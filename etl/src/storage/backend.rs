use std::sync::Arc;

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::{ObjectStore as Backend, PutPayload};

use crate::error::{ErrorKind, EtlResult};
use crate::{bail, etl_error};

/// Adapts an [`object_store`] backend to the `/`-separated string paths artifacts use.
#[derive(Debug, Clone)]
pub(super) struct BackendStore {
    backend: Arc<dyn Backend>,
}

impl BackendStore {
    pub(super) fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub(super) async fn put(&self, path: &str, bytes: Bytes) -> EtlResult<()> {
        let location = parse_path(path)?;
        self.backend
            .put(&location, PutPayload::from_bytes(bytes))
            .await?;

        Ok(())
    }

    pub(super) async fn get(&self, path: &str) -> EtlResult<Bytes> {
        let location = parse_path(path)?;
        let result = self.backend.get(&location).await?;

        Ok(result.bytes().await?)
    }

    /// Lists paths starting with `prefix`.
    ///
    /// Backends list by whole path segments, so the listing starts at the last complete segment
    /// of `prefix` and is filtered by plain string prefix afterwards.
    pub(super) async fn list(&self, prefix: &str) -> EtlResult<Vec<String>> {
        let directory = match prefix.rfind('/') {
            Some(end) => Some(parse_path(&prefix[..end])?),
            None => None,
        };

        let objects: Vec<_> = self
            .backend
            .list(directory.as_ref())
            .try_collect()
            .await?;

        let mut paths: Vec<String> = objects
            .into_iter()
            .map(|meta| meta.location.to_string())
            .filter(|path| path.starts_with(prefix))
            .collect();
        paths.sort();

        Ok(paths)
    }

    pub(super) async fn delete(&self, path: &str) -> EtlResult<()> {
        let location = parse_path(path)?;
        match self.backend.delete(&location).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Parses `path` strictly: no empty, `.` or `..` segments and no leading or trailing `/`.
fn parse_path(path: &str) -> EtlResult<Path> {
    if path.is_empty() || path.starts_with('/') || path.ends_with('/') {
        bail!(
            ErrorKind::InvalidData,
            "Object path must be relative and normalized",
            format!("invalid object path `{path}`")
        );
    }

    match Path::parse(path) {
        Ok(location) => Ok(location),
        Err(err) => Err(etl_error!(
            ErrorKind::InvalidData,
            "Object path must be relative and normalized",
            format!("invalid object path `{path}`"),
            source: err
        )),
    }
}
