use std::future::Future;

use bytes::Bytes;

use crate::error::EtlResult;

/// Object storage artifacts are written to and read back from.
///
/// Once [`ObjectStore::put`] returns, a [`ObjectStore::get`] of the same path must observe
/// the written bytes.
pub trait ObjectStore {
    /// Returns the name of the store kind.
    fn name() -> &'static str;

    /// Stores `bytes` at `path`, replacing any previous object atomically.
    fn put(&self, path: &str, bytes: Bytes) -> impl Future<Output = EtlResult<()>> + Send;

    /// Reads the object at `path`.
    ///
    /// Fails with [`crate::error::ErrorKind::ArtifactReadFailed`] if it does not exist.
    fn get(&self, path: &str) -> impl Future<Output = EtlResult<Bytes>> + Send;

    /// Lists paths starting with `prefix`, sorted.
    fn list(&self, prefix: &str) -> impl Future<Output = EtlResult<Vec<String>>> + Send;

    /// Deletes the object at `path`. Deleting a missing object succeeds.
    fn delete(&self, path: &str) -> impl Future<Output = EtlResult<()>> + Send;
}
