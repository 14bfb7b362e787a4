use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where batch artifacts are written.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ObjectStoreConfig {
    #[default]
    Memory,
    /// Artifacts are written below `root` on the local filesystem.
    Filesystem { root: PathBuf },
}
