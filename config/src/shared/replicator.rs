use serde::Deserialize;

use crate::Config;
use crate::shared::{
    CheckpointStoreConfig, DestinationConfig, ObjectStoreConfig, PipelineConfig, SourceConfig,
    ValidationError,
};

/// Complete configuration of the replicator binary.
///
/// Does not implement `Serialize` so connection secrets are never written out.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplicatorConfig {
    pub source: SourceConfig,
    #[serde(default)]
    pub object_store: ObjectStoreConfig,
    #[serde(default)]
    pub checkpoint_store: CheckpointStoreConfig,
    pub destination: DestinationConfig,
    pub pipeline: PipelineConfig,
}

impl ReplicatorConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.source.validate()?;
        self.checkpoint_store.validate()?;
        self.destination.validate()?;
        self.pipeline.validate()
    }
}

impl Config for ReplicatorConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}
