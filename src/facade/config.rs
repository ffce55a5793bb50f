use crate::core::{MirrorError, Result};
use crate::schema::SchemaRegistry;
use crate::storage::{DEFAULT_CHECKPOINT_THRESHOLD, DurabilityMode, ForeignKeyPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Store configuration
///
/// Deserializable so host applications can keep it in their own config
/// files; the schema registry is always supplied in code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the snapshot and commit log
    pub data_dir: Option<PathBuf>,

    pub durability: DurabilityMode,

    /// Commits between automatic checkpoints (0 disables them)
    pub checkpoint_threshold: usize,

    pub foreign_key_policy: ForeignKeyPolicy,

    /// Entity types the store accepts; the built-in chat registry when unset
    #[serde(skip)]
    pub registry: Option<SchemaRegistry>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            durability: DurabilityMode::None,
            checkpoint_threshold: DEFAULT_CHECKPOINT_THRESHOLD,
            foreign_key_policy: ForeignKeyPolicy::Optimistic,
            registry: None,
        }
    }
}

impl StoreConfig {
    /// Purely in-memory store
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Durable store under `data_dir` with the default (async) durability
    pub fn persistent<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: Some(data_dir.as_ref().to_path_buf()),
            durability: DurabilityMode::Async,
            ..Self::default()
        }
    }

    pub fn durability(mut self, mode: DurabilityMode) -> Self {
        self.durability = mode;
        self
    }

    pub fn checkpoint_threshold(mut self, threshold: usize) -> Self {
        self.checkpoint_threshold = threshold;
        self
    }

    pub fn foreign_key_policy(mut self, policy: ForeignKeyPolicy) -> Self {
        self.foreign_key_policy = policy;
        self
    }

    pub fn strict_foreign_keys(self) -> Self {
        self.foreign_key_policy(ForeignKeyPolicy::Strict)
    }

    pub fn registry(mut self, registry: SchemaRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// The configured registry, or the built-in chat registry.
    pub fn resolve_registry(&self) -> Result<SchemaRegistry> {
        match &self.registry {
            Some(registry) => {
                registry.validate()?;
                Ok(registry.clone())
            }
            None => SchemaRegistry::chat(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.durability != DurabilityMode::None && self.data_dir.is_none() {
            return Err(MirrorError::Config(format!(
                "durability {:?} requires a data_dir",
                self.durability
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.durability, DurabilityMode::None);
        assert_eq!(config.checkpoint_threshold, 1000);
        assert_eq!(config.foreign_key_policy, ForeignKeyPolicy::Optimistic);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_durable_mode_needs_directory() {
        let config = StoreConfig::in_memory().durability(DurabilityMode::Sync);
        assert!(matches!(config.validate(), Err(MirrorError::Config(_))));
        assert!(StoreConfig::persistent("/tmp/mirror").validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: StoreConfig = serde_json::from_str(
            r#"{"data_dir": "/var/cache/chat", "durability": "sync", "foreign_key_policy": "strict"}"#,
        )
        .unwrap();
        assert_eq!(config.durability, DurabilityMode::Sync);
        assert_eq!(config.foreign_key_policy, ForeignKeyPolicy::Strict);
        assert_eq!(config.checkpoint_threshold, 1000);
        assert!(config.resolve_registry().unwrap().contains("channel"));
    }
}
