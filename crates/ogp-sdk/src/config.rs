use std::path::{Path, PathBuf};

use ogp_binary::{ByteOrder, DEFAULT_BUFFER_CAPACITY};
use ogp_legacy::MemberRename;
use ogp_loader::LoaderConfig;
use ogp_storage::{FileStorageConfig, SyncMode};
use ogp_storer::{StorerConfig, StoringPolicy};
use serde::{Deserialize, Serialize};

use crate::error::{SdkError, SdkResult};

/// File storage settings of a [`PersistenceConfig`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSection {
    pub directory: PathBuf,
    #[serde(default)]
    pub sync_mode: SyncMode,
}

/// Everything a [`Persistence`](crate::Persistence) instance is set up from.
///
/// ```toml
/// byte_order = "direct"
/// channel_count = 4
/// policy = "eager"
///
/// [storage]
/// directory = "data"
/// sync_mode = "every_write"
///
/// [[renames]]
/// type_name = "Person"
/// legacy = "years"
/// current = "age"
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub byte_order: ByteOrder,
    /// Channels of storers, loaders and file storage; a power of two.
    pub channel_count: usize,
    pub buffer_capacity: usize,
    pub policy: StoringPolicy,
    pub update_existing: bool,
    /// File storage; in-memory storage when absent.
    pub storage: Option<StorageSection>,
    /// Member renames applied when mapping legacy types.
    pub renames: Vec<MemberRename>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            byte_order: ByteOrder::Direct,
            channel_count: 1,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            policy: StoringPolicy::Lazy,
            update_existing: false,
            storage: None,
            renames: Vec::new(),
        }
    }
}

impl PersistenceConfig {
    /// In-memory configuration with default settings.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// File-backed configuration rooted at `directory`.
    pub fn with_directory(directory: impl Into<PathBuf>) -> Self {
        Self {
            storage: Some(StorageSection {
                directory: directory.into(),
                sync_mode: SyncMode::default(),
            }),
            ..Default::default()
        }
    }

    pub fn from_toml_str(text: &str) -> SdkResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| SdkError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> SdkResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
            .map_err(|e| SdkError::Configuration(format!("{}: {e}", path.display())))
    }

    pub fn to_toml_string(&self) -> SdkResult<String> {
        toml::to_string_pretty(self).map_err(|e| SdkError::Configuration(e.to_string()))
    }

    pub fn validate(&self) -> SdkResult<()> {
        if self.channel_count == 0 || !self.channel_count.is_power_of_two() {
            return Err(SdkError::Configuration(format!(
                "channel_count {} is not a power of two",
                self.channel_count
            )));
        }
        if self.buffer_capacity == 0 {
            return Err(SdkError::Configuration("buffer_capacity must be positive".into()));
        }
        if let Some(SyncMode::Periodic { interval_ms: 0 }) = self.storage.as_ref().map(|s| &s.sync_mode) {
            return Err(SdkError::Configuration("periodic sync interval must be positive".into()));
        }
        Ok(())
    }

    pub fn storer_config(&self) -> StorerConfig {
        StorerConfig {
            policy: self.policy,
            channel_count: self.channel_count,
            buffer_capacity: self.buffer_capacity,
        }
    }

    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            update_existing: self.update_existing,
            channel_count: self.channel_count,
        }
    }

    pub fn file_storage_config(&self) -> Option<(PathBuf, FileStorageConfig)> {
        self.storage.as_ref().map(|section| {
            (
                section.directory.clone(),
                FileStorageConfig {
                    channel_count: self.channel_count,
                    sync_mode: section.sync_mode.clone(),
                },
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_the_default() {
        assert_eq!(PersistenceConfig::from_toml_str("").unwrap(), PersistenceConfig::default());
    }

    #[test]
    fn full_document() {
        let config = PersistenceConfig::from_toml_str(
            r#"
            byte_order = "reversed"
            channel_count = 4
            buffer_capacity = 4096
            policy = "eager"
            update_existing = true

            [storage]
            directory = "data"
            sync_mode = { periodic = { interval_ms = 250 } }

            [[renames]]
            type_name = "Person"
            legacy = "years"
            current = "age"
            "#,
        )
        .unwrap();
        assert_eq!(config.byte_order, ByteOrder::Reversed);
        assert_eq!(config.storer_config().policy, StoringPolicy::Eager);
        assert!(config.loader_config().update_existing);
        let (directory, storage) = config.file_storage_config().unwrap();
        assert_eq!(directory, PathBuf::from("data"));
        assert_eq!(storage.channel_count, 4);
        assert_eq!(storage.sync_mode, SyncMode::Periodic { interval_ms: 250 });
        assert_eq!(config.renames, vec![MemberRename::new("Person", "years", "age")]);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            PersistenceConfig::from_toml_str("channel_count = 3"),
            Err(SdkError::Configuration(_))
        ));
        assert!(PersistenceConfig::from_toml_str("buffer_capacity = 0").is_err());
        assert!(PersistenceConfig::from_toml_str("policy = \"sometimes\"").is_err());
        assert!(PersistenceConfig::from_toml_str(
            "[storage]\ndirectory = \"d\"\nsync_mode = { periodic = { interval_ms = 0 } }"
        )
        .is_err());
    }

    #[test]
    fn toml_roundtrip_and_load() {
        let config = PersistenceConfig {
            channel_count: 2,
            ..PersistenceConfig::with_directory("store")
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ogp.toml");
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();
        assert_eq!(PersistenceConfig::load(&path).unwrap(), config);
        assert!(matches!(
            PersistenceConfig::load(&dir.path().join("missing.toml")),
            Err(SdkError::Io(_))
        ));
    }
}
