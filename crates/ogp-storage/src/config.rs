use std::path::Path;
use std::time::Duration;

use ogp_binary::ByteOrder;
use ogp_types::{PersistenceError, PersistenceResult};
use serde::{Deserialize, Serialize};

/// Flush/sync strategy for channel files.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` data and transaction files after every write.
    EveryWrite,
    /// `fsync` when the last sync is older than the interval.
    Periodic { interval_ms: u64 },
    /// Flush to the OS and let the page cache decide.
    #[default]
    OsDefault,
}

impl SyncMode {
    pub fn interval(&self) -> Option<Duration> {
        match self {
            Self::Periodic { interval_ms } => Some(Duration::from_millis(*interval_ms)),
            _ => None,
        }
    }
}

/// Configuration for [`FileStorage`](crate::FileStorage).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileStorageConfig {
    /// Number of channels; a power of two.
    pub channel_count: usize,
    pub sync_mode: SyncMode,
}

impl Default for FileStorageConfig {
    fn default() -> Self {
        Self {
            channel_count: 1,
            sync_mode: SyncMode::default(),
        }
    }
}

impl FileStorageConfig {
    pub fn validate(&self) -> PersistenceResult<()> {
        if self.channel_count == 0 || !self.channel_count.is_power_of_two() {
            return Err(PersistenceError::StorageConfiguration(format!(
                "channel count {} is not a power of two",
                self.channel_count
            )));
        }
        Ok(())
    }
}

pub(crate) const MANIFEST_FILE: &str = "storage.toml";

/// The fixed properties of a storage directory, written once on creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageManifest {
    pub channel_count: usize,
    pub byte_order: ByteOrder,
}

impl StorageManifest {
    /// Read the manifest of `directory`, if it has one.
    pub fn load(directory: &Path) -> PersistenceResult<Option<Self>> {
        let path = directory.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)?;
        toml::from_str(&text)
            .map(Some)
            .map_err(|e| PersistenceError::StorageConfiguration(format!("{}: {e}", path.display())))
    }

    pub(crate) fn save(&self, directory: &Path) -> PersistenceResult<()> {
        let text = toml::to_string(self).map_err(|e| PersistenceError::StorageConfiguration(e.to_string()))?;
        std::fs::write(directory.join(MANIFEST_FILE), text)?;
        Ok(())
    }

    /// Fail unless `other` describes the same layout.
    pub(crate) fn ensure_matches(&self, other: &Self) -> PersistenceResult<()> {
        if self.channel_count != other.channel_count {
            return Err(PersistenceError::StorageConfiguration(format!(
                "storage has {} channels, configured for {}",
                self.channel_count, other.channel_count
            )));
        }
        if self.byte_order != other.byte_order {
            return Err(PersistenceError::StorageConfiguration(format!(
                "storage is {} byte order, opened as {}",
                self.byte_order, other.byte_order
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_toml() {
        let config: FileStorageConfig = toml::from_str(
            r#"
            channel_count = 4
            sync_mode = { periodic = { interval_ms = 250 } }
            "#,
        )
        .unwrap();
        assert_eq!(config.channel_count, 4);
        assert_eq!(config.sync_mode.interval(), Some(Duration::from_millis(250)));
        config.validate().unwrap();
    }

    #[test]
    fn channel_count_must_be_power_of_two() {
        let config = FileStorageConfig {
            channel_count: 3,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PersistenceError::StorageConfiguration(_))));
    }

    #[test]
    fn manifest_mismatch_is_reported() {
        let a = StorageManifest {
            channel_count: 2,
            byte_order: ByteOrder::Direct,
        };
        let b = StorageManifest {
            byte_order: ByteOrder::Reversed,
            ..a.clone()
        };
        assert!(a.ensure_matches(&a).is_ok());
        assert!(a.ensure_matches(&b).is_err());
    }
}
