use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Re-populate instances that are already registered from the loaded
    /// data. Off by default: memory is newer than the storage.
    pub update_existing: bool,
    /// Channel count of the source; more than one groups requested ids per
    /// channel.
    pub channel_count: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            update_existing: false,
            channel_count: 1,
        }
    }
}
