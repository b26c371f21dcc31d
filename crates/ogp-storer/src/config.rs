use ogp_binary::DEFAULT_BUFFER_CAPACITY;
use ogp_types::{PersistenceError, PersistenceResult};
use serde::{Deserialize, Serialize};

/// Which referenced instances a storer session writes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoringPolicy {
    /// Only instances without an object id yet, plus the explicit roots.
    #[default]
    Lazy,
    /// Every reachable instance, once per session.
    Eager,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorerConfig {
    pub policy: StoringPolicy,
    /// Number of channel chunks; a power of two.
    pub channel_count: usize,
    /// Capacity of each newly allocated chunk buffer.
    pub buffer_capacity: usize,
}

impl Default for StorerConfig {
    fn default() -> Self {
        Self {
            policy: StoringPolicy::default(),
            channel_count: 1,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

impl StorerConfig {
    pub fn validate(&self) -> PersistenceResult<()> {
        if self.channel_count == 0 || !self.channel_count.is_power_of_two() {
            return Err(PersistenceError::StorageConfiguration(format!(
                "channel count {} is not a power of two",
                self.channel_count
            )));
        }
        if self.buffer_capacity == 0 {
            return Err(PersistenceError::StorageConfiguration("buffer capacity must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_parses_lowercase() {
        let config: StorerConfig = toml::from_str("policy = \"eager\"\nchannel_count = 4").unwrap();
        assert_eq!(config.policy, StoringPolicy::Eager);
        assert_eq!(config.channel_count, 4);
        assert_eq!(config.buffer_capacity, DEFAULT_BUFFER_CAPACITY);
        config.validate().unwrap();
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let config = StorerConfig {
            buffer_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
