use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FwError, Result};
use crate::strategy;

/// Content Store eviction policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePolicy {
    Lru,
    Lfu,
    Arc,
    /// Trie-backed exact-name cache with no capacity bound
    Unbounded,
}

impl FromStr for CachePolicy {
    type Err = FwError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(CachePolicy::Lru),
            "lfu" => Ok(CachePolicy::Lfu),
            "arc" => Ok(CachePolicy::Arc),
            "unbounded" => Ok(CachePolicy::Unbounded),
            other => Err(FwError::InvalidConfiguration(format!(
                "unknown cache policy: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CachePolicy::Lru => "lru",
            CachePolicy::Lfu => "lfu",
            CachePolicy::Arc => "arc",
            CachePolicy::Unbounded => "unbounded",
        };
        f.write_str(text)
    }
}

/// Forwarder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    /// Maximum number of cached Data packets (ignored by the unbounded policy)
    pub cs_capacity: usize,
    /// Content Store eviction policy
    pub cs_policy: CachePolicy,
    /// PIT entry lifetime for Interests that carry none, in milliseconds
    pub pit_lifetime_ms: u64,
    /// Tear a face down after this long without inbound traffic; 0 disables
    pub face_idle_timeout_ms: u64,
    /// Bound of each face's inbound and outbound queues
    pub face_queue_size: usize,
    /// Strategy installed at the root of the strategy table
    pub default_strategy: String,
    /// Packets with deeper names are dropped as malformed
    pub max_name_components: usize,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            cs_capacity: 1000,
            cs_policy: CachePolicy::Lru,
            pit_lifetime_ms: 4000,
            face_idle_timeout_ms: 600_000,
            face_queue_size: 1024,
            default_strategy: strategy::BEST_ROUTE.to_string(),
            max_name_components: 32,
        }
    }
}

impl ForwarderConfig {
    pub fn pit_lifetime(&self) -> Duration {
        Duration::from_millis(self.pit_lifetime_ms)
    }

    pub fn face_idle_timeout(&self) -> Option<Duration> {
        if self.face_idle_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.face_idle_timeout_ms))
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.cs_policy != CachePolicy::Unbounded && self.cs_capacity == 0 {
            return Err(FwError::InvalidConfiguration(
                "cs_capacity must be positive for bounded policies".to_string(),
            ));
        }
        if self.pit_lifetime_ms == 0 {
            return Err(FwError::InvalidConfiguration(
                "pit_lifetime_ms must be positive".to_string(),
            ));
        }
        if self.face_queue_size == 0 {
            return Err(FwError::InvalidConfiguration(
                "face_queue_size must be positive".to_string(),
            ));
        }
        if !strategy::is_known(&self.default_strategy) {
            return Err(FwError::UnknownStrategy(self.default_strategy.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_policy_parsing() {
        assert_eq!("LRU".parse::<CachePolicy>().unwrap(), CachePolicy::Lru);
        assert_eq!("arc".parse::<CachePolicy>().unwrap(), CachePolicy::Arc);
        assert!("fifo".parse::<CachePolicy>().is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ForwarderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pit_lifetime(), Duration::from_secs(4));
    }

    #[test]
    fn test_invalid_config() {
        let config = ForwarderConfig {
            cs_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ForwarderConfig {
            default_strategy: "random".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(FwError::UnknownStrategy("random".to_string()))
        );

        let config = ForwarderConfig {
            face_idle_timeout_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.face_idle_timeout(), None);
    }
}
