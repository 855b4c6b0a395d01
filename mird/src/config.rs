use std::str::FromStr;
use std::{fs, path::Path};

use log::LevelFilter;
use serde::{Deserialize, Serialize};

use mir_fw::{strategy, ForwarderConfig, FwError};

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid forwarder configuration: {0}")]
    Forwarder(#[from] FwError),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub forwarder: ForwarderConfig,
    /// Strategy choices installed at startup, on top of the default strategy
    #[serde(default)]
    pub strategy: Vec<StrategyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub pid_file: Option<String>,
    /// Seconds between two statistics reports; 0 disables reporting
    pub stats_interval_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: Some("/var/run/mird.pid".to_string()),
            stats_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter, overridden by `RUST_LOG`
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub prefix: String,
    pub name: String,
}

impl Config {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if !path.as_ref().exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.forwarder.validate()?;

        LevelFilter::from_str(&self.logging.level).map_err(|_| {
            ConfigError::Invalid(format!("unknown log level: {}", self.logging.level))
        })?;

        for choice in &self.strategy {
            if !choice.prefix.starts_with('/') {
                return Err(ConfigError::Invalid(format!(
                    "strategy prefix must start with '/': {}",
                    choice.prefix
                )));
            }
            if !strategy::is_known(&choice.name) {
                return Err(FwError::UnknownStrategy(choice.name.clone()).into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mir_fw::CachePolicy;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(dir.path().join("absent.toml")).unwrap();

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.forwarder.cs_capacity, 1000);
        assert!(config.strategy.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mird.toml");
        fs::write(
            &path,
            r#"
[logging]
level = "debug"

[forwarder]
cs_policy = "arc"
cs_capacity = 64

[[strategy]]
prefix = "/group"
name = "multicast"
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.forwarder.cs_policy, CachePolicy::Arc);
        assert_eq!(config.forwarder.cs_capacity, 64);
        assert_eq!(config.forwarder.pit_lifetime_ms, 4000);
        assert_eq!(config.daemon.stats_interval_secs, 60);
        assert_eq!(
            config.strategy,
            vec![StrategyConfig {
                prefix: "/group".to_string(),
                name: "multicast".to_string(),
            }]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("saved.toml");
        let mut config = Config::default();
        config.daemon.pid_file = None;
        config.forwarder.cs_policy = CachePolicy::Lfu;
        config.strategy.push(StrategyConfig {
            prefix: "/a".to_string(),
            name: "best-route".to_string(),
        });

        config.save(&path).unwrap();
        let reloaded = Config::load(&path).unwrap();

        assert_eq!(reloaded.daemon.pid_file, None);
        assert_eq!(reloaded.forwarder.cs_policy, CachePolicy::Lfu);
        assert_eq!(reloaded.strategy, config.strategy);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[forwarder\ncs_capacity = ").unwrap();

        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Config::default();
        config.logging.level = "chatty".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.strategy.push(StrategyConfig {
            prefix: "/x".to_string(),
            name: "random".to_string(),
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Forwarder(FwError::UnknownStrategy(_)))
        ));

        let mut config = Config::default();
        config.strategy.push(StrategyConfig {
            prefix: "x".to_string(),
            name: "multicast".to_string(),
        });
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.forwarder.pit_lifetime_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Forwarder(_))));
    }
}
