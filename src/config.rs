use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level runtime configuration, loaded once at startup from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the serialized scoring model artifact.
    pub model_path: String,
    /// Path to the JSON history file.
    pub history_path: String,
    /// Per-lookup timeout in seconds (WHOIS, DNS, HTTP, rank providers).
    pub lookup_timeout_seconds: u64,
    /// Maximum concurrent URL analyses inside one batch request.
    pub batch_workers: usize,
    /// Maximum URLs accepted per batch request.
    pub batch_limit: usize,
    /// User agent sent with page fetches and redirect probes.
    pub user_agent: String,
    /// Use deterministic offline providers for WHOIS and rank lookups
    /// instead of the network. Intended for tests and demos.
    pub offline_providers: bool,
    /// Base URL of the traffic/page-rank service, when one is deployed.
    pub rank_service_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            model_path: "model.json".to_string(),
            history_path: "url_history.json".to_string(),
            lookup_timeout_seconds: 5,
            batch_workers: 4,
            batch_limit: 10,
            user_agent: format!("phish-scout/{}", env!("CARGO_PKG_VERSION")),
            offline_providers: false,
            rank_service_url: None,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the config if the file exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::load(path)
        } else {
            log::debug!("Config file {path} not found, using defaults");
            Ok(Config::default())
        }
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {path}"))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.lookup_timeout_seconds == 0 {
            anyhow::bail!("lookup_timeout_seconds must be at least 1");
        }
        if self.batch_workers == 0 {
            anyhow::bail!("batch_workers must be at least 1");
        }
        if self.batch_limit == 0 {
            anyhow::bail!("batch_limit must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_limit, 10);
        assert_eq!(config.lookup_timeout_seconds, 5);
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = Config {
            offline_providers: true,
            rank_service_url: Some("http://rank.internal:8080".to_string()),
            ..Config::default()
        };
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert!(parsed.offline_providers);
        assert_eq!(parsed.rank_service_url, config.rank_service_url);
        assert_eq!(parsed.model_path, "model.json");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = Config {
            lookup_timeout_seconds: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
