//! Configuration management for shardfuse
//!
//! Search defaults live in a TOML file. Requests override them per search;
//! profiles and `SHARDFUSE_SECTION__KEY` environment variables override the
//! file.

use crate::error::{Result, ShardfuseError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub fanout: FanoutConfig,
    pub fusion: FusionConfig,
    pub aggregation: AggregationConfig,
    pub facets: FacetsConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Shard fan-out configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanoutConfig {
    /// Upper bound on shard searches running at once, per alias
    pub max_concurrent_shards: usize,
}

/// Hybrid fusion defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionConfig {
    pub rank_constant: usize,
    /// Score window; unset means "the request's size"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_size: Option<usize>,
}

/// Aggregation defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationConfig {
    pub default_terms_size: usize,
}

/// Facet defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetsConfig {
    pub default_size: usize,
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_shards: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank_constant: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_terms_size: Option<usize>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ShardfuseError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| ShardfuseError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Load `path` if given, else the default path if it exists, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let default_path = Self::default_path()?;
        if default_path.exists() {
            Self::load(&default_path)
        } else {
            tracing::debug!("No config at {:?}, using defaults", default_path);
            let mut config = Self::default();
            config.apply_env_overrides();
            ConfigValidator::validate(&config)?;
            Ok(config)
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ShardfuseError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| ShardfuseError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| ShardfuseError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(max) = overrides.max_concurrent_shards {
            self.fanout.max_concurrent_shards = max;
        }
        if let Some(rank_constant) = overrides.rank_constant {
            self.fusion.rank_constant = rank_constant;
        }
        if let Some(window_size) = overrides.window_size {
            self.fusion.window_size = Some(window_size);
        }
        if let Some(size) = overrides.default_terms_size {
            self.aggregation.default_terms_size = size;
        }
        ConfigValidator::validate(self)
    }

    /// Apply environment variable overrides
    /// Environment variables in format: SHARDFUSE_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("SHARDFUSE_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    /// Set one value addressed as `SECTION__KEY`
    pub fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "FANOUT__MAX_CONCURRENT_SHARDS" => {
                self.fanout.max_concurrent_shards = parse_usize(path, value)?;
            }
            "FUSION__RANK_CONSTANT" => {
                self.fusion.rank_constant = parse_usize(path, value)?;
            }
            "FUSION__WINDOW_SIZE" => {
                self.fusion.window_size = Some(parse_usize(path, value)?);
            }
            "AGGREGATION__DEFAULT_TERMS_SIZE" => {
                self.aggregation.default_terms_size = parse_usize(path, value)?;
            }
            "FACETS__DEFAULT_SIZE" => {
                self.facets.default_size = parse_usize(path, value)?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            ShardfuseError::Config("Cannot determine config directory".to_string())
        })?;

        Ok(config_dir.join("shardfuse").join("config.toml"))
    }
}

fn parse_usize(path: &str, value: &str) -> Result<usize> {
    value.parse().map_err(|_| ShardfuseError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}' as a non-negative integer", value),
    })
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            fanout: FanoutConfig::default(),
            fusion: FusionConfig::default(),
            aggregation: AggregationConfig::default(),
            facets: FacetsConfig::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            max_concurrent_shards: 16,
        }
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            rank_constant: crate::fusion::DEFAULT_RANK_CONSTANT,
            window_size: None,
        }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            default_terms_size: crate::aggregation::DEFAULT_TERMS_SIZE,
        }
    }
}

impl Default for FacetsConfig {
    fn default() -> Self {
        Self {
            default_size: crate::facets::DEFAULT_FACET_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_style_override() {
        let mut config = Config::default();
        config
            .set_value_from_env("FUSION__RANK_CONSTANT", "20")
            .unwrap();
        config.set_value_from_env("FUSION__WINDOW_SIZE", "100").unwrap();
        assert_eq!(config.fusion.rank_constant, 20);
        assert_eq!(config.fusion.window_size, Some(100));

        assert!(matches!(
            config.set_value_from_env("FANOUT__MAX_CONCURRENT_SHARDS", "many"),
            Err(ShardfuseError::InvalidConfigValue { .. })
        ));
        // unknown keys are ignored
        assert!(config.set_value_from_env("NOPE__NOPE", "1").is_ok());
    }

    #[test]
    fn test_profile_overrides() {
        let mut config = Config::default();
        config.profiles.insert(
            "wide".to_string(),
            ProfileOverrides {
                window_size: Some(200),
                max_concurrent_shards: Some(4),
                ..Default::default()
            },
        );
        config.apply_profile("wide").unwrap();
        assert_eq!(config.fusion.window_size, Some(200));
        assert_eq!(config.fanout.max_concurrent_shards, 4);
        assert!(config.apply_profile("missing").is_err());
    }

    #[test]
    fn test_toml_round_trip_keeps_sections() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        assert!(text.contains("[_meta]"));
        assert!(text.contains("[fanout]"));
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }
}
