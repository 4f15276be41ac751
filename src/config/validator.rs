use crate::config::{Config, ProfileOverrides};
use crate::error::{Result, ShardfuseError, ValidationError};

/// Upper bound accepted for `fanout.max_concurrent_shards`
const MAX_CONCURRENT_SHARDS: usize = 4096;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every violation
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_fanout(config, &mut errors);
        Self::validate_fusion(config, &mut errors);
        Self::validate_sizes(config, &mut errors);

        for (name, profile) in &config.profiles {
            Self::validate_profile(name, profile, &mut errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ShardfuseError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_fanout(config: &Config, errors: &mut Vec<ValidationError>) {
        let max = config.fanout.max_concurrent_shards;
        if max == 0 || max > MAX_CONCURRENT_SHARDS {
            errors.push(ValidationError::new(
                "fanout.max_concurrent_shards",
                format!("Must be between 1 and {}, got {}", MAX_CONCURRENT_SHARDS, max),
            ));
        }
    }

    fn validate_fusion(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.fusion.rank_constant == 0 {
            errors.push(ValidationError::new(
                "fusion.rank_constant",
                "Rank constant must be at least 1",
            ));
        }
        if config.fusion.window_size == Some(0) {
            errors.push(ValidationError::new(
                "fusion.window_size",
                "Window size must be greater than 0",
            ));
        }
    }

    fn validate_sizes(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.aggregation.default_terms_size == 0 {
            errors.push(ValidationError::new(
                "aggregation.default_terms_size",
                "Default terms size must be greater than 0",
            ));
        }
        if config.facets.default_size == 0 {
            errors.push(ValidationError::new(
                "facets.default_size",
                "Default facet size must be greater than 0",
            ));
        }
    }

    fn validate_profile(name: &str, profile: &ProfileOverrides, errors: &mut Vec<ValidationError>) {
        let checks = [
            ("max_concurrent_shards", profile.max_concurrent_shards),
            ("rank_constant", profile.rank_constant),
            ("window_size", profile.window_size),
            ("default_terms_size", profile.default_terms_size),
        ];
        for (key, value) in checks {
            if value == Some(0) {
                errors.push(ValidationError::new(
                    format!("profiles.{}.{}", name, key),
                    "Override must be greater than 0",
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_zero_rank_constant() {
        let mut config = Config::default();
        config.fusion.rank_constant = 0;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = Config::default();
        config.meta.schema_version = "0.1.0".to_string();
        config.fanout.max_concurrent_shards = 0;
        config.facets.default_size = 0;
        config.profiles.insert(
            "bad".to_string(),
            ProfileOverrides {
                rank_constant: Some(0),
                ..Default::default()
            },
        );

        match ConfigValidator::validate(&config) {
            Err(ShardfuseError::ConfigValidation { errors }) => {
                let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
                assert_eq!(errors.len(), 4);
                assert!(paths.contains(&"profiles.bad.rank_constant"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }
}
