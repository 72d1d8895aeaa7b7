//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::BalancerConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<BalancerConfig, ConfigError> {
    let config: BalancerConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<BalancerConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config = parse_config(&content)?;

    tracing::info!(
        path = %path.display(),
        instances = config.instances.len(),
        strategy = %config.strategy.kind,
        "Configuration loaded"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_surfaces() {
        let err = parse_config("instances = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validation_error_lists_fields() {
        let raw = r#"
            [[instances]]
            name = "a"
            address = "http://127.0.0.1:5001"
            weight = 0
        "#;
        let err = parse_config(raw).unwrap_err();
        assert!(err.to_string().contains("instances[0].weight"));
    }

    #[test]
    fn test_sample_config_parses() {
        let config = parse_config(include_str!("../../balancer.toml")).unwrap();
        assert_eq!(config.instances.len(), 3);
        assert_eq!(config.strategy.kind, crate::config::StrategyKind::Weighted);
        assert_eq!(config.failover.pairs[0].backup, "service-3");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_config(Path::new("/nonexistent/balancer.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
