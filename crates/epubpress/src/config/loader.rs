use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;
use crate::render::FontSource;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

/// Checks the rules the schema cannot express.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if !(1..=16).contains(&config.worker_count) {
        return Err(ConfigError::Validation {
            message: format!(
                "worker_count must be between 1 and 16, got {}",
                config.worker_count
            ),
        });
    }

    if !(1..=100).contains(&config.images.jpeg_quality) {
        return Err(ConfigError::Validation {
            message: format!(
                "images.jpeg_quality must be between 1 and 100, got {}",
                config.images.jpeg_quality
            ),
        });
    }

    if !config.page.font_size.is_finite() || config.page.font_size <= 0.0 {
        return Err(ConfigError::Validation {
            message: "page.font_size must be a positive number".to_string(),
        });
    }

    if !config.page.line_height.is_finite() || config.page.line_height < 1.0 {
        return Err(ConfigError::Validation {
            message: "page.line_height must be at least 1.0".to_string(),
        });
    }

    if let FontSource::File { path } = &config.page.fallback_font {
        if !path.is_file() {
            return Err(ConfigError::Validation {
                message: format!(
                    "page.fallback_font.path does not name a file: {}",
                    path.display()
                ),
            });
        }
    }

    if let crate::queue::DestinationPolicy::Directory { path } = &config.output.destination {
        if path.as_os_str().is_empty() {
            return Err(ConfigError::Validation {
                message: "output.destination.path must not be empty".to_string(),
            });
        }
    }

    if tracing_subscriber::EnvFilter::try_new(&config.logging.level).is_err() {
        return Err(ConfigError::Validation {
            message: format!("Invalid logging.level filter: {}", config.logging.level),
        });
    }

    Ok(())
}
