//! Configuration for the RAG assistant client.
//!
//! TOML file with serde defaults for every field, environment overrides
//! on top, and range validation.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use rag_config::{load_config, config_to_json};
//!
//! let config = load_config().expect("failed to load config");
//! println!("{}", config_to_json(&config));
//! ```

pub mod overrides;
pub mod schema;
pub mod toml_loader;
pub mod validation;

pub use overrides::apply_env_overrides;
pub use schema::{
    ApiConfig, ChatConfig, LogLevel, LoggingConfig, QueryConfig, RagConfig, CONFIG_SCHEMA_VERSION,
};

use rag_common::ConfigError;
use std::path::Path;

/// Load config from the platform default path.
///
/// Creates a default file if none exists, applies environment overrides,
/// and validates the result.
pub fn load_config() -> Result<RagConfig, ConfigError> {
    finish(toml_loader::load_default()?)
}

/// Load config from an explicit path, then apply overrides and validate.
pub fn load_config_from(path: &Path) -> Result<RagConfig, ConfigError> {
    finish(toml_loader::load_from_path(path)?)
}

fn finish(mut config: RagConfig) -> Result<RagConfig, ConfigError> {
    apply_env_overrides(&mut config);
    validation::validate(&config)?;
    Ok(config)
}

/// Serialize a config to a pretty-printed JSON string.
pub fn config_to_json(config: &RagConfig) -> String {
    serde_json::to_string_pretty(config)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize config: {e}\"}}"))
}
