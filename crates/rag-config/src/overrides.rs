//! Environment variable overrides applied on top of the config file.

use crate::schema::{LogLevel, RagConfig};
use tracing::{debug, warn};

/// Overrides `api.base_url`.
pub const ENV_BASE_URL: &str = "RAG_API_BASE_URL";
/// Overrides `logging.level`.
pub const ENV_LOG_LEVEL: &str = "RAG_LOG_LEVEL";

/// Apply overrides from the process environment.
pub fn apply_env_overrides(config: &mut RagConfig) {
    apply_overrides_from(config, |key| std::env::var(key).ok());
}

/// Apply overrides using `lookup` as the variable source.
pub fn apply_overrides_from(config: &mut RagConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(url) = lookup(ENV_BASE_URL).filter(|v| !v.trim().is_empty()) {
        debug!(base_url = %url, "base URL overridden from environment");
        config.api.base_url = url.trim().to_string();
    }

    if let Some(level) = lookup(ENV_LOG_LEVEL) {
        match LogLevel::parse(&level) {
            Some(level) => config.logging.level = level,
            None => warn!("ignoring {ENV_LOG_LEVEL}={level:?}: unknown log level"),
        }
    }
}
