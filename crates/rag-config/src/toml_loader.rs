//! TOML config file loading and creation.

use crate::schema::RagConfig;
use crate::validation;
use rag_common::ConfigError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};


pub const CONFIG_DIR_NAME: &str = "rag-assistant";
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Load and validate one TOML file.
///
/// Missing fields take their serde defaults. A file that parses but fails
/// validation is reported and replaced by the default config.
pub fn load_from_path(path: &Path) -> Result<RagConfig, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ConfigError::FileNotFound(path.to_path_buf()))
        }
        Err(e) => return Err(io_error("read", path, e)),
    };

    let config = parse_config(&content)?;
    match validation::validate(&config) {
        Ok(()) => {
            info!(path = %path.display(), "loaded config");
            Ok(config)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "invalid config, using defaults");
            Ok(RagConfig::default())
        }
    }
}

/// Parse config TOML without validating it.
pub fn parse_config(content: &str) -> Result<RagConfig, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::ParseError(format!("invalid TOML: {e}")))
}

/// Load from [`default_config_path`], writing a commented template first if
/// the file does not exist yet.
pub fn load_default() -> Result<RagConfig, ConfigError> {
    let path = default_config_path()?;
    match load_from_path(&path) {
        Err(ConfigError::FileNotFound(_)) => {
            create_default_config(&path)?;
            Ok(RagConfig::default())
        }
        other => other,
    }
}

/// `<platform config dir>/rag-assistant/config.toml`, e.g.
/// `~/.config/rag-assistant/config.toml` on Linux.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
        .ok_or_else(|| ConfigError::ParseError("no platform config directory".into()))
}

/// Write the commented template to `path`, creating parent directories.
pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_error("create", parent, e))?;
    }
    std::fs::write(path, default_config_toml()).map_err(|e| io_error("write", path, e))?;

    info!(path = %path.display(), "created default config");
    Ok(())
}

fn io_error(action: &str, path: &Path, err: std::io::Error) -> ConfigError {
    ConfigError::ParseError(format!("failed to {action} {}: {err}", path.display()))
}

/// Template written on first run.
fn default_config_toml() -> &'static str {
    r##"# RAG assistant client configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.
# RAG_API_BASE_URL and RAG_LOG_LEVEL override the values below.

[api]
# base_url = "http://localhost:8000"
# timeout_secs = 30          # 1-600, single-shot requests
# connect_timeout_secs = 10  # 1-120, also used for streams

[chat]
# stream = true                  # stream answers token by token
# fallback_to_single_shot = true # retry without streaming if the stream cannot open
# max_decode_errors = 3          # 1-100 consecutive bad events before giving up

[query]
# top_k = 3           # 1-50
# method = "hybrid"   # dense, sparse, hybrid

[logging]
# level = "info"      # trace, debug, info, warn, error
"##
}
