//! Configuration schema types.
//!
//! All structs use `serde(default)` so partial configs work correctly.

use rag_common::RetrievalMethod;
use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Root configuration for the assistant client.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RagConfig {
    pub api: ApiConfig,
    pub chat: ChatConfig,
    pub query: QueryConfig,
    pub logging: LoggingConfig,
}

/// Backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL every endpoint path is appended to.
    pub base_url: String,
    /// Whole-request timeout for single-shot calls (valid range: 1-600).
    pub timeout_secs: u32,
    /// Connect timeout, also applied to streams (valid range: 1-120).
    pub connect_timeout_secs: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

/// Conversation behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Stream answers by default.
    pub stream: bool,
    /// Retry as a single-shot request when a stream cannot be opened.
    pub fallback_to_single_shot: bool,
    /// Consecutive undecodable stream events tolerated (valid range: 1-100).
    pub max_decode_errors: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            stream: true,
            fallback_to_single_shot: true,
            max_decode_errors: 3,
        }
    }
}

/// Defaults for one-shot `/query` calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Number of retrieved chunks (valid range: 1-50).
    pub top_k: u32,
    pub method: RetrievalMethod,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            method: RetrievalMethod::Hybrid,
        }
    }
}

/// Log level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
}

impl LoggingConfig {
    /// `EnvFilter` directive covering every crate of the workspace.
    pub fn directive(&self) -> String {
        format!("rag={}", self.level.as_str())
    }
}
