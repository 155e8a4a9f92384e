//! Full configuration validation.
//!
//! Every check pushes onto a shared error list so a bad file reports all
//! of its problems at once.

use crate::schema::RagConfig;
use rag_common::ConfigError;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &RagConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    validate_api(&mut errors, config);
    validate_range(
        &mut errors,
        "chat.max_decode_errors",
        config.chat.max_decode_errors,
        1,
        100,
    );
    validate_range(&mut errors, "query.top_k", config.query.top_k, 1, 50);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}

fn validate_api(errors: &mut Vec<String>, config: &RagConfig) {
    let base_url = config.api.base_url.trim();
    if base_url.is_empty() {
        errors.push("api.base_url must not be empty".to_string());
    } else if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        errors.push(format!(
            "api.base_url = {base_url:?} must start with http:// or https://"
        ));
    }

    validate_range(errors, "api.timeout_secs", config.api.timeout_secs, 1, 600);
    validate_range(
        errors,
        "api.connect_timeout_secs",
        config.api.connect_timeout_secs,
        1,
        120,
    );
}

/// Push an error if `value` is outside `[min, max]`.
fn validate_range(errors: &mut Vec<String>, name: &str, value: u32, min: u32, max: u32) {
    if value < min || value > max {
        errors.push(format!("{name} = {value} is out of range [{min}, {max}]"));
    }
}
