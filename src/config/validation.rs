use super::{AppConfig, ConfigError};

const VALID_LOG_LEVELS: &[&str] = &[
    "DEBUG", "INFO", "WARN", "WARNING", "ERROR", "CRITICAL", "TRACE", "DISABLED",
];

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_upstream(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.timeout == 0 {
        return Err(validation_err("server.timeout must be greater than 0"));
    }
    if server.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "server.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    if server.stream_channel_capacity == 0 {
        return Err(validation_err(
            "server.stream_channel_capacity must be greater than 0",
        ));
    }
    if server.runtime_worker_threads == Some(0) {
        return Err(validation_err(
            "server.runtime_worker_threads must be greater than 0 when set",
        ));
    }
    Ok(())
}

fn validate_upstream(config: &AppConfig) -> Result<(), ConfigError> {
    let upstream = &config.upstream;
    let base_url = upstream.base_url.trim();
    if base_url.is_empty() {
        return Err(validation_err("upstream.base_url cannot be empty"));
    }
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(validation_err(format!(
            "upstream.base_url must start with http:// or https://, got '{base_url}'"
        )));
    }
    if upstream.api_key.trim().is_empty() {
        return Err(validation_err("upstream.api_key cannot be empty"));
    }
    if let Some(model) = upstream.model_override.as_deref() {
        if model.trim().is_empty() {
            return Err(validation_err(
                "upstream.model_override cannot be empty when set",
            ));
        }
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let level = config.features.log_level.to_uppercase();
    if !VALID_LOG_LEVELS.contains(&level.as_str()) {
        return Err(validation_err(format!(
            "features.log_level must be one of {VALID_LOG_LEVELS:?}, got '{}'",
            config.features.log_level
        )));
    }
    Ok(())
}
