pub mod token_counter;

use crate::protocol::openai_chat::Usage;
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
pub fn init_tracing(log_level: &str) {
    let Some(level) = tracing_level(log_level) else {
        return;
    };

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("INFO"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Translate a configured log level into an `EnvFilter` directive.
///
/// Returns `None` when logging is disabled.
#[must_use]
pub fn tracing_level(log_level: &str) -> Option<String> {
    let level = log_level.to_uppercase();
    match level.as_str() {
        "DISABLED" => None,
        "WARNING" => Some("WARN".to_string()),
        "CRITICAL" => Some("ERROR".to_string()),
        _ => Some(level),
    }
}

/// Log token usage for a completed request, computing duration from start time.
pub fn log_request_complete(
    request_id: &str,
    model: &str,
    usage: &Usage,
    usage_source: &str,
    start_time: std::time::Instant,
) {
    token_counter::log_request_usage(request_id, model, usage, usage_source, start_time.elapsed());
}

#[cfg(test)]
mod tests {
    use super::tracing_level;

    #[test]
    fn test_tracing_level_mapping() {
        assert_eq!(tracing_level("disabled"), None);
        assert_eq!(tracing_level("warning").as_deref(), Some("WARN"));
        assert_eq!(tracing_level("CRITICAL").as_deref(), Some("ERROR"));
        assert_eq!(tracing_level("debug").as_deref(), Some("DEBUG"));
    }
}
