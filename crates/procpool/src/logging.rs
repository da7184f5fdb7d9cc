//! Tracing subscriber setup for binaries embedding the pool

use procpool_config::LoggingConfig;
use tracing::Level;

/// Map a configured level name to a tracing level, defaulting to info
pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install a stderr fmt subscriber
///
/// Returns false when a global subscriber was already set.
pub fn init(config: &LoggingConfig) -> bool {
    use tracing_subscriber::fmt;

    fmt()
        .with_max_level(parse_level(&config.level))
        .with_target(config.debug)
        .with_thread_ids(config.debug)
        .with_file(config.debug)
        .with_line_number(config.debug)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
