//! Logging setup on top of `tracing`.

use tracing::Level;

/// Map a configured level name to a tracing level. Both "warn" and
/// "warning" are accepted since config files use either spelling; anything
/// unrecognized falls back to `info`.
pub(crate) fn parse_level(name: &str) -> Level {
    match name.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" | "warning" => Level::WARN,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Install the global fmt subscriber at the verbosity named by
/// `Settings::log_level`. `try_init` tolerates an already-installed
/// subscriber, so repeated calls from tests are no-ops.
pub fn init(default_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(parse_level(default_level))
        .with_target(false)
        .try_init();
}
