use cm_core::config::LoggingConfig;
use tracing_subscriber::{fmt, EnvFilter};

/// `RUST_LOG` wins over the configured level.
fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the global subscriber described by the `[logging]` section.
///
/// Output goes to stderr so `cm exec`/`cm tail` keep stdout for the child's
/// output. Only the first call in a process installs anything; later calls
/// (e.g. from several tests) are no-ops.
pub fn init_from_config(service_name: &str, cfg: &LoggingConfig) {
    if cfg.json {
        init_logging_json(service_name, &cfg.level);
    } else {
        init_logging(service_name, &cfg.level);
    }
}

/// Human-readable logs at `default_level` (e.g. "info", "cm_session=debug,warn").
pub fn init_logging(service_name: &str, default_level: &str) {
    let installed = fmt()
        .with_env_filter(filter(default_level))
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(service = service_name, format = "text", "logging initialised");
    }
}

/// One JSON object per event, for log shippers.
pub fn init_logging_json(service_name: &str, default_level: &str) {
    let installed = fmt()
        .json()
        .with_env_filter(filter(default_level))
        .with_target(true)
        .with_current_span(false)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(service = service_name, format = "json", "logging initialised");
    }
}
