use cm_core::config::LoggingConfig;
use cm_telemetry::logging;

// All tests share one process-wide subscriber; whichever runs first
// installs it and the rest must quietly do nothing.

#[test]
fn config_driven_init_is_repeatable() {
    logging::init_from_config("cm-test", &LoggingConfig::default());
    logging::init_from_config(
        "cm-test",
        &LoggingConfig {
            level: "warn".into(),
            json: true,
        },
    );
    tracing::info!(key = "value", "after config init");
}

#[test]
fn direct_init_after_config_init_is_a_no_op() {
    logging::init_from_config("cm-test", &LoggingConfig::default());
    logging::init_logging("cm-test", "debug");
    logging::init_logging_json("cm-test", "cm_session=trace");
    tracing::warn!("still logging");
}

#[test]
fn unparsable_level_does_not_panic() {
    logging::init_logging("cm-test", "not a [valid directive");
}
