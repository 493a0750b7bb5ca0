//! Logging setup shared by colimator binaries and tests.
//!
//! Output goes through `tracing-subscriber`, either human-readable or JSON,
//! with `RUST_LOG` taking precedence over the configured level.

pub mod logging;
