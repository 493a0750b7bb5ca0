//! Shared configuration for the colimator process layer.
//!
//! Everything that tunes how external tools are spawned, waited on and torn
//! down lives here so the session crate and the CLI read the same values.

pub mod config;
