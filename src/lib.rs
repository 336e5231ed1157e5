//! Headless runner for the gbcc emulation core.

/// Runner settings loaded from TOML.
pub mod config;
