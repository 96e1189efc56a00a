//! File-system storage: TOML configuration under the platform config directory.

pub mod config;
