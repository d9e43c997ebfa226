//! Configuration system for the Parley voice server.
//!
//! Provides TOML-based configuration with:
//! - One optional section per runtime component (`[server]`, `[connections]`,
//!   `[session]`, `[barge_in]`, `[logging]`)
//! - Named resource pools (`[pools.tts]`, `[pools.stt]`, ...)
//! - Config file layering (XDG user config + project-local overrides)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{ConfigPaths, ConfigSource, LoadedConfig};
pub use error::{ConfigError, Result};
pub use types::*;
