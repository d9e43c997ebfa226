//! CLI command handlers.

pub mod config;
pub mod start;
pub mod status;

use std::path::Path;

use anyhow::Result;
use parley_config::{ConfigPaths, LoadedConfig};

/// Where `status` looks when neither `--server` nor a config says otherwise.
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8090";

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Server URL to connect to.
    pub server_url: String,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
    /// Merged configuration and where it came from.
    pub loaded: LoadedConfig,
}

/// Load an explicit config file, or discover and merge the default layers.
pub fn load(explicit: Option<&Path>) -> Result<LoadedConfig> {
    match explicit {
        Some(path) => Ok(LoadedConfig::from_file(path)?),
        None => Ok(ConfigPaths::discover().load()),
    }
}
