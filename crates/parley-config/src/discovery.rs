//! Locating and layering config files.
//!
//! Two layers, the later overriding the earlier:
//! 1. `<user dir>/config.toml`, where the user dir is `$PARLEY_CONFIG_DIR`
//!    or the platform config dir plus `parley`
//! 2. `<project dir>/parley.toml`
//!
//! CLI flags are applied on top by the binary.

use std::path::{Path, PathBuf};

use crate::{ConfigError, ParleyConfig, Result};

const PROJECT_CONFIG_FILE: &str = "parley.toml";
const USER_CONFIG_FILE: &str = "config.toml";
const CONFIG_DIR_ENV: &str = "PARLEY_CONFIG_DIR";

/// One file that was checked while loading.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub path: PathBuf,
    /// Whether the file was found and merged.
    pub loaded: bool,
}

/// Merged configuration plus where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: ParleyConfig,
    /// Files checked, lowest precedence first.
    pub sources: Vec<ConfigSource>,
    /// Files that existed but could not be parsed.
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Load exactly one file, skipping discovery. Unlike layered loading, a
    /// bad file is an error.
    pub fn from_file(path: &Path) -> Result<Self> {
        Ok(Self {
            config: read_file(path)?,
            sources: vec![ConfigSource {
                path: path.to_path_buf(),
                loaded: true,
            }],
            warnings: Vec::new(),
        })
    }

    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.as_path())
            .collect()
    }
}

/// Directories the config layers are read from.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    /// `None` when no platform config dir exists and the env var is unset.
    pub user_dir: Option<PathBuf>,
    pub project_dir: PathBuf,
}

impl ConfigPaths {
    /// User dir from the environment, project dir is the working directory.
    pub fn discover() -> Self {
        let user_dir = match std::env::var(CONFIG_DIR_ENV) {
            Ok(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
            _ => dirs::config_dir().map(|d| d.join("parley")),
        };
        Self {
            user_dir,
            project_dir: PathBuf::from("."),
        }
    }

    pub fn user_file(&self) -> Option<PathBuf> {
        self.user_dir.as_ref().map(|d| d.join(USER_CONFIG_FILE))
    }

    pub fn project_file(&self) -> PathBuf {
        self.project_dir.join(PROJECT_CONFIG_FILE)
    }

    pub fn log_dir(&self) -> Option<PathBuf> {
        self.user_dir.as_ref().map(|d| d.join("logs"))
    }

    /// Merge every layer that exists. Unparseable files become warnings.
    pub fn load(&self) -> LoadedConfig {
        let mut loaded = LoadedConfig {
            config: ParleyConfig::new(),
            sources: Vec::new(),
            warnings: Vec::new(),
        };

        let layers = self.user_file().into_iter().chain([self.project_file()]);
        for path in layers {
            let merged = path.is_file()
                && match read_file(&path) {
                    Ok(layer) => {
                        loaded.config.merge(layer);
                        true
                    }
                    Err(e) => {
                        loaded
                            .warnings
                            .push(format!("Failed to load {}: {}", path.display(), e));
                        false
                    }
                };
            loaded.sources.push(ConfigSource {
                path,
                loaded: merged,
            });
        }
        loaded
    }
}

impl ParleyConfig {
    /// Write as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        let write_err = |path: &Path, source| ConfigError::WriteFile {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| write_err(parent, e))?;
        }
        std::fs::write(path, self.to_toml()?).map_err(|e| write_err(path, e))
    }
}

fn read_file(path: &Path) -> Result<ParleyConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    ParleyConfig::from_toml(&contents)
}
