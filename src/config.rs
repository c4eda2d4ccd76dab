//! Locating and loading the calx config file.

use calx_core::Config;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{CliError, Result};

/// `<config dir>/calx/config.toml` for the current user.
pub fn user_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "calx").map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load an explicit config file, or the user's file if it exists.
///
/// An explicit path must exist; a missing user file means defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match user_config_path() {
            Some(path) if path.exists() => path,
            _ => {
                debug!("no config file, using defaults");
                return Ok(Config::default());
            }
        },
    };

    debug!(path = %path.display(), "loading config");
    Config::load(&path).map_err(|source| CliError::Config { path, source })
}
