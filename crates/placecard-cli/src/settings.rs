//! Config file location and loading.

use std::path::{Path, PathBuf};

use placecard_core::EngineConfig;

use crate::error::CliError;

const CONFIG_DIR_NAME: &str = "placecard";
const CONFIG_FILE_NAME: &str = "config.json";

pub fn default_config_path() -> Result<PathBuf, CliError> {
    dirs::config_dir()
        .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
        .ok_or_else(|| CliError::Config("Failed to resolve config directory".to_string()))
}

/// Explicit `--config` path wins over the platform default.
pub fn resolve_config_path(cli_path: Option<&Path>) -> Result<PathBuf, CliError> {
    cli_path.map_or_else(default_config_path, |path| Ok(path.to_path_buf()))
}

pub fn load_engine_config(cli_path: Option<&Path>) -> Result<EngineConfig, CliError> {
    let path = resolve_config_path(cli_path)?;
    let config = EngineConfig::load(&path)?;
    tracing::debug!(path = %path.display(), "Loaded engine config");
    Ok(config)
}
