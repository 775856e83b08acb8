use std::path::Path;

use crate::cli::ConfigCommands;
use crate::error::CliError;
use crate::settings::{load_engine_config, resolve_config_path};

pub fn run_config(command: &ConfigCommands, config_path: Option<&Path>) -> Result<(), CliError> {
    match command {
        ConfigCommands::Path => {
            let path = resolve_config_path(config_path)?;
            let note = if path.exists() { "" } else { " (not created)" };
            println!("{}{note}", path.display());
        }
        ConfigCommands::Show => {
            let config = load_engine_config(config_path)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }
    Ok(())
}
