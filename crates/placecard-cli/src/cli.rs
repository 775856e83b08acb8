use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "placecard")]
#[command(about = "Edit business place cards from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the engine config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run an interactive editing chat on stdin/stdout
    Chat {
        /// Operator ID to act as
        #[arg(long, value_name = "ID")]
        operator: i64,
        /// Operator display name used in change summaries
        #[arg(long, value_name = "NAME")]
        name: Option<String>,
        /// JSON file with records for the in-memory store
        #[arg(long, value_name = "PATH")]
        seed: Option<PathBuf>,
        /// Allow editing every record
        #[arg(long)]
        admin: bool,
        /// Record the operator may edit (repeatable)
        #[arg(long = "allow", value_name = "RECORD_ID")]
        allowed: Vec<String>,
    },
    /// Validate one field value and print its normalized form
    Check {
        /// Field name or alias (e.g. phone, map, hours)
        field: String,
        /// Raw value; for photos, a path to an image file
        value: Vec<String>,
    },
    /// Inspect engine configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the config file location
    Path,
    /// Print the effective config after environment overrides
    Show,
}
