//! placecard CLI - edit business place cards from the terminal
//!
//! Drives the same editing sessions a chat bot would, reading operator input
//! from stdin and printing replies to stdout.

mod cli;
mod commands;
mod error;
mod settings;


use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::chat::{run_chat, ChatOptions};
use crate::commands::check::run_check;
use crate::commands::config::run_config;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("placecard=info".parse().expect("Invalid log directive")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Chat {
            operator,
            name,
            seed,
            admin,
            allowed,
        } => {
            let options = ChatOptions {
                operator,
                name,
                seed,
                admin,
                allowed,
            };
            run_chat(options, config_path).await?;
        }
        Commands::Check { field, value } => run_check(&field, &value, config_path)?,
        Commands::Config { command } => run_config(&command, config_path)?,
    }

    Ok(())
}
