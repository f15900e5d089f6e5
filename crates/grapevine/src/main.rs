// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Grapevine — a multi-tenant Telegram content-intelligence platform.
//!
//! Binary entry point: configuration loading, validation and the `serve`
//! command that runs the whole platform.

use clap::{Parser, Subcommand};

mod delivery;
mod serve;
mod transport;

/// Grapevine — ingestion, enrichment and retrieval over Telegram channels.
#[derive(Parser, Debug)]
#[command(name = "grapevine", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the platform: session fabric, scheduler and HTTP gateway.
    Serve,
    /// Validate the configuration and exit.
    Check,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match grapevine_config::load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("grapevine: configuration error: {e}");
            std::process::exit(1);
        }
    };
    if let Err(errors) = grapevine_config::validate(&config) {
        for error in &errors {
            eprintln!("grapevine: {error}");
        }
        std::process::exit(1);
    }

    match cli.command {
        Some(Commands::Serve) => {
            if let Err(e) = serve::run_serve(config).await {
                eprintln!("grapevine: {e}");
                std::process::exit(1);
            }
        }
        Some(Commands::Check) => {
            println!("grapevine: configuration OK");
        }
        None => {
            println!("grapevine: use --help for available commands");
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        super::Cli::command().debug_assert();
    }
}
