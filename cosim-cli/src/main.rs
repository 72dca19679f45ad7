//! ## cosim-cli
//! **Command-line front end for a co-simulation endpoint**
//!
//! Loads the layered configuration, brings up one trunk link and runs the
//! local event loop against the peer simulator.

use clap::Parser;

mod commands;

use commands::{Cli, Commands};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => commands::run_echo(args),
        Commands::CheckConfig(args) => commands::check_config(args),
    }
}
