mod commands;

use clap::Parser;
use cluster_tracking::cli::Cli;
use colored::*;
use std::process;
use tracing_subscriber::EnvFilter;

use commands::execute_command;

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let cli = Cli::parse();

    // Set up colored output
    if cli.no_color {
        colored::control::set_override(false);
    }

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    if let Err(e) = execute_command(cli.command).await {
        eprintln!("{} {:#}", "Error:".bright_red().bold(), e);
        process::exit(1);
    }
}
