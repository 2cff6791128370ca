use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Cluster tracking - server membership, numbering and unique ids
#[derive(Parser)]
#[command(name = "cluster-tracking")]
#[command(version)]
#[command(about = "Cluster membership, server numbering and unique id generation")]
#[command(long_about = "
Registers servers in a replicated registry, settles a unique server number
for each, and issues cluster-wide unique ids from it.

Usage examples:
  cluster-tracking node --ids 5 --once    # Register, print 5 ids, deregister
  cluster-tracking simulate --nodes 4     # Settle numbers for 4 racing servers
  cluster-tracking decode AH2MKNwAAAI     # Show server number and time of an id
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run a single server against an in-process registry
    Node {
        /// Configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of unique ids to print once registered
        #[arg(long, default_value = "0")]
        ids: usize,

        /// Deregister right away instead of waiting for Ctrl-C
        #[arg(long)]
        once: bool,
    },

    /// Register several servers concurrently and show the settled numbers
    Simulate {
        /// Number of servers
        #[arg(short, long, default_value = "3")]
        nodes: usize,

        /// Configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Decode a unique id
    Decode {
        /// Id as printed by `node --ids`
        #[arg(value_name = "ID")]
        id: String,
    },
}
