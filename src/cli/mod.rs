use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "memex-sync",
    about = "Stage, prune and schedule upkeep of the local Memex store"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    Status,
    /// Copy every collection into the upload queue in dependency order
    Stage,
    /// Delete unreferenced pages and cap visit history
    Wipe {
        #[arg(long)]
        visit_limit: Option<usize>,
        /// Only report whether any visit predates the configured cutoff
        #[arg(long, default_value_t = false)]
        check: bool,
    },
    Jobs,
    Service,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    Set { key: String, value: String },
    Get { key: String },
}
