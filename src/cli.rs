use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "chunkledger")]
#[command(about = "Chunk scheduling ledger", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to config/chunkledger.toml or $CHUNKLEDGER_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the operator HTTP API
    Serve(ServeArgs),
    /// Print row counts and ledger metadata as JSON
    Stats,
    /// Check stored rows against the ledger invariants
    Audit,
    /// Delete finished tasks past their retention window
    Prune(PruneArgs),
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Address to bind the HTTP server to (overrides server.bind_addr)
    #[arg(long)]
    pub address: Option<SocketAddr>,
}

#[derive(clap::Args, Debug)]
pub struct PruneArgs {
    /// Retention in days (overrides retention.task_ttl_days)
    #[arg(long)]
    pub ttl_days: Option<u32>,
}
