use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct Cli {
    /// Location of config file: Default: undexer.toml
    #[arg(short, long, default_value = "undexer.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub subcommand: Subcommand,
}

#[derive(clap::Subcommand, Debug, Clone)]
pub enum Subcommand {
    /// Output example config file.
    Init,

    /// Continuously index blocks, epochs, validators and proposals.
    Index,

    /// Start the HTTP API server.
    Server,

    /// Re-ingest a range of blocks. Each block is retried until it succeeds before moving to the next.
    Reindex { from: u64, to: Option<u64> },

    /// Delete indexed blocks and transactions from the given height, so the indexer fetches them again.
    Rescan { blockheight: u64 },

    /// Replace the stored validator set with the chain's current one. This discards key history.
    ResetValidators,

    /// Print the number of indexed rows per table.
    Status,

    /// Prints the current version of application
    Version,
}
