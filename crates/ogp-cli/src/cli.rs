use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ogp", about = "Inspect and verify object-graph file storages", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Repeat for more log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// The storage was written in reversed byte order
    #[arg(long, global = true)]
    pub reversed: bool,

    /// Type dictionary (JSON) used to name types and find references;
    /// defaults to the dictionary inside the storage directory
    #[arg(long, global = true)]
    pub types: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// List the entities of a storage
    Inspect(InspectArgs),
    /// Check entity layouts and references
    Verify(StorageArgs),
    /// Summarize live content per type
    Stats(StorageArgs),
}

#[derive(Args)]
pub struct StorageArgs {
    /// Storage directory
    pub directory: PathBuf,
}

#[derive(Args)]
pub struct InspectArgs {
    /// Storage directory
    pub directory: PathBuf,
    /// Only show this object id
    #[arg(long)]
    pub oid: Option<u64>,
    /// Show at most this many entities
    #[arg(long)]
    pub limit: Option<usize>,
    /// Include superseded versions
    #[arg(long)]
    pub all: bool,
    /// Append the first content bytes in hex
    #[arg(long)]
    pub hex: bool,
}
