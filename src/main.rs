use anyhow::Result;
use clap::{Parser, Subcommand};
use std::ffi::OsString;

mod args;
mod config;
mod env;
mod http;
mod plots;
mod poll;
mod session;
mod status;
mod table;
mod timestamps;
mod ui;

use crate::args::CLIArgs;

const DEFAULT_CANARY_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-canary.dev");
const CLI_VERSION: &str = match option_env!("LOGLENS_VERSION_STRING") {
    Some(version) => version,
    None => DEFAULT_CANARY_VERSION,
};

#[derive(Debug, Parser)]
#[command(name = "loglens", about = "Log viewer client", version = CLI_VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch a dataset and render it as a sorted, filtered table
    View(CLIArgs<table::ViewArgs>),
    /// Download a dataset as CSV with sort and filter applied
    Download(CLIArgs<table::DownloadArgs>),
    /// Show a dataset's datetime bounds and original filename
    Metadata(CLIArgs<table::MetadataArgs>),
    /// Generate and retrieve server-rendered plots
    Plots(CLIArgs<plots::PlotsArgs>),
    /// Show the effective server and dataset selection
    Status(CLIArgs<status::StatusArgs>),
    /// Manage persistent configuration
    Config(CLIArgs<config::ConfigArgs>),
}

#[tokio::main]
async fn main() -> Result<()> {
    let argv: Vec<OsString> = std::env::args_os().collect();
    env::bootstrap_from_args(&argv)?;
    let cli = Cli::parse_from(argv);

    match cli.command {
        Commands::View(cmd) => table::view(cmd.base, cmd.args).await?,
        Commands::Download(cmd) => table::download(cmd.base, cmd.args).await?,
        Commands::Metadata(cmd) => table::metadata(cmd.base, cmd.args).await?,
        Commands::Plots(cmd) => plots::run(cmd.base, cmd.args).await?,
        Commands::Status(cmd) => status::run(cmd.base, cmd.args).await?,
        Commands::Config(cmd) => config::run(cmd.base, cmd.args).await?,
    }

    Ok(())
}
