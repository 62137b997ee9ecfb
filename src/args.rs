use std::path::PathBuf;

use clap::Args;

#[derive(Debug, Clone, Args)]
pub struct BaseArgs {
    /// Output as JSON
    #[arg(short = 'j', long, global = true)]
    pub json: bool,

    /// Override the log viewer server URL (or via LOGLENS_SERVER_URL)
    #[arg(long, env = "LOGLENS_SERVER_URL", hide_env_values = true, global = true)]
    pub server_url: Option<String>,

    /// Override the active dataset (or via LOGLENS_DATASET)
    #[arg(short = 'd', long, env = "LOGLENS_DATASET", global = true)]
    pub dataset: Option<String>,

    /// Path to a .env file to load before running commands.
    #[arg(long, env = "LOGLENS_ENV_FILE", hide_env_values = true)]
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct CLIArgs<T: Args> {
    #[command(flatten)]
    pub base: BaseArgs,

    #[command(flatten)]
    pub args: T,
}
