use std::{
    fs, io,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Result};
use clap::{Args, Subcommand};
use serde::{Deserialize, Serialize};

use crate::args::BaseArgs;
use crate::ui::{print_command_status, CommandStatus};

/// The Flask development default; overridable at every layer above it.
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:5000";

#[derive(Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server_url: Option<String>,
    pub dataset: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

pub fn global_path() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not determine home directory"))?;
    Ok(home.join(".loglens").join("config.json"))
}

pub fn local_path() -> PathBuf {
    PathBuf::from(".loglens.json")
}

pub fn load_file(path: &Path) -> Config {
    let file_contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Config::default(),
        Err(e) => {
            print_command_status(
                CommandStatus::Warning,
                &format!("could not read {}: {e}", path.display()),
            );
            return Config::default();
        }
    };

    let config: Config = match serde_json::from_str(&file_contents) {
        Ok(c) => c,
        Err(e) => {
            print_command_status(
                CommandStatus::Warning,
                &format!("could not read {}: {e}", path.display()),
            );
            return Config::default();
        }
    };

    for key in config.extra.keys() {
        print_command_status(
            CommandStatus::Warning,
            &format!("unknown config key {} in {}", key, path.display()),
        );
    }

    config
}

pub fn load_global() -> Result<Config> {
    Ok(load_file(&global_path()?))
}

pub fn save_file(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)?;

    Ok(())
}

/// Effective settings after layering. Priority: CLI flags (and their env
/// vars) > local config > global config > built-in default.
pub struct Resolved {
    pub server_url: String,
    pub dataset: Option<String>,
    pub source: Option<String>,
}

pub fn resolve(base: &BaseArgs) -> Resolved {
    let global_cfg = load_global().unwrap_or_default();
    let local = local_path();
    let local_cfg = load_file(&local);

    let server_url = base
        .server_url
        .clone()
        .or_else(|| local_cfg.server_url.clone())
        .or_else(|| global_cfg.server_url.clone())
        .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());

    let dataset = base
        .dataset
        .clone()
        .or_else(|| local_cfg.dataset.clone())
        .or_else(|| global_cfg.dataset.clone());

    let source = if base.server_url.is_some() || base.dataset.is_some() {
        Some("cli".to_string())
    } else if local_cfg.server_url.is_some() || local_cfg.dataset.is_some() {
        Some(local.display().to_string())
    } else if global_cfg.server_url.is_some() || global_cfg.dataset.is_some() {
        global_path().ok().map(|p| p.display().to_string())
    } else {
        None
    };

    Resolved {
        server_url,
        dataset,
        source,
    }
}

/// The dataset a command should act on: positional argument first, then the
/// layered configuration.
pub fn resolve_dataset(base: &BaseArgs, positional: Option<String>) -> Result<String> {
    if let Some(dataset) = positional {
        return Ok(dataset);
    }
    resolve(base).dataset.ok_or_else(|| {
        anyhow!("no dataset selected (pass DATASET, use --dataset, or `loglens config set dataset <id>`)")
    })
}

#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommands {
    /// Print one effective configuration value
    Get { key: String },
    /// Set a configuration value
    Set {
        key: String,
        value: String,

        /// Write to ./.loglens.json instead of the global config
        #[arg(long)]
        local: bool,
    },
    /// List effective configuration values and where they come from
    List,
}

pub async fn run(base: BaseArgs, args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommands::Get { key } => {
            let resolved = resolve(&base);
            let value = match key.as_str() {
                "server_url" => Some(resolved.server_url),
                "dataset" => resolved.dataset,
                _ => bail!("unknown config key '{key}' (expected server_url or dataset)"),
            };
            println!("{}", value.as_deref().unwrap_or("(not set)"));
            Ok(())
        }
        ConfigCommands::Set { key, value, local } => {
            let path = if local { local_path() } else { global_path()? };
            let mut config = load_file(&path);
            match key.as_str() {
                "server_url" => config.server_url = Some(value),
                "dataset" => config.dataset = Some(value),
                _ => bail!("unknown config key '{key}' (expected server_url or dataset)"),
            }
            save_file(&path, &config)?;
            print_command_status(
                CommandStatus::Success,
                &format!("updated {key} in {}", path.display()),
            );
            Ok(())
        }
        ConfigCommands::List => {
            let resolved = resolve(&base);
            if base.json {
                let output = serde_json::json!({
                    "server_url": resolved.server_url,
                    "dataset": resolved.dataset,
                    "source": resolved.source,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("server_url: {}", resolved.server_url);
                println!(
                    "dataset: {}",
                    resolved.dataset.as_deref().unwrap_or("(not set)")
                );
                if let Some(source) = resolved.source {
                    println!("source: {source}");
                }
            }
            Ok(())
        }
    }
}
