use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::args::BaseArgs;
use crate::config;

#[derive(Debug, Clone, Args)]
pub struct StatusArgs {}

#[derive(Serialize)]
struct StatusOutput {
    server_url: String,
    dataset: Option<String>,
    source: Option<String>,
}

pub async fn run(base: BaseArgs, _args: StatusArgs) -> Result<()> {
    let resolved = config::resolve(&base);

    if base.json {
        let output = StatusOutput {
            server_url: resolved.server_url,
            dataset: resolved.dataset,
            source: resolved.source,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("server: {}", resolved.server_url);
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
