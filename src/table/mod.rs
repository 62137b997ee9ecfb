use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use console::style;

use crate::args::BaseArgs;
use crate::config;
use crate::http::ApiClient;
use crate::session::{ClientSession, SortDirection, SortSpec};
use crate::timestamps::Timestamp;
use crate::ui::{header, print_command_status, styled_table, truncate, with_spinner, CommandStatus};

pub mod api;

use api::{MetadataRange, RangeProvider, ScanRange};

const MAX_CELL_WIDTH: usize = 96;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BoundsSource {
    /// Ask the metadata endpoint for the dataset bounds
    Metadata,
    /// Derive bounds by scanning the unfiltered table's timestamp column
    Scan,
}

/// Datetime window flags shared by every command that filters.
#[derive(Debug, Clone, Args)]
pub struct FilterArgs {
    /// Start of the datetime window (YYYY-MM-DD HH:MM:SS)
    #[arg(long, value_name = "DATETIME")]
    pub filter_start: Option<String>,

    /// End of the datetime window (YYYY-MM-DD HH:MM:SS)
    #[arg(long, value_name = "DATETIME")]
    pub filter_end: Option<String>,

    /// Where dataset bounds for filter validation come from
    #[arg(long, value_enum, default_value_t = BoundsSource::Metadata)]
    pub bounds: BoundsSource,
}

impl FilterArgs {
    pub fn requested(&self) -> bool {
        self.filter_start.is_some() || self.filter_end.is_some()
    }
}

/// Build the session a command will serialize into its requests: replay the
/// sort flags as clicks, then validate the filter window against the
/// dataset bounds before anything touches the table endpoints.
pub(crate) async fn session_for_query(
    client: &ApiClient,
    dataset: &str,
    sort_flags: &[String],
    filter: &FilterArgs,
) -> Result<ClientSession> {
    let mut session = ClientSession::new();

    if !sort_flags.is_empty() {
        let spec = SortSpec::parse(&sort_flags.join(","))?;
        session.apply_sort(&spec);
    }

    if filter.requested() {
        let range = with_spinner("Loading dataset bounds...", async {
            match filter.bounds {
                BoundsSource::Metadata => MetadataRange { client }.fetch_range(dataset).await,
                BoundsSource::Scan => {
                    ScanRange {
                        client,
                        timestamp_column: api::TIMESTAMP_COLUMN,
                    }
                    .fetch_range(dataset)
                    .await
                }
            }
        })
        .await?;
        session.set_range(range);

        let start = args_timestamp(filter.filter_start.as_deref())?;
        let end = args_timestamp(filter.filter_end.as_deref())?;
        session.apply_filter(start, end)?;
    }

    Ok(session)
}

fn args_timestamp(value: Option<&str>) -> Result<Option<Timestamp>> {
    value.map(Timestamp::parse).transpose()
}

#[derive(Debug, Clone, Args)]
pub struct ViewArgs {
    /// Dataset id (falls back to --dataset, then config)
    #[arg(value_name = "DATASET")]
    dataset_positional: Option<String>,

    /// Sort entries like '+2' or '-0,+2'; earlier entries rank higher
    #[arg(long = "sort", value_name = "SPEC", allow_hyphen_values = true)]
    sort: Vec<String>,

    #[command(flatten)]
    filter: FilterArgs,
}

pub async fn view(base: BaseArgs, args: ViewArgs) -> Result<()> {
    let dataset = config::resolve_dataset(&base, args.dataset_positional.clone())?;
    let client = ApiClient::new(&config::resolve(&base).server_url)?;
    let session = session_for_query(&client, &dataset, &args.sort, &args.filter).await?;

    let table = with_spinner(
        "Loading table...",
        api::fetch_table(&client, &session, &dataset),
    )
    .await
    .context("error loading data")?;

    if base.json {
        println!("{}", serde_json::to_string(&table)?);
        return Ok(());
    }

    render_table(&session, &table, &dataset);
    Ok(())
}

/// Print the table with ▲/▼ markers on actively sorted columns, driven by
/// the same membership test the sort encoding round-trips through.
fn render_table(session: &ClientSession, table: &api::TableResponse, dataset: &str) {
    let filtered = if table.filtered { " (filtered)" } else { "" };
    println!(
        "{} rows from {}{filtered}\n",
        style(table.data.len()),
        style(dataset).bold()
    );

    let mut out = styled_table();
    out.set_header(
        table
            .header
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let marker = if session.sort().is_active(SortDirection::Ascending, idx) {
                    " ▲"
                } else if session.sort().is_active(SortDirection::Descending, idx) {
                    " ▼"
                } else {
                    ""
                };
                header(&format!("{name}{marker}"))
            })
            .collect::<Vec<_>>(),
    );

    for row in &table.data {
        out.add_row(row.iter().map(|cell| truncate(cell, MAX_CELL_WIDTH)));
    }

    println!("{out}");
}

#[derive(Debug, Clone, Args)]
pub struct DownloadArgs {
    /// Dataset id (falls back to --dataset, then config)
    #[arg(value_name = "DATASET")]
    dataset_positional: Option<String>,

    /// Sort entries like '+2' or '-0,+2'; earlier entries rank higher
    #[arg(long = "sort", value_name = "SPEC", allow_hyphen_values = true)]
    sort: Vec<String>,

    #[command(flatten)]
    filter: FilterArgs,

    /// Output file (defaults to the dataset's original upload name)
    #[arg(short = 'o', long, value_name = "FILE")]
    output: Option<PathBuf>,
}

pub async fn download(base: BaseArgs, args: DownloadArgs) -> Result<()> {
    let dataset = config::resolve_dataset(&base, args.dataset_positional.clone())?;
    let client = ApiClient::new(&config::resolve(&base).server_url)?;
    let session = session_for_query(&client, &dataset, &args.sort, &args.filter).await?;

    let output = match args.output {
        Some(path) => path,
        None => PathBuf::from(suggested_csv_name(
            api::fetch_metadata(&client, &dataset)
                .await
                .ok()
                .and_then(|md| md.original_name)
                .as_deref(),
            &dataset,
        )),
    };

    let bytes = with_spinner(
        "Downloading CSV...",
        api::download_csv(&client, &session, &dataset),
    )
    .await?;
    fs::write(&output, &bytes).with_context(|| format!("failed to write {}", output.display()))?;

    print_command_status(
        CommandStatus::Success,
        &format!("wrote {} bytes to {}", bytes.len(), output.display()),
    );
    Ok(())
}

/// Download name suggestion: the original upload name with its extension
/// swapped for `.csv`, falling back to the dataset id.
fn suggested_csv_name(original_name: Option<&str>, dataset: &str) -> String {
    let stem = match original_name {
        Some(name) if !name.is_empty() => name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(name)
            .to_string(),
        _ => dataset.to_string(),
    };
    format!("{stem}.csv")
}

#[derive(Debug, Clone, Args)]
pub struct MetadataArgs {
    /// Dataset id (falls back to --dataset, then config)
    #[arg(value_name = "DATASET")]
    dataset_positional: Option<String>,
}

pub async fn metadata(base: BaseArgs, args: MetadataArgs) -> Result<()> {
    let dataset = config::resolve_dataset(&base, args.dataset_positional.clone())?;
    let client = ApiClient::new(&config::resolve(&base).server_url)?;

    let md = with_spinner(
        "Loading metadata...",
        api::fetch_metadata(&client, &dataset),
    )
    .await
    .context("error loading metadata")?;
    let range = md.range()?;

    if base.json {
        let output = serde_json::json!({
            "dataset": dataset,
            "start": range.min,
            "end": range.max,
            "original_name": md.original_name,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("dataset: {}", style(&dataset).bold());
        println!(
            "range: {} .. {}",
            range.min.as_ref().map(Timestamp::as_str).unwrap_or(""),
            range.max.as_ref().map(Timestamp::as_str).unwrap_or("")
        );
        println!(
            "original name: {}",
            md.original_name.as_deref().unwrap_or("(unknown)")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suggested_name_swaps_the_extension() {
        assert_eq!(
            suggested_csv_name(Some("cluster-node7.log"), "HDFS_2k"),
            "cluster-node7.csv"
        );
        assert_eq!(suggested_csv_name(Some("noext"), "HDFS_2k"), "noext.csv");
        assert_eq!(suggested_csv_name(None, "HDFS_2k"), "HDFS_2k.csv");
        assert_eq!(suggested_csv_name(Some(""), "HDFS_2k"), "HDFS_2k.csv");
    }
}
