use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand, ValueEnum};
use tokio::sync::oneshot;

use crate::args::BaseArgs;
use crate::config;
use crate::http::ApiClient;
use crate::poll::{classify, PlotJobRunner, PollOutcome, PollPolicy, PollSignal};
use crate::table::{session_for_query, FilterArgs};
use crate::ui::{
    header, print_command_status, start_spinner, styled_table, with_spinner, CommandStatus,
};

pub mod api;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PlotType {
    EventsOverTime,
    LevelDistribution,
    EventCodeDistribution,
    Custom,
}

impl PlotType {
    /// Wire tag the server knows the plot type by.
    pub fn tag(self) -> &'static str {
        match self {
            PlotType::EventsOverTime => "events_over_time",
            PlotType::LevelDistribution => "level_distribution",
            PlotType::EventCodeDistribution => "event_code_distribution",
            PlotType::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct PlotsArgs {
    #[command(subcommand)]
    command: PlotsCommands,
}

#[derive(Debug, Clone, Subcommand)]
enum PlotsCommands {
    /// Submit a plot job and poll until the artifacts are ready
    Generate(GenerateArgs),
    /// Read the shared job status endpoint once
    Status,
}

#[derive(Debug, Clone, Args)]
struct GenerateArgs {
    /// Dataset id (falls back to --dataset, then config)
    #[arg(value_name = "DATASET")]
    dataset_positional: Option<String>,

    /// Plot types to render (repeatable)
    #[arg(long = "type", value_enum, required = true, value_name = "TYPE")]
    types: Vec<PlotType>,

    /// File with the code for the custom plot type
    #[arg(long, value_name = "FILE")]
    custom_code: Option<PathBuf>,

    #[command(flatten)]
    filter: FilterArgs,

    /// Directory to save rendered plots into
    #[arg(long, default_value = ".", value_name = "DIR")]
    out: PathBuf,

    /// Fetch artifacts through the forced-download endpoint
    #[arg(long)]
    attachment: bool,

    /// Open the first saved plot when done
    #[arg(long)]
    open: bool,

    /// Milliseconds between status polls
    #[arg(long, default_value_t = 500, value_name = "MS")]
    poll_interval_ms: u64,

    /// Number of polls before the job is declared timed out
    #[arg(long, default_value_t = 60, value_name = "N")]
    max_attempts: u32,
}

pub async fn run(base: BaseArgs, args: PlotsArgs) -> Result<()> {
    match args.command {
        PlotsCommands::Generate(generate_args) => generate(base, generate_args).await,
        PlotsCommands::Status => status(base).await,
    }
}

async fn generate(base: BaseArgs, args: GenerateArgs) -> Result<()> {
    let dataset = config::resolve_dataset(&base, args.dataset_positional.clone())?;
    let client = ApiClient::new(&config::resolve(&base).server_url)?;

    // Sort never travels with plot jobs; only the filter window does.
    let session = session_for_query(&client, &dataset, &[], &args.filter).await?;

    let mut plot_options: Vec<String> = Vec::new();
    for plot_type in &args.types {
        let tag = plot_type.tag().to_string();
        if !plot_options.contains(&tag) {
            plot_options.push(tag);
        }
    }

    let custom_selected = args.types.contains(&PlotType::Custom);
    let custom_code = match (&args.custom_code, custom_selected) {
        (Some(path), true) => {
            let code = fs::read_to_string(path)
                .with_context(|| format!("failed to read custom code from {}", path.display()))?;
            if code.chars().count() > api::MAX_CUSTOM_CODE_CHARS {
                bail!(
                    "custom code too long (must be less than {} characters)",
                    api::MAX_CUSTOM_CODE_CHARS
                );
            }
            Some(code)
        }
        (None, true) => bail!("the custom plot type needs --custom-code <FILE>"),
        (Some(_), false) => {
            print_command_status(
                CommandStatus::Warning,
                "ignoring --custom-code: the custom plot type is not selected",
            );
            None
        }
        (None, false) => None,
    };

    let request = api::PlotRequest::new(&dataset, plot_options, &session, custom_code);
    with_spinner("Submitting plot job...", api::submit_job(&client, &request))
        .await
        .context("plot job submission failed")?;

    let policy = PollPolicy {
        interval: Duration::from_millis(args.poll_interval_ms),
        max_attempts: args.max_attempts,
    };

    let spinner = start_spinner("Generating plots...");
    let mut runner = PlotJobRunner::new();
    let (terminal_tx, terminal_rx) = oneshot::channel();
    let poll_client = client.clone();
    let notice_spinner = spinner.clone();
    runner.submit(
        move || {
            let client = poll_client.clone();
            async move { api::fetch_status(&client).await }
        },
        policy,
        move |message| {
            notice_spinner.suspend(|| print_command_status(CommandStatus::Warning, message));
        },
        move |outcome| {
            let _ = terminal_tx.send(outcome);
        },
    );
    let outcome = terminal_rx.await;
    spinner.finish_and_clear();

    match outcome.context("poll loop ended without an outcome")? {
        PollOutcome::Done(files) if files.is_empty() => {
            print_command_status(
                CommandStatus::Warning,
                "job finished but reported no plot files",
            );
            Ok(())
        }
        PollOutcome::Done(files) => {
            save_artifacts(&base, &client, &files, &args.out, args.attachment, args.open).await
        }
        PollOutcome::Failed(message) => bail!("plot generation failed: {message}"),
        PollOutcome::TimedOut { attempts } => bail!(
            "timed out waiting for plots after {attempts} polls (~{}s); the job may still be running server-side",
            (attempts as u64 * args.poll_interval_ms) / 1000
        ),
    }
}

async fn save_artifacts(
    base: &BaseArgs,
    client: &ApiClient,
    files: &BTreeMap<String, String>,
    out: &PathBuf,
    attachment: bool,
    open_after: bool,
) -> Result<()> {
    fs::create_dir_all(out).with_context(|| format!("failed to create {}", out.display()))?;

    let mut saved: BTreeMap<String, PathBuf> = BTreeMap::new();
    for (tag, file) in files {
        let token = api::cache_bust_token();
        let bytes = client
            .get_bytes(&api::plot_path(file, token, attachment))
            .await
            .with_context(|| format!("failed to fetch the '{tag}' plot"))?;
        let path = out.join(file);
        fs::write(&path, &bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
        saved.insert(tag.clone(), path);
    }

    if base.json {
        println!("{}", serde_json::to_string_pretty(&saved)?);
    } else {
        print_command_status(
            CommandStatus::Success,
            &format!("saved {} plot(s) to {}", saved.len(), out.display()),
        );
        let mut table = styled_table();
        table.set_header(vec![header("Plot"), header("File")]);
        for (tag, path) in &saved {
            table.add_row(vec![tag.clone(), path.display().to_string()]);
        }
        println!("{table}");
    }

    if open_after {
        if let Some(path) = saved.values().next() {
            open::that(path).with_context(|| format!("failed to open {}", path.display()))?;
        }
    }
    Ok(())
}

async fn status(base: BaseArgs) -> Result<()> {
    let client = ApiClient::new(&config::resolve(&base).server_url)?;
    let job_status = with_spinner("Reading job status...", api::fetch_status(&client)).await?;

    if base.json {
        println!("{}", serde_json::to_string_pretty(&job_status)?);
        return Ok(());
    }

    match classify(&job_status) {
        PollSignal::Done(files) => {
            print_command_status(CommandStatus::Success, "plot generation done");
            for (tag, file) in files {
                println!("{tag}: {file}");
            }
        }
        PollSignal::Fatal(message) => {
            print_command_status(
                CommandStatus::Error,
                &format!("plot generation failed: {message}"),
            );
        }
        PollSignal::Notice(message) => {
            print_command_status(
                CommandStatus::Warning,
                &format!("job running ({}); server reports: {message}", job_status.status),
            );
        }
        PollSignal::Continue => {
            println!("job status: {}", job_status.status);
        }
    }
    Ok(())
}
