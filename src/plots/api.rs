use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use serde::Serialize;
use urlencoding::encode;

use crate::http::ApiClient;
use crate::poll::JobStatus;
use crate::session::ClientSession;

pub const GENERATE_ENDPOINT: &str = "/generate_plots/";
pub const STATUS_ENDPOINT: &str = "/status";

/// Server-enforced ceiling on custom plot code; checked before submitting
/// so oversized code never leaves the client.
pub const MAX_CUSTOM_CODE_CHARS: usize = 10_000;

/// Body of a plot job submission. The filter window travels as the same
/// `"<start>,<end>"` string the table endpoints take, for uniformity on
/// the server side.
#[derive(Debug, Clone, Serialize)]
pub struct PlotRequest {
    pub log_id: String,
    pub plot_options: Vec<String>,
    pub filter_options: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_code: Option<String>,
}

impl PlotRequest {
    /// `custom_code` is carried only when the custom plot type is among the
    /// requested options; otherwise it is absent from the payload entirely.
    pub fn new(
        dataset: &str,
        plot_options: Vec<String>,
        session: &ClientSession,
        custom_code: Option<String>,
    ) -> Self {
        let custom_code = if plot_options.iter().any(|tag| tag == "custom") {
            custom_code
        } else {
            None
        };
        Self {
            log_id: dataset.to_string(),
            plot_options,
            filter_options: session.filter_param(),
            custom_code,
        }
    }
}

/// Submit the job. The ack body carries nothing the client needs; non-2xx
/// statuses and embedded `error` fields already fail inside the client, so
/// a failed submission never reaches the polling loop.
pub async fn submit_job(client: &ApiClient, request: &PlotRequest) -> Result<()> {
    let _ack: serde_json::Value = client.post(GENERATE_ENDPOINT, request).await?;
    Ok(())
}

pub async fn fetch_status(client: &ApiClient) -> Result<JobStatus> {
    client.get_raw(STATUS_ENDPOINT).await
}

/// Artifact path, display or forced-download variant. `token` busts any
/// cache between client and server so a re-rendered file with the same
/// identifier is never served stale.
pub fn plot_path(file: &str, token: u64, for_download: bool) -> String {
    let endpoint = if for_download {
        "/download_plot/"
    } else {
        "/get_plot/"
    };
    format!("{endpoint}{}?ts={token}", encode(file))
}

pub fn cache_bust_token() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
