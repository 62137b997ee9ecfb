use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::http::ApiClient;
use crate::session::ClientSession;
use crate::timestamps::{derive_range_from_rows, FilterRange, Timestamp};

/// Column holding row timestamps in parsed log tables
/// (`LineId, Time, Level, Content, EventId`).
pub const TIMESTAMP_COLUMN: usize = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableResponse {
    pub header: Vec<String>,
    pub data: Vec<Vec<String>>,
    #[serde(default)]
    pub filtered: bool,
}

pub async fn fetch_table(
    client: &ApiClient,
    session: &ClientSession,
    dataset: &str,
) -> Result<TableResponse> {
    client.get(&session.table_path(dataset, false)).await
}

pub async fn download_csv(
    client: &ApiClient,
    session: &ClientSession,
    dataset: &str,
) -> Result<Vec<u8>> {
    client.get_bytes(&session.table_path(dataset, true)).await
}

/// Body of `/get_metadata/{id}`. Timestamps arrive in the row source
/// format, not canonical form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub start_timestamp: String,
    pub end_timestamp: String,
    #[serde(default)]
    pub original_name: Option<String>,
}

impl DatasetMetadata {
    pub fn range(&self) -> Result<FilterRange> {
        let min = Timestamp::from_source(&self.start_timestamp)
            .context("bad start_timestamp in metadata")?;
        let max = Timestamp::from_source(&self.end_timestamp)
            .context("bad end_timestamp in metadata")?;
        Ok(FilterRange::new(min, max))
    }
}

pub async fn fetch_metadata(client: &ApiClient, dataset: &str) -> Result<DatasetMetadata> {
    client.get(&ClientSession::metadata_path(dataset)).await
}

/// Where the bounds of the currently selected dataset come from. Two
/// interchangeable implementations; callers only depend on this seam.
#[allow(async_fn_in_trait)]
pub trait RangeProvider {
    async fn fetch_range(&self, dataset: &str) -> Result<FilterRange>;
}

/// Bounds from the metadata endpoint.
pub struct MetadataRange<'a> {
    pub client: &'a ApiClient,
}

impl RangeProvider for MetadataRange<'_> {
    async fn fetch_range(&self, dataset: &str) -> Result<FilterRange> {
        fetch_metadata(self.client, dataset).await?.range()
    }
}

/// Bounds by scanning the timestamp column of the full table. Always
/// requests the unfiltered view through a fresh session, whatever the
/// caller's current sort and filter state.
pub struct ScanRange<'a> {
    pub client: &'a ApiClient,
    pub timestamp_column: usize,
}

impl RangeProvider for ScanRange<'_> {
    async fn fetch_range(&self, dataset: &str) -> Result<FilterRange> {
        let table = fetch_table(self.client, &ClientSession::new(), dataset).await?;
        derive_range_from_rows(&table.data, self.timestamp_column)
    }
}
