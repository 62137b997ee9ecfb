use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Application errors arrive embedded in otherwise well-formed bodies.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

fn embedded_error(text: &str) -> Option<String> {
    serde_json::from_str::<ErrorBody>(text)
        .ok()
        .and_then(|body| body.error)
        .filter(|error| !error.is_empty())
}

/// Thin client over the log viewer service. One instance per process;
/// it holds no session state, only the base URL and the reqwest pool.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            bail!("server URL is empty (set --server-url or LOGLENS_SERVER_URL)");
        }
        let http = reqwest::Client::builder()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, base_url })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn read_checked(&self, response: reqwest::Response) -> Result<String> {
        let status = response.status();
        let text = response.text().await.context("failed to read response")?;

        // A non-2xx status and an embedded `error` field are the same
        // failure as far as callers are concerned.
        if !status.is_success() {
            match embedded_error(&text) {
                Some(error) => bail!("server returned {status}: {error}"),
                None => bail!("server returned {status}"),
            }
        }
        if let Some(error) = embedded_error(&text) {
            bail!("{error}");
        }
        Ok(text)
    }

    /// GET a JSON body, rejecting non-2xx statuses and embedded `error`
    /// fields alike.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;
        let text = self.read_checked(response).await?;
        serde_json::from_str(&text).with_context(|| format!("unexpected response from {url}"))
    }

    /// GET a JSON body without inspecting the `error` field. Used for the
    /// status endpoint, where `error` is advisory and classified by the
    /// poller instead of the transport layer.
    pub async fn get_raw<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;
        let status = response.status();
        let text = response.text().await.context("failed to read response")?;
        if !status.is_success() {
            bail!("server returned {status}");
        }
        serde_json::from_str(&text).with_context(|| format!("unexpected response from {url}"))
    }

    /// POST a JSON body; same failure handling as [`ApiClient::get`].
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.url(path);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;
        let text = self.read_checked(response).await?;
        serde_json::from_str(&text).with_context(|| format!("unexpected response from {url}"))
    }

    /// GET a binary body (CSV export, plot image).
    pub async fn get_bytes(&self, path: &str) -> Result<Vec<u8>> {
        let url = self.url(path);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            match embedded_error(&text) {
                Some(error) => bail!("server returned {status}: {error}"),
                None => bail!("server returned {status}"),
            }
        }
        let bytes = response.bytes().await.context("failed to read response")?;
        Ok(bytes.to_vec())
    }
}
