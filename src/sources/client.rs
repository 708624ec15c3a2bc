// HTTP transport — the client factory every acquisition backend draws from.
//
// Two clients are built once at startup: a direct one, and one routed
// through the configured outbound proxy for scraping-sensitive backends.
// `get_json` is the single GET helper; it classifies upstream status codes
// into the FetchError taxonomy so callers never inspect raw responses.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::FetchError;

const USER_AGENT: &str = concat!("skybridge/", env!("CARGO_PKG_VERSION"));

/// Request timeout for every upstream call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Builds and hands out configured HTTP clients.
#[derive(Clone)]
pub struct HttpClients {
    direct: reqwest::Client,
    proxied: reqwest::Client,
}

impl HttpClients {
    /// Build the client pair. Without an outbound proxy the "proxied"
    /// client is just another direct client.
    pub fn new(outbound_proxy: Option<&str>) -> Result<Self> {
        let direct = base_builder()
            .build()
            .context("Failed to build HTTP client")?;

        let proxied = match outbound_proxy {
            Some(url) => base_builder()
                .proxy(
                    reqwest::Proxy::all(url)
                        .with_context(|| format!("Invalid outbound proxy URL: {url}"))?,
                )
                .build()
                .context("Failed to build proxied HTTP client")?,
            None => direct.clone(),
        };

        Ok(Self { direct, proxied })
    }

    pub fn direct(&self) -> &reqwest::Client {
        &self.direct
    }

    pub fn proxied(&self) -> &reqwest::Client {
        &self.proxied
    }
}

fn base_builder() -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
}

/// GET `url` and deserialize the JSON body.
///
/// `backend` names the caller in error messages; `key` is the handle or id
/// being fetched, carried into NotFound/Suspended.
pub async fn get_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    backend: &str,
    key: &str,
) -> Result<T, FetchError> {
    let response = request.send().await?;
    let status = response.status();

    debug!(backend, key, status = status.as_u16(), "upstream response");

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(status, &body, backend, key));
    }

    response
        .json::<T>()
        .await
        .with_context(|| format!("Failed to deserialize {backend} response for {key}"))
        .map_err(FetchError::from)
}

/// Map a non-success status to the error taxonomy.
pub fn classify_status(status: StatusCode, body: &str, backend: &str, key: &str) -> FetchError {
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => FetchError::NotFound(key.to_string()),
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited(backend.to_string()),
        StatusCode::FORBIDDEN if body.to_lowercase().contains("suspend") => {
            FetchError::Suspended(key.to_string())
        }
        s if s.is_server_error() => FetchError::Transient(format!("{backend} returned {s}")),
        s => FetchError::Other(std::sync::Arc::new(anyhow::anyhow!(
            "{backend} returned {s} for {key}: {}",
            truncate(body, 200)
        ))),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
