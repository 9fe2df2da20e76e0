//! HTTP Fallback Client
//!
//! reqwest implementation of [`FallbackFetcher`] plus the symbol catalog
//! request served by the same backend.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::application::ports::FallbackFetcher;
use crate::domain::connection::FeedError;
use crate::infrastructure::config::HttpSettings;

const APPLICATION_JSON: HeaderValue = HeaderValue::from_static("application/json");

/// HTTP client errors outside the fallback path.
#[derive(Debug, thiserror::Error)]
pub enum HttpClientError {
    /// Client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Build(String),
    /// Request failed before a response arrived.
    #[error("request failed: {0}")]
    Network(String),
    /// Server answered with a non-success status.
    #[error("HTTP error: {status}")]
    Http {
        /// Response status code.
        status: u16,
    },
    /// Body did not match the expected schema.
    #[error("malformed response: {0}")]
    Parse(String),
}

/// One entry of the symbol catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolInfo {
    /// Base symbol (e.g. `BTC`).
    pub symbol: String,
    /// Exchange stream name (e.g. `btcusdt@trade`).
    #[serde(default)]
    pub stream: String,
    /// Display label.
    #[serde(default)]
    pub label: String,
}

/// Symbols the backend can stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolCatalog {
    /// Catalog entries in server order.
    pub symbols: Vec<SymbolInfo>,
}

impl SymbolCatalog {
    /// Check if `symbol` is listed, ignoring case.
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols
            .iter()
            .any(|info| info.symbol.eq_ignore_ascii_case(symbol))
    }
}

/// reqwest-backed fallback fetcher.
#[derive(Debug, Clone)]
pub struct HttpFallbackClient {
    client: Client,
}

impl HttpFallbackClient {
    /// Create a client with the configured request timeout.
    pub fn new(settings: HttpSettings) -> Result<Self, HttpClientError> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| HttpClientError::Build(e.to_string()))?;

        Ok(Self { client })
    }

    /// Fetch the symbol catalog from `url` (see `FeedEndpoints::symbols_url`).
    pub async fn fetch_symbols(&self, url: &Url) -> Result<SymbolCatalog, HttpClientError> {
        self.get_json(url).await
    }

    /// GET `url` with `Accept: application/json` and decode a success body.
    async fn get_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T, HttpClientError> {
        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, APPLICATION_JSON)
            .send()
            .await
            .map_err(|e| HttpClientError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(%url, status = status.as_u16(), "Request rejected");
            return Err(HttpClientError::Http {
                status: status.as_u16(),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| HttpClientError::Network(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| HttpClientError::Parse(e.to_string()))
    }
}

impl From<HttpClientError> for FeedError {
    fn from(error: HttpClientError) -> Self {
        match error {
            HttpClientError::Http { status } => Self::Http { status },
            HttpClientError::Parse(message) => Self::Parse(message),
            HttpClientError::Build(message) | HttpClientError::Network(message) => {
                Self::Network(message)
            }
        }
    }
}

#[async_trait]
impl FallbackFetcher for HttpFallbackClient {
    async fn fetch(&self, url: &Url) -> Result<Value, FeedError> {
        tracing::debug!(%url, "Sending fallback request");
        Ok(self.get_json(url).await?)
    }
}
