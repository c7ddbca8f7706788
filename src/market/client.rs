//! NSE India API client
//!
//! Issues GET requests against the public JSON endpoints and maps transport
//! and HTTP failures onto [`FetchErrorKind`] so the retrier knows which ones
//! are worth repeating.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{FetchError, FetchErrorKind};

/// Base URL for the NSE India API
pub const NSE_BASE_URL: &str = "https://www.nseindia.com/api";

/// The API rejects requests that do not look like they come from a browser
const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; rv:109.0) Gecko/20100101 Firefox/118.0";

/// Client for the NSE India JSON API
#[derive(Debug, Clone)]
pub struct MarketClient {
    client: Client,
    base_url: String,
}

impl MarketClient {
    /// Create a client with browser-like headers and the configured timeout
    pub fn new(config: &ClientConfig) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self::with_client(client, config.base_url.clone()))
    }

    /// Create a client around an existing HTTP client
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the equity quote for a symbol
    pub async fn fetch_quote(&self, symbol: &str) -> Result<Value, FetchError> {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(FetchError::new(FetchErrorKind::InvalidRequest, "empty symbol"));
        }
        self.get_json("quote-equity", &[("symbol", symbol.as_str())]).await
    }

    /// Fetch every constituent of an index, e.g. `NIFTY 50`
    pub async fn fetch_index(&self, index: &str) -> Result<Value, FetchError> {
        let index = index.trim().to_uppercase();
        if index.is_empty() {
            return Err(FetchError::new(FetchErrorKind::InvalidRequest, "empty index name"));
        }
        self.get_json("equity-stockIndices", &[("index", index.as_str())]).await
    }

    /// Fetch the open/closed status of every market segment
    pub async fn fetch_market_status(&self) -> Result<Value, FetchError> {
        self.get_json("marketStatus", &[]).await
    }

    async fn get_json(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<Value, FetchError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!(url = %url, ?query, "requesting");

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if let Some(kind) = classify_status(status) {
            return Err(FetchError::new(kind, format!("{endpoint} returned HTTP {status}")));
        }

        let text = response.text().await.map_err(request_error)?;
        serde_json::from_str(&text).map_err(|e| {
            FetchError::new(
                FetchErrorKind::Malformed,
                format!("{endpoint} returned invalid JSON: {e}"),
            )
        })
    }
}

/// Map a non-success HTTP status onto a failure kind; `None` for success
pub fn classify_status(status: StatusCode) -> Option<FetchErrorKind> {
    if status.is_success() {
        return None;
    }
    let kind = match status {
        StatusCode::TOO_MANY_REQUESTS => FetchErrorKind::RateLimited,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchErrorKind::Auth,
        StatusCode::NOT_FOUND => FetchErrorKind::NotFound,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => FetchErrorKind::Timeout,
        s if s.is_server_error() => FetchErrorKind::Connection,
        s if s.is_client_error() => FetchErrorKind::InvalidRequest,
        _ => FetchErrorKind::Other,
    };
    Some(kind)
}

fn request_error(err: reqwest::Error) -> FetchError {
    let kind = if err.is_timeout() {
        FetchErrorKind::Timeout
    } else if err.is_connect() || err.is_request() || err.is_body() {
        FetchErrorKind::Connection
    } else if err.is_decode() {
        FetchErrorKind::Malformed
    } else {
        FetchErrorKind::Other
    };
    FetchError::new(kind, err.to_string())
}
