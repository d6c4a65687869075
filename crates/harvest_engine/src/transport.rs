use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, REFERER, USER_AGENT};
use serde::Deserialize;
use thiserror::Error;

/// Page size used by the site's own client.
pub const DEFAULT_PAGE_LIMIT: u32 = 4998;

#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            base_url: "https://ws1.dtn.com".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Immutable query for one page of the symbol listing.
///
/// The cursor advances page to page; every other parameter stays constant for
/// the whole harvest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Opaque pagination token; `None` requests the first page.
    pub next_key: Option<String>,
    /// Empty text matches the entire catalog.
    pub search_text: String,
    pub exchange: Option<String>,
    pub sec_type: Option<String>,
    pub sic_code: Option<String>,
    pub naics_code: Option<String>,
    pub only_front: bool,
    pub only_continuous: bool,
    pub only_mini: bool,
    pub no_options: bool,
    pub no_spreads: bool,
    pub limit: u32,
    pub client_version: String,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            next_key: None,
            search_text: String::new(),
            exchange: None,
            sec_type: None,
            sic_code: None,
            naics_code: None,
            only_front: false,
            only_continuous: false,
            only_mini: false,
            no_options: false,
            no_spreads: false,
            limit: DEFAULT_PAGE_LIMIT,
            client_version: "IQsite 1.0".to_string(),
        }
    }
}

impl PageRequest {
    /// The same request pointed at a different page.
    pub fn with_cursor(&self, next_key: Option<String>) -> Self {
        Self {
            next_key,
            ..self.clone()
        }
    }

    /// Query parameters in wire order; unset optional filters are omitted.
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(key) = &self.next_key {
            params.push(("nextKey", key.clone()));
        }
        params.push(("searchText", self.search_text.clone()));
        params.push(("symbology", "iq".to_string()));
        if let Some(exchange) = &self.exchange {
            params.push(("exchange", exchange.clone()));
        }
        if let Some(sec_type) = &self.sec_type {
            params.push(("secType", sec_type.clone()));
        }
        if let Some(sic) = &self.sic_code {
            params.push(("sicCode", sic.clone()));
        }
        if let Some(naics) = &self.naics_code {
            params.push(("naicsCode", naics.clone()));
        }
        params.push(("onlyFront", self.only_front.to_string()));
        params.push(("onlyContinuous", self.only_continuous.to_string()));
        params.push(("onlyMini", self.only_mini.to_string()));
        params.push(("noOptions", self.no_options.to_string()));
        params.push(("noSpreads", self.no_spreads.to_string()));
        params.push(("limit", self.limit.to_string()));
        params.push(("clientVersion", self.client_version.clone()));
        params
    }
}

/// Raw outcome of one GET, before any classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection error: {0}")]
    Connection(String),
    #[error("transport error: {0}")]
    Other(String),
}

/// Exchange and security-type listings from the categories endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CategoryListing {
    #[serde(default)]
    pub exchange: Vec<serde_json::Value>,
    #[serde(default, rename = "securityType")]
    pub security_type: Vec<serde_json::Value>,
}

/// Performs a single GET and reports status plus body; retries live a layer
/// above in the fetcher.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn get_page(&self, request: &PageRequest) -> Result<TransportResponse, TransportError>;
    async fn get_categories(&self) -> Result<CategoryListing, TransportError>;
}

/// Production transport: one `reqwest::Client` with fixed headers, built at
/// construction and reused for every request.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    settings: TransportSettings,
}

impl ReqwestTransport {
    pub fn new(settings: TransportSettings) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .default_headers(default_headers())
            .build()
            .map_err(|err| TransportError::Other(err.to_string()))?;
        Ok(Self { client, settings })
    }

    fn search_url(&self) -> String {
        format!("{}/SymbolSearch/QuerySymbolsDD", self.settings.base_url)
    }

    fn categories_url(&self) -> String {
        format!("{}/SymbolSearch/GetSymbolCategories", self.settings.base_url)
    }
}

// The search endpoint only answers requests that look like the site's own
// XHR traffic.
fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
        ),
    );
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/json, text/javascript, */*; q=0.01"),
    );
    headers.insert("X-Requested-With", HeaderValue::from_static("XMLHttpRequest"));
    headers.insert(REFERER, HeaderValue::from_static("https://ws1.dtn.com/IQ/Search/"));
    headers
}

#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    async fn get_page(&self, request: &PageRequest) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .get(self.search_url())
            .query(&request.query_params())
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(map_reqwest_error)?.to_vec();
        Ok(TransportResponse { status, body })
    }

    async fn get_categories(&self) -> Result<CategoryListing, TransportError> {
        #[derive(Deserialize)]
        struct CategoriesEnvelope {
            data: Option<CategoryListing>,
        }

        let response = self
            .client
            .get(self.categories_url())
            .query(&[("symbology", "IQ")])
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        if status != 200 {
            return Err(TransportError::Other(format!("http status {status}")));
        }
        let body = response.bytes().await.map_err(map_reqwest_error)?;
        let envelope: CategoriesEnvelope = serde_json::from_slice(&body)
            .map_err(|err| TransportError::Other(format!("bad categories body: {err}")))?;
        envelope
            .data
            .ok_or_else(|| TransportError::Other("categories body has no data field".to_string()))
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::Timeout;
    }
    if err.is_connect() {
        return TransportError::Connection(err.to_string());
    }
    TransportError::Other(err.to_string())
}
