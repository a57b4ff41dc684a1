//! Network fetch glue
//!
//! The loader never blocks on the network. It asks a [`NetworkClient`] to
//! start a fetch and receives headers, chunks and the terminal signal through
//! a [`FetchHandler`], from whatever thread the client delivers them on.

use crate::{config::LoaderConfig, types::ResponseMeta, Error, Result};
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, instrument, warn};
use url::Url;

/// One fetch to start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Upstream http(s) URL
    pub url: Url,
    /// Start offset for a range GET, `None` for a plain GET
    pub range_start: Option<u64>,
    /// Extra request headers
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            range_start: None,
            headers: Vec::new(),
        }
    }

    pub fn with_range_start(mut self, offset: u64) -> Self {
        self.range_start = Some(offset);
        self
    }
}

/// Event receiver for one fetch
///
/// A fetch delivers `on_response` once, then any number of `on_data`
/// calls in stream order, then exactly one of `on_finished` or `on_error`.
pub trait FetchHandler: Send + Sync {
    fn on_response(&self, meta: ResponseMeta);
    fn on_data(&self, data: Bytes);
    fn on_finished(&self);
    fn on_error(&self, error: Error);
}

/// Capability to start fetches
pub trait NetworkClient: Send + Sync {
    /// Start a fetch and return immediately; events go to `handler`
    fn start_fetch(&self, request: FetchRequest, handler: Arc<dyn FetchHandler>);
}

/// reqwest-backed network client
///
/// Each fetch runs as a task on the tokio runtime the client was created on.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    runtime: Handle,
}

impl HttpClient {
    /// Build a client; must be called from within a tokio runtime
    pub fn new(config: &LoaderConfig) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Internal(format!("HTTP client needs a tokio runtime: {}", e)))?;
        Self::with_runtime(config, runtime)
    }

    /// Build a client that spawns its fetches on `runtime`
    pub fn with_runtime(config: &LoaderConfig, runtime: Handle) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.default_headers {
            let (name, value) = parse_header(name, value)?;
            headers.insert(name, value);
        }

        let mut builder = Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers);
        if config.request_timeout_ms > 0 {
            builder = builder.timeout(Duration::from_millis(config.request_timeout_ms));
        }
        if config.connect_timeout_ms > 0 {
            builder = builder.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
        }
        let client = builder
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, runtime })
    }

    #[instrument(skip(client, request, handler), fields(url = %request.url))]
    async fn run(client: Client, request: FetchRequest, handler: Arc<dyn FetchHandler>) {
        let url = request.url.to_string();

        let mut builder = client.get(request.url.clone());
        for (name, value) in &request.headers {
            match parse_header(name, value) {
                Ok((name, value)) => builder = builder.header(name, value),
                Err(e) => {
                    handler.on_error(e);
                    return;
                }
            }
        }
        if let Some(start) = request.range_start {
            builder = builder.header(RANGE, format!("bytes={}-", start));
        }

        let mut response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Fetch request failed");
                handler.on_error(Error::from_reqwest(&url, &e));
                return;
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Fetch returned non-success status");
            handler.on_error(Error::HttpStatus {
                url,
                status: status.as_u16(),
            });
            return;
        }

        let meta = response_meta(status, response.headers());
        debug!(
            status = meta.status,
            content_type = ?meta.content_type,
            content_length = ?meta.content_length,
            "Response headers received"
        );
        handler.on_response(meta);

        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => handler.on_data(chunk),
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Fetch stream failed");
                    handler.on_error(Error::from_reqwest(&url, &e));
                    return;
                }
            }
        }

        handler.on_finished();
    }
}

impl NetworkClient for HttpClient {
    fn start_fetch(&self, request: FetchRequest, handler: Arc<dyn FetchHandler>) {
        let client = self.client.clone();
        self.runtime.spawn(Self::run(client, request, handler));
    }
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| Error::InvalidConfig(format!("invalid header name '{}': {}", name, e)))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|e| Error::InvalidConfig(format!("invalid value for header '{}': {}", name, e)))?;
    Ok((header_name, header_value))
}

/// Extract content metadata. For 206 responses the total asset length comes
/// from Content-Range rather than Content-Length.
fn response_meta(status: StatusCode, headers: &HeaderMap) -> ResponseMeta {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let content_length = if status == StatusCode::PARTIAL_CONTENT {
        headers
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
    } else {
        headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    };

    ResponseMeta {
        status: status.as_u16(),
        content_type,
        content_length,
    }
}

/// Total from a `Content-Range: bytes <start>-<end>/<total>` header
pub fn parse_content_range_total(value: &str) -> Option<u64> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (_, total) = rest.split_once('/')?;
    match total.trim() {
        "*" => None,
        total => total.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_range_total() {
        assert_eq!(parse_content_range_total("bytes 100-999/1000"), Some(1000));
        assert_eq!(parse_content_range_total("bytes 0-0/1"), Some(1));
        assert_eq!(parse_content_range_total("bytes 0-99/*"), None);
        assert_eq!(parse_content_range_total("items 0-99/100"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
    }

    #[test]
    fn test_response_meta_partial_uses_content_range() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("900"));
        headers.insert(CONTENT_RANGE, HeaderValue::from_static("bytes 100-999/1000"));

        let meta = response_meta(StatusCode::PARTIAL_CONTENT, &headers);
        assert_eq!(meta.status, 206);
        assert_eq!(meta.content_length, Some(1000));
        assert_eq!(meta.content_type.as_deref(), Some("video/mp4"));

        let meta = response_meta(StatusCode::OK, &headers);
        assert_eq!(meta.content_length, Some(900));
    }

    #[test]
    fn test_rejects_invalid_default_header() {
        let mut config = LoaderConfig::default();
        config
            .default_headers
            .insert("bad header".into(), "x".into());
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        assert!(matches!(
            HttpClient::with_runtime(&config, runtime.handle().clone()),
            Err(Error::InvalidConfig(_))
        ));
    }
}
