//! HTTP client for the remote log tail endpoint

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use auditscope_types::{Credentials, Quota, RawLogRecord};

use crate::error::{ApiError, ApiResult};
use crate::tailer::{LogTailer, TailPage, TailRequest, TailerFactory};

const TAIL_PATH: &str = "/monitoring/logs/tail";

const HEADER_API_KEY: &str = "x-api-key";
const HEADER_API_SECRET: &str = "x-api-secret";
const HEADER_LIMIT: &str = "x-ratelimit-limit";
const HEADER_REMAINING: &str = "x-ratelimit-remaining";
const HEADER_RESET: &str = "x-ratelimit-reset";

/// Bytes of an error body kept in error messages
const ERROR_BODY_SNIPPET: usize = 200;

/// Tunables shared by every client the process creates
#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// Overall deadline for one request, body included
    pub timeout: Duration,

    /// Largest accepted response body
    pub max_response_bytes: usize,

    /// Permit plain `http` origins (local test doubles only)
    pub allow_insecure: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_response_bytes: 10 * 1024 * 1024,
            allow_insecure: false,
        }
    }
}

/// Wire shape of a tail response
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TailResponse {
    #[serde(default)]
    result: Vec<RawLogRecord>,
    #[serde(default)]
    paged_results_cookie: Option<String>,
    #[serde(default)]
    total_paged_results: Option<i64>,
    #[serde(default)]
    result_count: Option<i64>,
}

impl TailResponse {
    /// `totalPagedResults`, then `resultCount`, then the page length;
    /// negative counts mean "unknown"
    fn total(&self) -> u64 {
        [self.total_paged_results, self.result_count]
            .into_iter()
            .flatten()
            .find_map(|n| u64::try_from(n).ok())
            .unwrap_or(self.result.len() as u64)
    }
}

/// Log API client bound to one tenant's credentials
#[derive(Clone)]
pub struct LogApiClient {
    http: reqwest::Client,
    tail_url: Url,
    options: ClientOptions,
}

impl LogApiClient {
    /// Build a client, validating the origin and header values
    pub fn new(credentials: &Credentials, options: ClientOptions) -> ApiResult<Self> {
        let origin = Url::parse(credentials.origin.trim())
            .map_err(|e| ApiError::InvalidCredentials(format!("origin is not a URL: {}", e)))?;

        match origin.scheme() {
            "https" => {}
            "http" if options.allow_insecure => {
                tracing::warn!(origin = %origin, "using plain http origin");
            }
            scheme => {
                return Err(ApiError::InvalidCredentials(format!(
                    "origin must use https, got {}",
                    scheme
                )));
            }
        }

        let tail_url = origin
            .join(TAIL_PATH)
            .map_err(|e| ApiError::InvalidCredentials(format!("origin is not a base URL: {}", e)))?;

        let headers = Self::default_headers(credentials)?;
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(options.timeout)
            .build()?;

        Ok(Self {
            http,
            tail_url,
            options,
        })
    }

    fn default_headers(credentials: &Credentials) -> ApiResult<HeaderMap> {
        if credentials.api_key.is_empty() || credentials.api_secret.is_empty() {
            return Err(ApiError::InvalidCredentials(
                "API key and secret are required".to_string(),
            ));
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &credentials.custom_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ApiError::InvalidCredentials(format!("invalid header name: {}", name)))?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                ApiError::InvalidCredentials(format!("invalid value for header {}", name))
            })?;
            headers.insert(name, value);
        }

        headers.insert(HEADER_API_KEY, Self::secret_value(&credentials.api_key, "API key")?);
        headers.insert(
            HEADER_API_SECRET,
            Self::secret_value(&credentials.api_secret, "API secret")?,
        );
        Ok(headers)
    }

    fn secret_value(value: &str, what: &str) -> ApiResult<HeaderValue> {
        let mut value = HeaderValue::from_str(value)
            .map_err(|_| ApiError::InvalidCredentials(format!("{} contains invalid characters", what)))?;
        value.set_sensitive(true);
        Ok(value)
    }

    /// URL of the tail endpoint this client polls
    pub fn tail_url(&self) -> &Url {
        &self.tail_url
    }

    /// Fetch one page, bounded by the configured timeout and size limit
    pub async fn fetch(&self, request: &TailRequest) -> ApiResult<TailPage> {
        match tokio::time::timeout(self.options.timeout, self.fetch_page(request)).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout(self.options.timeout)),
        }
    }

    async fn fetch_page(&self, request: &TailRequest) -> ApiResult<TailPage> {
        let mut builder = self
            .http
            .get(self.tail_url.clone())
            .query(&[("source", request.sources.join(","))]);
        if let Some(cookie) = &request.cookie {
            builder = builder.query(&[("_pagedResultsCookie", cookie)]);
        }

        let response = builder.send().await?;
        let status = response.status();
        let quota = quota_from_headers(response.headers());
        if quota.is_empty() {
            tracing::debug!(status = status.as_u16(), "response carried no quota headers");
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_after_from_headers(response.headers());
            tracing::debug!(?retry_after, "log API rate limit exceeded");
            return Err(ApiError::RateLimited { retry_after, quota });
        }

        let body = self.read_body(response).await?;

        if !status.is_success() {
            let snippet = String::from_utf8_lossy(&body);
            let snippet: String = snippet.chars().take(ERROR_BODY_SNIPPET).collect();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: snippet.trim().to_string(),
            });
        }

        let page: TailResponse =
            serde_json::from_slice(&body).map_err(|e| ApiError::Decode(e.to_string()))?;
        let total = page.total();

        Ok(TailPage {
            records: page.result,
            cookie: page.paged_results_cookie.filter(|c| !c.is_empty()),
            total,
            quota,
        })
    }

    /// Read the body chunk by chunk, refusing anything over the limit
    async fn read_body(&self, mut response: reqwest::Response) -> ApiResult<Vec<u8>> {
        let limit = self.options.max_response_bytes;
        if response.content_length().is_some_and(|len| len > limit as u64) {
            return Err(ApiError::ResponseTooLarge { limit });
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > limit {
                return Err(ApiError::ResponseTooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

#[async_trait]
impl LogTailer for LogApiClient {
    async fn tail(&self, request: TailRequest, cancel: CancellationToken) -> ApiResult<TailPage> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ApiError::Cancelled),
            result = self.fetch(&request) => result,
        }
    }
}

/// Creates [`LogApiClient`]s from connect messages
#[derive(Clone, Debug, Default)]
pub struct HttpTailerFactory {
    options: ClientOptions,
}

impl HttpTailerFactory {
    pub fn new(options: ClientOptions) -> Self {
        Self { options }
    }
}

impl TailerFactory for HttpTailerFactory {
    fn create(&self, credentials: &Credentials) -> ApiResult<Arc<dyn LogTailer>> {
        let client = LogApiClient::new(credentials, self.options.clone())?;
        Ok(Arc::new(client))
    }
}

/// Parse the quota headers; unparseable or missing headers stay `None`
pub fn quota_from_headers(headers: &HeaderMap) -> Quota {
    let number = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
    };

    Quota {
        limit: number(HEADER_LIMIT).and_then(|n| u32::try_from(n).ok()),
        remaining: number(HEADER_REMAINING).and_then(|n| u32::try_from(n).ok()),
        reset_at: number(HEADER_RESET).and_then(|secs| DateTime::from_timestamp(secs, 0)),
    }
}

/// `retry-after` in whole seconds
fn retry_after_from_headers(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
