//! HTTP plumbing shared by every upstream client.
//!
//! `HttpTransport` is the seam between typed API clients and the network: the
//! production transport wraps `reqwest`, tests plug in `testing::StubTransport`.
//! `ApiClient` layers retry, rate limiting, cancellation and schema decoding on top.

pub mod rate_limiter;

pub use rate_limiter::HttpRateLimiter;

use crate::{
    config::Config,
    error::{AggregationError, Result, RetryPolicy},
    utils::truncate_body,
};
use async_trait::async_trait;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use std::{sync::Arc, time::Duration, time::Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

/// Transport-agnostic description of one upstream request.
#[derive(Clone)]
pub struct HttpRequest {
    /// Short name used in logs and error messages, e.g. "places.searchText"
    pub label: &'static str,
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

impl HttpRequest {
    pub fn get(label: &'static str, url: impl Into<String>) -> Self {
        Self::new(label, Method::Get, url.into())
    }

    pub fn post(label: &'static str, url: impl Into<String>) -> Self {
        Self::new(label, Method::Post, url.into())
    }

    fn new(label: &'static str, method: Method, url: String) -> Self {
        Self {
            label,
            method,
            url,
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn query(mut self, name: &str, value: impl ToString) -> Self {
        self.query.push((name.to_string(), value.to_string()));
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn form(mut self, pairs: Vec<(String, String)>) -> Self {
        self.body = Some(RequestBody::Form(pairs));
        self
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

// Query strings and headers carry API keys, so only the label and path are printed.
impl std::fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRequest")
            .field("label", &self.label)
            .field("method", &self.method)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("voyon-aggregator/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AggregationError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.body {
            Some(RequestBody::Json(value)) => builder.json(value),
            Some(RequestBody::Form(pairs)) => builder.form(pairs),
            None => builder,
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }
}

/// Executes requests against upstream APIs with retry, rate limiting and
/// cancellation, and decodes JSON bodies into typed schemas.
pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    retry: RetryPolicy,
    limiter: HttpRateLimiter,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn HttpTransport>, retry: RetryPolicy, limiter: HttpRateLimiter) -> Self {
        Self {
            transport,
            retry,
            limiter,
        }
    }

    pub fn from_config(config: &Config, transport: Arc<dyn HttpTransport>) -> Self {
        let retry = RetryPolicy::new(
            config.retry_max_attempts,
            Duration::from_millis(config.retry_base_delay_ms),
            Duration::from_millis(config.retry_max_delay_ms),
        );
        let limiter = HttpRateLimiter::new(
            config.http_max_concurrent,
            Duration::from_millis(config.http_min_delay_ms),
        );
        Self::new(transport, retry, limiter)
    }

    /// Fetch and decode a JSON body. A body that does not match `T` is `Malformed`.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        request: &HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<T> {
        let body = self.fetch_body(request, cancel).await?;
        serde_json::from_str(&body).map_err(|e| {
            warn!("{}: unexpected response shape: {}", request.label, e);
            AggregationError::Malformed(format!("{}: {}", request.label, e))
        })
    }

    /// Fetch the raw body of a 2xx response.
    pub async fn fetch_body(&self, request: &HttpRequest, cancel: &CancellationToken) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(AggregationError::Cancelled);
        }

        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AggregationError::Cancelled),
            result = self.retry.execute(request.label, move || self.send_once(request)) => result,
        };

        match &result {
            Ok(body) => debug!(
                "{} completed in {}ms ({} bytes)",
                request.label,
                started.elapsed().as_millis(),
                body.len()
            ),
            Err(AggregationError::Cancelled) => debug!("{} cancelled", request.label),
            Err(e) => debug!("{} failed after {}ms: {}", request.label, started.elapsed().as_millis(), e),
        }
        result
    }

    async fn send_once(&self, request: &HttpRequest) -> Result<String> {
        let _permit = self.limiter.acquire().await?;
        let response = self.transport.send(request).await?;
        classify_response(request, response)
    }
}

fn classify_response(request: &HttpRequest, response: HttpResponse) -> Result<String> {
    match response.status {
        200..=299 => Ok(response.body),
        404 => Err(AggregationError::NotFound(format!(
            "{} returned 404",
            request.label
        ))),
        429 => Err(AggregationError::RateLimited(format!(
            "{}: {}",
            request.label,
            truncate_body(&response.body, 120)
        ))),
        status => Err(AggregationError::Upstream {
            status,
            detail: format!("{}: {}", request.label, truncate_body(&response.body, 200)),
        }),
    }
}
