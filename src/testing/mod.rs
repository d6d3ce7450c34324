//! Testing infrastructure
//!
//! In-memory stand-ins for the upstream APIs:
//! - `StubTransport`: canned HTTP replies matched by method and URL fragment
//! - call recording for asserting how often an upstream was hit
//! - `test_config`: a `Config` with dummy keys and millisecond-scale timings

use crate::{
    api::UpstreamApis,
    config::Config,
    error::{AggregationError, Result},
    http::{ApiClient, HttpRequest, HttpResponse, HttpTransport, Method, RequestBody},
};
use async_trait::async_trait;
use log::debug;
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

#[derive(Debug, Clone)]
pub enum StubReply {
    Response(HttpResponse),
    NetworkError(String),
}

#[derive(Debug)]
struct StubRoute {
    method: Method,
    fragment: String,
    replies: VecDeque<StubReply>,
}

/// A request the stub has seen.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub label: &'static str,
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

impl RecordedCall {
    /// URL with the query string appended, as routes are matched against it.
    pub fn target(&self) -> String {
        render_target(&self.url, &self.query)
    }
}

fn render_target(url: &str, query: &[(String, String)]) -> String {
    if query.is_empty() {
        return url.to_string();
    }
    let pairs: Vec<String> = query.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{}?{}", url, pairs.join("&"))
}

/// HTTP transport serving canned replies.
///
/// Routes match when the method agrees and the fragment occurs in the request
/// URL or its (unencoded) query string; the longest matching fragment wins. Registering the same route twice
/// queues a sequence: replies are consumed in order and the last one repeats.
#[derive(Debug, Default)]
pub struct StubTransport {
    routes: Mutex<Vec<StubRoute>>,
    calls: Mutex<Vec<RecordedCall>>,
    latency: Duration,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every reply, to keep requests in flight long enough to overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn on_get(self, fragment: &str, status: u16, body: serde_json::Value) -> Self {
        self.reply(Method::Get, fragment, json_reply(status, body))
    }

    pub fn on_post(self, fragment: &str, status: u16, body: serde_json::Value) -> Self {
        self.reply(Method::Post, fragment, json_reply(status, body))
    }

    pub fn on_get_network_error(self, fragment: &str, message: &str) -> Self {
        self.reply(
            Method::Get,
            fragment,
            StubReply::NetworkError(message.to_string()),
        )
    }

    pub fn reply(mut self, method: Method, fragment: &str, reply: StubReply) -> Self {
        let routes = self
            .routes
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match routes
            .iter_mut()
            .find(|route| route.method == method && route.fragment == fragment)
        {
            Some(route) => route.replies.push_back(reply),
            None => routes.push(StubRoute {
                method,
                fragment: fragment.to_string(),
                replies: VecDeque::from([reply]),
            }),
        }
        self
    }

    /// Number of requests whose URL or query contains `fragment`.
    pub fn calls_to(&self, fragment: &str) -> usize {
        self.lock_calls()
            .iter()
            .filter(|call| call.target().contains(fragment))
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.lock_calls().len()
    }

    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.lock_calls().clone()
    }

    fn lock_calls(&self) -> std::sync::MutexGuard<'_, Vec<RecordedCall>> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_reply(&self, request: &HttpRequest) -> Option<StubReply> {
        let mut routes = self
            .routes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let target = render_target(&request.url, &request.query);
        let route = routes
            .iter_mut()
            .filter(|route| route.method == request.method && target.contains(&route.fragment))
            .max_by_key(|route| route.fragment.len())?;

        if route.replies.len() > 1 {
            route.replies.pop_front()
        } else {
            route.replies.front().cloned()
        }
    }
}

#[async_trait]
impl HttpTransport for StubTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        self.lock_calls().push(RecordedCall {
            label: request.label,
            method: request.method,
            url: request.url.clone(),
            query: request.query.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
        });
        debug!("stub: {:?} {}", request.method, request.url);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match self.next_reply(request) {
            Some(StubReply::Response(response)) => Ok(response),
            Some(StubReply::NetworkError(message)) => Err(AggregationError::Transport(message)),
            None => Err(AggregationError::Transport(format!(
                "no stub route for {:?} {}",
                request.method, request.url
            ))),
        }
    }
}

fn json_reply(status: u16, body: serde_json::Value) -> StubReply {
    StubReply::Response(HttpResponse {
        status,
        body: body.to_string(),
    })
}

/// Configuration with dummy credentials and fast retry/cooldown timings.
pub fn test_config() -> Config {
    Config {
        google_api_key: "test-google-key".to_string(),
        openweather_api_key: "test-owm-key".to_string(),
        weatherbit_api_key: Some("test-weatherbit-key".to_string()),
        ninjas_api_key: "test-ninjas-key".to_string(),
        amadeus_client_id: "test-client".to_string(),
        amadeus_client_secret: "test-secret".to_string(),
        retry_max_attempts: 3,
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 5,
        failure_cooldown_ms: 50,
        max_failure_cooldown_ms: 200,
        ..Config::default()
    }
}

/// Every upstream client wired to `transport` with `test_config()`.
pub fn stub_upstreams(transport: Arc<StubTransport>) -> Arc<UpstreamApis> {
    let config = test_config();
    let http = Arc::new(ApiClient::from_config(&config, transport));
    Arc::new(UpstreamApis::new(&config, http))
}
