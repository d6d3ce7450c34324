use super::trim_base;
use crate::{
    error::{AggregationError, Result},
    http::{ApiClient, HttpRequest},
};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    #[serde(default)]
    extract: String,
}

pub struct WikiApi {
    http: Arc<ApiClient>,
    base: String,
}

impl WikiApi {
    pub fn new(http: Arc<ApiClient>, base: &str) -> Self {
        Self {
            http,
            base: trim_base(base),
        }
    }

    /// Plain-text lead section of the article titled `title`.
    pub async fn summary(&self, title: &str, cancel: &CancellationToken) -> Result<String> {
        let url = self.summary_url(title)?;
        let response: SummaryResponse = self
            .http
            .fetch_json(&HttpRequest::get("wikipedia.summary", url), cancel)
            .await?;

        let extract = response.extract.trim();
        if extract.is_empty() {
            return Err(AggregationError::NotFound(format!(
                "no summary for '{}'",
                title
            )));
        }
        Ok(extract.to_string())
    }

    fn summary_url(&self, title: &str) -> Result<String> {
        let mut url = Url::parse(&format!("{}/api/rest_v1/page/summary", self.base))?;
        url.path_segments_mut()
            .map_err(|_| AggregationError::Config(format!("cannot-be-a-base url: {}", self.base)))?
            .push(title);
        Ok(url.into())
    }
}
