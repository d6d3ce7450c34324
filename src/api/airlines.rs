use super::trim_base;
use crate::{
    error::{AggregationError, Result},
    http::{ApiClient, HttpRequest},
};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AirlineRecord {
    pub name: String,
    pub iata: Option<String>,
    pub icao: Option<String>,
    pub logo_url: Option<String>,
}

impl AirlineRecord {
    /// IATA code when assigned, otherwise ICAO.
    pub fn code(&self) -> Result<String> {
        let assigned = |code: &Option<String>| {
            code.as_deref()
                .map(str::trim)
                .filter(|code| !code.is_empty())
                .map(str::to_string)
        };
        assigned(&self.iata)
            .or_else(|| assigned(&self.icao))
            .ok_or_else(|| {
                AggregationError::Malformed(format!("airline '{}' has no IATA or ICAO code", self.name))
            })
    }
}

pub struct AirlinesApi {
    http: Arc<ApiClient>,
    base: String,
    api_key: String,
}

impl AirlinesApi {
    pub fn new(http: Arc<ApiClient>, base: &str, api_key: &str) -> Self {
        Self {
            http,
            base: trim_base(base),
            api_key: api_key.to_string(),
        }
    }

    pub async fn by_name(&self, name: &str, cancel: &CancellationToken) -> Result<AirlineRecord> {
        self.lookup("name", name, cancel).await
    }

    /// Look up by designator: two characters are IATA, three are ICAO.
    pub async fn by_code(&self, code: &str, cancel: &CancellationToken) -> Result<AirlineRecord> {
        self.lookup(code_field(code), code, cancel).await
    }

    async fn lookup(&self, field: &str, value: &str, cancel: &CancellationToken) -> Result<AirlineRecord> {
        let request = HttpRequest::get("ninjas.airlines", format!("{}/v1/airlines", self.base))
            .query(field, value)
            .header("X-Api-Key", self.api_key.as_str());

        let records: Vec<AirlineRecord> = self.http.fetch_json(&request, cancel).await?;
        records
            .into_iter()
            .next()
            .ok_or_else(|| AggregationError::NotFound(format!("no airline with {} '{}'", field, value)))
    }
}

fn code_field(code: &str) -> &'static str {
    if code.trim().chars().count() == 3 {
        "icao"
    } else {
        "iata"
    }
}
