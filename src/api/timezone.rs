use super::{check_maps_status, trim_base};
use crate::{
    error::{AggregationError, Result},
    http::{ApiClient, HttpRequest},
    model::Coordinates,
};
use chrono::Utc;
use chrono_tz::Tz;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimezoneResponse {
    status: String,
    error_message: Option<String>,
    time_zone_id: Option<String>,
}

pub struct TimezoneApi {
    http: Arc<ApiClient>,
    maps_base: String,
    api_key: String,
}

impl TimezoneApi {
    pub fn new(http: Arc<ApiClient>, maps_base: &str, api_key: &str) -> Self {
        Self {
            http,
            maps_base: trim_base(maps_base),
            api_key: api_key.to_string(),
        }
    }

    /// IANA zone id for a point, e.g. "Asia/Karachi".
    pub async fn zone_id(&self, at: Coordinates, cancel: &CancellationToken) -> Result<String> {
        let request = HttpRequest::get("maps.timezone", format!("{}/timezone/json", self.maps_base))
            .query("location", at.to_query())
            .query("timestamp", Utc::now().timestamp())
            .query("key", &self.api_key);

        let response: TimezoneResponse = self.http.fetch_json(&request, cancel).await?;
        check_maps_status("maps.timezone", &response.status, response.error_message.as_deref())?;

        let zone = response
            .time_zone_id
            .ok_or_else(|| AggregationError::Malformed("maps.timezone: no timeZoneId".to_string()))?;
        zone.parse::<Tz>().map_err(|_| {
            AggregationError::Malformed(format!("maps.timezone: unknown zone '{}'", zone))
        })?;
        Ok(zone)
    }
}
