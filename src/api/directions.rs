use super::{check_maps_status, trim_base};
use crate::{
    error::{AggregationError, Result},
    http::{ApiClient, HttpRequest},
    model::{Coordinates, RoutePolyline},
};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    status: String,
    error_message: Option<String>,
    #[serde(default)]
    routes: Vec<Route>,
}

#[derive(Debug, Deserialize)]
struct Route {
    overview_polyline: EncodedPolyline,
    #[serde(default)]
    legs: Vec<Leg>,
}

#[derive(Debug, Deserialize)]
struct EncodedPolyline {
    points: String,
}

#[derive(Debug, Deserialize)]
struct Leg {
    duration: TextValue,
}

#[derive(Debug, Deserialize)]
struct TextValue {
    text: String,
}

pub struct DirectionsApi {
    http: Arc<ApiClient>,
    maps_base: String,
    api_key: String,
}

impl DirectionsApi {
    pub fn new(http: Arc<ApiClient>, maps_base: &str, api_key: &str) -> Self {
        Self {
            http,
            maps_base: trim_base(maps_base),
            api_key: api_key.to_string(),
        }
    }

    /// Driving route between two points, decoded into coordinates.
    pub async fn route(
        &self,
        origin: Coordinates,
        destination: Coordinates,
        cancel: &CancellationToken,
    ) -> Result<RoutePolyline> {
        let request = HttpRequest::get(
            "maps.directions",
            format!("{}/directions/json", self.maps_base),
        )
        .query("origin", origin.to_query())
        .query("destination", destination.to_query())
        .query("key", &self.api_key);

        let response: DirectionsResponse = self.http.fetch_json(&request, cancel).await?;
        check_maps_status("maps.directions", &response.status, response.error_message.as_deref())?;

        let route = response.routes.into_iter().next().ok_or_else(|| {
            AggregationError::NotFound(format!(
                "no route from {} to {}",
                origin.to_query(),
                destination.to_query()
            ))
        })?;
        let duration_text = route
            .legs
            .into_iter()
            .next()
            .map(|leg| leg.duration.text)
            .unwrap_or_default();

        Ok(RoutePolyline {
            points: decode_polyline(&route.overview_polyline.points)?,
            duration_text,
        })
    }
}

/// Decode an encoded polyline (precision 1e5) into coordinates.
pub fn decode_polyline(encoded: &str) -> Result<Vec<Coordinates>> {
    let bytes = encoded.as_bytes();
    let mut index = 0;
    let mut lat: i64 = 0;
    let mut lng: i64 = 0;
    let mut points = Vec::new();

    while index < bytes.len() {
        lat += next_delta(bytes, &mut index)?;
        lng += next_delta(bytes, &mut index)?;
        points.push(Coordinates::new(lat as f64 / 1e5, lng as f64 / 1e5));
    }

    Ok(points)
}

fn next_delta(bytes: &[u8], index: &mut usize) -> Result<i64> {
    let mut result: i64 = 0;
    let mut shift = 0;

    loop {
        let byte = *bytes
            .get(*index)
            .ok_or_else(|| AggregationError::Malformed("truncated polyline".to_string()))?;
        if !(63..=126).contains(&byte) || shift > 30 {
            return Err(AggregationError::Malformed(format!(
                "invalid polyline byte at {}",
                index
            )));
        }
        *index += 1;

        let chunk = i64::from(byte - 63);
        result |= (chunk & 0x1f) << shift;
        shift += 5;
        if chunk < 0x20 {
            break;
        }
    }

    Ok(if result & 1 != 0 { !(result >> 1) } else { result >> 1 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::RetryPolicy, http::HttpRateLimiter, testing::StubTransport};
    use assert_approx_eq::assert_approx_eq;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_decode_reference_polyline() {
        let points = decode_polyline("_p~iF~ps|U_ulLnnqC_mqNvxq`@").unwrap();
        assert_eq!(points.len(), 3);
        assert_approx_eq!(points[0].latitude, 38.5, 1e-9);
        assert_approx_eq!(points[0].longitude, -120.2, 1e-9);
        assert_approx_eq!(points[1].latitude, 40.7, 1e-9);
        assert_approx_eq!(points[1].longitude, -120.95, 1e-9);
        assert_approx_eq!(points[2].latitude, 43.252, 1e-9);
        assert_approx_eq!(points[2].longitude, -126.453, 1e-9);
    }

    #[test]
    fn test_truncated_polyline_is_malformed() {
        assert!(matches!(
            decode_polyline("_p~iF~ps|U_"),
            Err(AggregationError::Malformed(_))
        ));
        assert!(decode_polyline("").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_routes_are_not_found() {
        let stub = Arc::new(StubTransport::new().on_get(
            "directions/json",
            200,
            json!({"status": "ZERO_RESULTS", "routes": []}),
        ));
        let http = Arc::new(ApiClient::new(
            stub,
            RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(1)),
            HttpRateLimiter::new(1, Duration::ZERO),
        ));
        let result = DirectionsApi::new(http, "https://maps.test/maps/api", "k")
            .route(
                Coordinates::new(31.5, 74.3),
                Coordinates::new(24.8, 67.0),
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(AggregationError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_route_is_decoded_with_duration() {
        let stub = Arc::new(StubTransport::new().on_get(
            "directions/json",
            200,
            json!({"status": "OK", "routes": [{
                "overview_polyline": {"points": "_p~iF~ps|U_ulLnnqC"},
                "legs": [{"duration": {"text": "13 hours 5 mins"}}]
            }]}),
        ));
        let http = Arc::new(ApiClient::new(
            stub,
            RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(1)),
            HttpRateLimiter::new(1, Duration::ZERO),
        ));
        let route = DirectionsApi::new(http, "https://maps.test/maps/api", "k")
            .route(
                Coordinates::new(38.5, -120.2),
                Coordinates::new(40.7, -120.95),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(route.points.len(), 2);
        assert_eq!(route.duration_text, "13 hours 5 mins");
    }
}
