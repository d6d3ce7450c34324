//! Typed clients for every upstream the aggregation layer talks to.
//!
//! Each client owns its credentials and base URL, builds `HttpRequest`s, and
//! decodes responses into explicit schemas so shape problems surface as
//! `Malformed` at the boundary.

pub mod airlines;
pub mod amadeus;
pub mod directions;
pub mod places;
pub mod timezone;
pub mod weather;
pub mod wiki;

pub use airlines::{AirlineRecord, AirlinesApi};
pub use amadeus::{AmadeusApi, Endpoint, FlightOffer, FlightOffers, Itinerary, OfferSearch, Price, Segment};
pub use directions::{decode_polyline, DirectionsApi};
pub use places::{PlaceDetails, PlacesApi};
pub use timezone::TimezoneApi;
pub use weather::{CurrentWeather, WeatherApi};
pub use wiki::WikiApi;

use crate::{config::Config, error::AggregationError, http::ApiClient};
use std::sync::Arc;

/// Every upstream client, built once per process from the configuration.
pub struct UpstreamApis {
    pub places: PlacesApi,
    pub weather: WeatherApi,
    pub timezone: TimezoneApi,
    pub directions: DirectionsApi,
    pub wiki: WikiApi,
    pub airlines: AirlinesApi,
    pub amadeus: AmadeusApi,
}

impl UpstreamApis {
    pub fn new(config: &Config, http: Arc<ApiClient>) -> Self {
        let endpoints = &config.endpoints;
        Self {
            places: PlacesApi::new(
                http.clone(),
                &endpoints.places_base,
                &endpoints.maps_base,
                &config.google_api_key,
            ),
            weather: WeatherApi::new(
                http.clone(),
                &endpoints.openweather_base,
                &config.openweather_api_key,
                &endpoints.weatherbit_base,
                config.weatherbit_api_key.clone(),
            ),
            timezone: TimezoneApi::new(http.clone(), &endpoints.maps_base, &config.google_api_key),
            directions: DirectionsApi::new(
                http.clone(),
                &endpoints.maps_base,
                &config.google_api_key,
            ),
            wiki: WikiApi::new(http.clone(), &endpoints.wikipedia_base),
            airlines: AirlinesApi::new(http.clone(), &endpoints.ninjas_base, &config.ninjas_api_key),
            amadeus: AmadeusApi::new(
                http,
                &endpoints.amadeus_base,
                &config.amadeus_client_id,
                &config.amadeus_client_secret,
            ),
        }
    }
}

/// Interpret the `status` field of the legacy maps web services, which report
/// failures inside a 200 response.
pub(crate) fn check_maps_status(
    label: &str,
    status: &str,
    error_message: Option<&str>,
) -> Result<(), AggregationError> {
    match status {
        "OK" => Ok(()),
        "ZERO_RESULTS" | "NOT_FOUND" => Err(AggregationError::NotFound(format!(
            "{}: {}",
            label, status
        ))),
        "OVER_QUERY_LIMIT" => Err(AggregationError::RateLimited(format!(
            "{}: {}",
            label,
            error_message.unwrap_or(status)
        ))),
        "INVALID_REQUEST" => Err(AggregationError::InvalidInput(format!(
            "{}: {}",
            label,
            error_message.unwrap_or(status)
        ))),
        other => Err(AggregationError::Upstream {
            status: 200,
            detail: format!("{}: {} {}", label, other, error_message.unwrap_or_default()),
        }),
    }
}

pub(crate) fn trim_base(base: &str) -> String {
    base.trim_end_matches('/').to_string()
}
