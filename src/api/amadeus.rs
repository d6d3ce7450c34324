//! Flight API client: OAuth2 client-credentials, nearest airport and flight offers.

use super::trim_base;
use crate::{
    error::{AggregationError, Result},
    http::{ApiClient, HttpRequest},
    model::Coordinates,
    utils::redact,
};
use chrono::NaiveDate;
use log::{debug, info, warn};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Tokens are refreshed this long before the upstream expiry.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

impl AccessToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + TOKEN_EXPIRY_MARGIN < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct AirportsResponse {
    #[serde(default)]
    data: Vec<AirportLocation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AirportLocation {
    iata_code: String,
}

/// One flight-offer search against the upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct OfferSearch {
    pub origin: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    pub adults: u32,
    pub max_results: u32,
}

#[derive(Debug, Deserialize)]
struct OffersResponse {
    #[serde(default)]
    data: Vec<FlightOffer>,
    #[serde(default)]
    dictionaries: Dictionaries,
}

#[derive(Debug, Default, Deserialize)]
struct Dictionaries {
    #[serde(default)]
    carriers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightOffer {
    pub id: String,
    pub itineraries: Vec<Itinerary>,
    pub price: Price,
}

impl FlightOffer {
    pub fn is_direct(&self) -> bool {
        self.itineraries.iter().all(|itinerary| itinerary.segments.len() == 1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Itinerary {
    pub duration: Option<String>,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub departure: Endpoint,
    pub arrival: Endpoint,
    pub carrier_code: String,
    pub number: String,
    pub duration: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub iata_code: String,
    /// Local departure/arrival time as sent upstream, usually without offset
    pub at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub total: String,
    pub currency: String,
}

/// Offers plus the carrier-code to carrier-name dictionary.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlightOffers {
    pub offers: Vec<FlightOffer>,
    pub carriers: BTreeMap<String, String>,
}

pub struct AmadeusApi {
    http: Arc<ApiClient>,
    base: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<AccessToken>>,
}

impl AmadeusApi {
    pub fn new(http: Arc<ApiClient>, base: &str, client_id: &str, client_secret: &str) -> Self {
        Self {
            http,
            base: trim_base(base),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            token: Mutex::new(None),
        }
    }

    /// IATA code of the airport most relevant to a point.
    pub async fn nearest_airport(&self, at: Coordinates, cancel: &CancellationToken) -> Result<String> {
        let request = HttpRequest::get(
            "amadeus.airports",
            format!("{}/v1/reference-data/locations/airports", self.base),
        )
        .query("latitude", at.latitude)
        .query("longitude", at.longitude)
        .query("sort", "relevance")
        .query("page[limit]", 1);

        let response: AirportsResponse = self.authorized(request, cancel).await?;
        response
            .data
            .into_iter()
            .next()
            .map(|airport| airport.iata_code)
            .ok_or_else(|| {
                AggregationError::NotFound(format!("no airport near {}", at.to_query()))
            })
    }

    pub async fn flight_offers(&self, search: &OfferSearch, cancel: &CancellationToken) -> Result<FlightOffers> {
        let request = HttpRequest::get(
            "amadeus.flightOffers",
            format!("{}/v2/shopping/flight-offers", self.base),
        )
        .query("originLocationCode", &search.origin)
        .query("destinationLocationCode", &search.destination)
        .query("departureDate", search.departure_date.format("%Y-%m-%d"))
        .query("adults", search.adults)
        .query("max", search.max_results);

        let response: OffersResponse = self.authorized(request, cancel).await?;
        debug!(
            "{} offers {} -> {} on {}",
            response.data.len(),
            search.origin,
            search.destination,
            search.departure_date
        );
        Ok(FlightOffers {
            offers: response.data,
            carriers: response.dictionaries.carriers,
        })
    }

    /// Send with a bearer token. A 401 drops the cached token and the request
    /// is repeated once with a fresh one.
    async fn authorized<T: DeserializeOwned>(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<T> {
        let token = self.access_token(cancel).await?;
        let first = request.clone().header("Authorization", format!("Bearer {}", token));

        match self.http.fetch_json(&first, cancel).await {
            Err(AggregationError::Upstream { status: 401, .. }) => {
                warn!("{}: token rejected, refreshing", request.label);
                self.token.lock().await.take();
                let token = self.access_token(cancel).await?;
                let retry = request.header("Authorization", format!("Bearer {}", token));
                self.http.fetch_json(&retry, cancel).await
            }
            other => other,
        }
    }

    async fn access_token(&self, cancel: &CancellationToken) -> Result<String> {
        // Held across the refresh so concurrent callers share one token request.
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|token| token.is_fresh()) {
            return Ok(token.value.clone());
        }

        let request = HttpRequest::post(
            "amadeus.token",
            format!("{}/v1/security/oauth2/token", self.base),
        )
        .form(vec![
            ("grant_type".to_string(), "client_credentials".to_string()),
            ("client_id".to_string(), self.client_id.clone()),
            ("client_secret".to_string(), self.client_secret.clone()),
        ]);

        let response: TokenResponse = self
            .http
            .fetch_json(&request, cancel)
            .await
            .map_err(|e| match e {
                AggregationError::Upstream { status, detail } if (400..500).contains(&status) => {
                    AggregationError::Auth(format!(
                        "token request for client {} rejected ({}): {}",
                        redact(&self.client_id),
                        status,
                        detail
                    ))
                }
                other => other,
            })?;

        info!(
            "Obtained flight API token for client {} (expires in {}s)",
            redact(&self.client_id),
            response.expires_in
        );
        let token = AccessToken {
            value: response.access_token,
            expires_at: Instant::now() + Duration::from_secs(response.expires_in),
        };
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }
}
