//! Canonical id -> attributes.
//!
//! Every attribute comes from its own upstream call, so attributes for one id
//! fail independently.

pub mod format;

pub use format::{localize, localize_timestamp, round_celsius};

use crate::{
    api::{places::fields, UpstreamApis},
    cache::AggregationCache,
    config::Config,
    error::{AggregationError, Result},
    model::{Attribute, AttributeKind, CanonicalId, Coordinates, WeatherReport},
};
use log::{debug, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct Enricher {
    apis: Arc<UpstreamApis>,
    nearby_radius_m: u32,
    /// Place id -> coordinates; weather, alerts, timezone and nearby all need them.
    locations: AggregationCache<String, Coordinates>,
}

impl Enricher {
    pub fn new(apis: Arc<UpstreamApis>, config: &Config) -> Self {
        Self {
            apis,
            nearby_radius_m: config.nearby_radius_m,
            locations: AggregationCache::new(
                "locations",
                config.failure_cooldown(),
                config.max_failure_cooldown(),
            ),
        }
    }

    pub async fn enrich(
        &self,
        id: &CanonicalId,
        attribute: AttributeKind,
        cancel: &CancellationToken,
    ) -> Result<Attribute> {
        let result = match (id, attribute) {
            (_, AttributeKind::RoutePolyline) => Err(AggregationError::InvalidInput(
                "a route needs an origin and a destination".to_string(),
            )),
            (CanonicalId::Place(place_id), attribute) => {
                self.enrich_place(place_id, attribute, cancel).await
            }
            (CanonicalId::Airline(code), AttributeKind::Photo) => self.airline_logo(code, cancel).await,
            (id, attribute) => Err(AggregationError::Unsupported(format!(
                "{} is not available for {}",
                attribute, id
            ))),
        };

        if let Err(e) = &result {
            if !matches!(e, AggregationError::Cancelled) {
                warn!("{} for {} unavailable [{:?}]: {}", attribute, id, e.categorize(), e);
            }
        }
        result
    }

    /// Driving route between two places.
    pub async fn route(
        &self,
        origin: &CanonicalId,
        destination: &CanonicalId,
        cancel: &CancellationToken,
    ) -> Result<Attribute> {
        let (CanonicalId::Place(from), CanonicalId::Place(to)) = (origin, destination) else {
            return Err(AggregationError::Unsupported(format!(
                "routes are only available between places, not {} and {}",
                origin, destination
            )));
        };

        let (from, to) = tokio::try_join!(self.locate(from, cancel), self.locate(to, cancel))?;
        let route = self.apis.directions.route(from, to, cancel).await?;
        debug!(
            "Route {} -> {}: {} points, {}",
            origin,
            destination,
            route.points.len(),
            route.duration_text
        );
        Ok(Attribute::RoutePolyline(route))
    }

    async fn enrich_place(
        &self,
        place_id: &str,
        attribute: AttributeKind,
        cancel: &CancellationToken,
    ) -> Result<Attribute> {
        match attribute {
            AttributeKind::Photo => {
                let details = self.apis.places.details(place_id, fields::PHOTOS, cancel).await?;
                let photo = details.photos.first().ok_or_else(|| {
                    AggregationError::NotFound(format!("place {} has no photos", place_id))
                })?;
                Ok(Attribute::Photo(self.apis.places.photo_media_url(&photo.name)))
            }
            AttributeKind::Weather => {
                let at = self.locate(place_id, cancel).await?;
                let current = self.apis.weather.current(at, cancel).await?;
                Ok(Attribute::Weather(WeatherReport {
                    temp_c: round_celsius(current.temp_c),
                    icon: current.icon,
                    description: current.description,
                }))
            }
            AttributeKind::WeatherAlerts => {
                let at = self.locate(place_id, cancel).await?;
                Ok(Attribute::WeatherAlerts(self.apis.weather.alerts(at, cancel).await?))
            }
            AttributeKind::Timezone => {
                let at = self.locate(place_id, cancel).await?;
                Ok(Attribute::Timezone(self.apis.timezone.zone_id(at, cancel).await?))
            }
            AttributeKind::OpeningHours => {
                let details = self
                    .apis
                    .places
                    .details(place_id, fields::OPENING_HOURS, cancel)
                    .await?;
                details
                    .regular_opening_hours
                    .map(|hours| hours.weekday_descriptions)
                    .filter(|days| !days.is_empty())
                    .map(Attribute::OpeningHours)
                    .ok_or_else(|| {
                        AggregationError::NotFound(format!("place {} has no opening hours", place_id))
                    })
            }
            AttributeKind::Summary => {
                let title = self.display_name(place_id, cancel).await?;
                Ok(Attribute::Summary(self.apis.wiki.summary(&title, cancel).await?))
            }
            AttributeKind::NearbyPlaces => {
                let at = self.locate(place_id, cancel).await?;
                let nearby = self
                    .apis
                    .places
                    .nearby_popular(at, self.nearby_radius_m, cancel)
                    .await?;
                Ok(Attribute::NearbyPlaces(nearby))
            }
            AttributeKind::PopularPlaces => {
                let region = self.display_name(place_id, cancel).await?;
                let landmarks = self.apis.places.popular_in(&region, cancel).await?;
                Ok(Attribute::PopularPlaces(landmarks))
            }
            AttributeKind::RoutePolyline => Err(AggregationError::InvalidInput(
                "a route needs an origin and a destination".to_string(),
            )),
        }
    }

    async fn display_name(&self, place_id: &str, cancel: &CancellationToken) -> Result<String> {
        let details = self
            .apis
            .places
            .details(place_id, fields::DISPLAY_NAME, cancel)
            .await?;
        details.display_name.map(|name| name.text).ok_or_else(|| {
            AggregationError::Malformed(format!("place {} has no display name", place_id))
        })
    }

    async fn airline_logo(&self, code: &str, cancel: &CancellationToken) -> Result<Attribute> {
        let record = self.apis.airlines.by_code(code, cancel).await?;
        record
            .logo_url
            .filter(|url| !url.is_empty())
            .map(Attribute::Photo)
            .ok_or_else(|| AggregationError::NotFound(format!("airline {} has no logo", code)))
    }

    async fn locate(&self, place_id: &str, cancel: &CancellationToken) -> Result<Coordinates> {
        self.locations
            .get_or_fetch(
                &place_id.to_string(),
                || async move {
                    let details = self
                        .apis
                        .places
                        .details(place_id, fields::LOCATION, cancel)
                        .await?;
                    details
                        .location
                        .map(|location| Coordinates::new(location.latitude, location.longitude))
                        .ok_or_else(|| {
                            AggregationError::NotFound(format!("place {} has no location", place_id))
                        })
                },
                cancel,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{stub_upstreams, test_config, StubTransport};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn enricher(stub: &Arc<StubTransport>) -> Enricher {
        Enricher::new(stub_upstreams(stub.clone()), &test_config())
    }

    fn place(id: &str) -> CanonicalId {
        CanonicalId::Place(id.to_string())
    }

    fn located(stub: StubTransport) -> StubTransport {
        stub.on_get(
            "/places/p1",
            200,
            json!({"id": "p1", "location": {"latitude": 31.5, "longitude": 74.3}}),
        )
    }

    #[tokio::test]
    async fn test_weather_is_rounded() {
        let stub = Arc::new(located(StubTransport::new()).on_get(
            "/data/2.5/weather",
            200,
            json!({"main": {"temp": 24.6}, "weather": [{"icon": "01d", "description": "clear"}]}),
        ));
        let attribute = enricher(&stub)
            .enrich(&place("p1"), AttributeKind::Weather, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            attribute,
            Attribute::Weather(WeatherReport {
                temp_c: 25,
                icon: "01d".to_string(),
                description: "clear".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_location_lookup_is_shared() {
        let stub = Arc::new(
            located(StubTransport::new())
                .on_get(
                    "/data/2.5/weather",
                    200,
                    json!({"main": {"temp": 20.0}, "weather": [{"icon": "02n", "description": "few clouds"}]}),
                )
                .on_get("timezone/json", 200, json!({"status": "OK", "timeZoneId": "Asia/Karachi"})),
        );
        let enricher = enricher(&stub);
        let (id, cancel) = (place("p1"), CancellationToken::new());
        let (weather, timezone) = tokio::join!(
            enricher.enrich(&id, AttributeKind::Weather, &cancel),
            enricher.enrich(&id, AttributeKind::Timezone, &cancel)
        );

        assert!(weather.is_ok() && timezone.is_ok());
        assert_eq!(stub.calls_to("/places/p1"), 1);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_siblings() {
        let stub = Arc::new(
            located(StubTransport::new())
                .on_get("/data/2.5/weather", 500, json!({"message": "internal"}))
                .on_get("timezone/json", 200, json!({"status": "OK", "timeZoneId": "Asia/Karachi"})),
        );
        let enricher = enricher(&stub);
        let (id, cancel) = (place("p1"), CancellationToken::new());
        let (weather, timezone) = tokio::join!(
            enricher.enrich(&id, AttributeKind::Weather, &cancel),
            enricher.enrich(&id, AttributeKind::Timezone, &cancel)
        );

        assert!(matches!(weather, Err(AggregationError::Upstream { status: 500, .. })));
        assert_eq!(timezone, Ok(Attribute::Timezone("Asia/Karachi".to_string())));
    }

    #[tokio::test]
    async fn test_photo_and_hours_from_details() {
        let stub = Arc::new(StubTransport::new().on_get(
            "/places/p1",
            200,
            json!({
                "photos": [{"name": "places/p1/photos/ref1"}],
                "regularOpeningHours": {"weekdayDescriptions": ["Monday: 9:00 AM – 5:00 PM"]}
            }),
        ));
        let enricher = enricher(&stub);
        let cancel = CancellationToken::new();

        let photo = enricher.enrich(&place("p1"), AttributeKind::Photo, &cancel).await.unwrap();
        assert_eq!(
            photo,
            Attribute::Photo(
                "https://places.googleapis.com/v1/places/p1/photos/ref1/media?maxWidthPx=400&key=test-google-key"
                    .to_string()
            )
        );
        let hours = enricher
            .enrich(&place("p1"), AttributeKind::OpeningHours, &cancel)
            .await
            .unwrap();
        assert_eq!(
            hours,
            Attribute::OpeningHours(vec!["Monday: 9:00 AM – 5:00 PM".to_string()])
        );
    }

    #[tokio::test]
    async fn test_summary_uses_display_name() {
        let stub = Arc::new(
            StubTransport::new()
                .on_get("/places/p9", 200, json!({"displayName": {"text": "Badshahi Mosque"}}))
                .on_get(
                    "page/summary/Badshahi%20Mosque",
                    200,
                    json!({"extract": "The Badshahi Mosque is a Mughal-era mosque."}),
                ),
        );
        let summary = enricher(&stub)
            .enrich(&place("p9"), AttributeKind::Summary, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            summary,
            Attribute::Summary("The Badshahi Mosque is a Mughal-era mosque.".to_string())
        );
    }

    #[tokio::test]
    async fn test_popular_places_use_display_name() {
        let stub = Arc::new(
            StubTransport::new()
                .on_get("/places/pk", 200, json!({"displayName": {"text": "Pakistan"}}))
                .on_post(
                    "places:searchText",
                    200,
                    json!({"places": [{"id": "fort", "displayName": {"text": "Lahore Fort"}}]}),
                ),
        );
        let landmarks = enricher(&stub)
            .enrich(&place("pk"), AttributeKind::PopularPlaces, &CancellationToken::new())
            .await
            .unwrap();

        match landmarks {
            Attribute::PopularPlaces(places) => assert_eq!(places[0].name, "Lahore Fort"),
            other => panic!("unexpected attribute {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_airline_logo_and_unsupported_pairs() {
        let stub = Arc::new(StubTransport::new().on_get(
            "/v1/airlines",
            200,
            json!([{"name": "Emirates", "iata": "EK", "logo_url": "https://logos.test/ek.png"}]),
        ));
        let enricher = enricher(&stub);
        let cancel = CancellationToken::new();
        let airline = CanonicalId::Airline("EK".to_string());

        assert_eq!(
            enricher.enrich(&airline, AttributeKind::Photo, &cancel).await,
            Ok(Attribute::Photo("https://logos.test/ek.png".to_string()))
        );
        assert!(matches!(
            enricher.enrich(&airline, AttributeKind::Weather, &cancel).await,
            Err(AggregationError::Unsupported(_))
        ));
        assert!(matches!(
            enricher.enrich(&place("p1"), AttributeKind::RoutePolyline, &cancel).await,
            Err(AggregationError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_route_between_places() {
        let stub = Arc::new(
            located(StubTransport::new())
                .on_get(
                    "/places/p2",
                    200,
                    json!({"location": {"latitude": 24.86, "longitude": 67.0}}),
                )
                .on_get(
                    "directions/json",
                    200,
                    json!({"status": "OK", "routes": [{
                        "overview_polyline": {"points": "_p~iF~ps|U"},
                        "legs": [{"duration": {"text": "14 hours"}}]
                    }]}),
                ),
        );
        let route = enricher(&stub)
            .route(&place("p1"), &place("p2"), &CancellationToken::new())
            .await
            .unwrap();

        match route {
            Attribute::RoutePolyline(route) => {
                assert_eq!(route.points.len(), 1);
                assert_eq!(route.duration_text, "14 hours");
            }
            other => panic!("unexpected attribute {:?}", other),
        }
        let directions = stub
            .recorded()
            .into_iter()
            .find(|call| call.url.contains("directions"))
            .unwrap();
        assert!(directions
            .query
            .contains(&("origin".to_string(), "31.5,74.3".to_string())));
    }
}
