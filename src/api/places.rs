//! Google Places (New) and the legacy maps geocoding / nearby-search services.

use super::{check_maps_status, trim_base};
use crate::{
    error::{AggregationError, Result},
    http::{ApiClient, HttpRequest},
    model::{Coordinates, NearbyPlace, PopularPlace},
};
use itertools::Itertools;
use log::debug;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const PHOTO_MAX_WIDTH_PX: u32 = 400;
const NEARBY_TYPES: [&str; 2] = ["tourist_attraction", "restaurant"];
const POPULAR_MAX_RESULTS: u32 = 20;
const POPULAR_FIELD_MASK: &str =
    "places.id,places.displayName,places.formattedAddress,places.photos,places.location";

/// Field masks requested from place details, one per enrichment need.
pub mod fields {
    pub const PHOTOS: &str = "photos";
    pub const LOCATION: &str = "location";
    pub const OPENING_HOURS: &str = "regularOpeningHours";
    pub const DISPLAY_NAME: &str = "displayName";
}

#[derive(Debug, Deserialize)]
struct TextSearchResponse {
    // The API omits `places` entirely when nothing matched.
    #[serde(default)]
    places: Vec<PlaceIdOnly>,
}

#[derive(Debug, Deserialize)]
struct PlaceIdOnly {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TextSearchDetails {
    #[serde(default)]
    places: Vec<PlaceDetails>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceDetails {
    pub id: Option<String>,
    pub display_name: Option<LocalizedText>,
    #[serde(default)]
    pub photos: Vec<PhotoRef>,
    pub location: Option<LatLng>,
    pub regular_opening_hours: Option<OpeningHours>,
    pub short_formatted_address: Option<String>,
    pub formatted_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalizedText {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoRef {
    /// Resource name, `places/{id}/photos/{ref}`
    pub name: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LatLng {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpeningHours {
    #[serde(default)]
    pub weekday_descriptions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    error_message: Option<String>,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: LegacyLatLng,
}

#[derive(Debug, Deserialize)]
struct LegacyLatLng {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Deserialize)]
struct NearbySearchResponse {
    status: String,
    error_message: Option<String>,
    #[serde(default)]
    results: Vec<NearbyResult>,
}

#[derive(Debug, Deserialize)]
struct NearbyResult {
    place_id: String,
    name: String,
    vicinity: Option<String>,
    rating: Option<f64>,
    #[serde(default)]
    photos: Vec<LegacyPhoto>,
}

#[derive(Debug, Deserialize)]
struct LegacyPhoto {
    photo_reference: String,
}

pub struct PlacesApi {
    http: Arc<ApiClient>,
    places_base: String,
    maps_base: String,
    api_key: String,
}

impl PlacesApi {
    pub fn new(http: Arc<ApiClient>, places_base: &str, maps_base: &str, api_key: &str) -> Self {
        Self {
            http,
            places_base: trim_base(places_base),
            maps_base: trim_base(maps_base),
            api_key: api_key.to_string(),
        }
    }

    /// Text search returning place ids in upstream order. Only the id field is
    /// requested to keep the payload small.
    pub async fn search_ids(&self, text_query: &str, cancel: &CancellationToken) -> Result<Vec<String>> {
        let request = HttpRequest::post(
            "places.searchText",
            format!("{}/places:searchText", self.places_base),
        )
        .header("X-Goog-Api-Key", self.api_key.as_str())
        .header("X-Goog-FieldMask", "places.id")
        .json(json!({ "textQuery": text_query }));

        let response: TextSearchResponse = self.http.fetch_json(&request, cancel).await?;
        debug!("places.searchText '{}' -> {} results", text_query, response.places.len());
        Ok(response.places.into_iter().map(|place| place.id).collect())
    }

    pub async fn details(
        &self,
        place_id: &str,
        field_mask: &str,
        cancel: &CancellationToken,
    ) -> Result<PlaceDetails> {
        let request = HttpRequest::get(
            "places.details",
            format!("{}/places/{}", self.places_base, place_id),
        )
        .header("X-Goog-Api-Key", self.api_key.as_str())
        .header("X-Goog-FieldMask", field_mask);

        self.http.fetch_json(&request, cancel).await
    }

    /// Media URL for a photo resource name; the client loads the image directly.
    pub fn photo_media_url(&self, photo_name: &str) -> String {
        format!(
            "{}/{}/media?maxWidthPx={}&key={}",
            self.places_base, photo_name, PHOTO_MAX_WIDTH_PX, self.api_key
        )
    }

    fn legacy_photo_url(&self, photo_reference: &str) -> String {
        format!(
            "{}/place/photo?maxwidth={}&photo_reference={}&key={}",
            self.maps_base, PHOTO_MAX_WIDTH_PX, photo_reference, self.api_key
        )
    }

    pub async fn geocode(&self, address: &str, cancel: &CancellationToken) -> Result<Coordinates> {
        let request = HttpRequest::get("maps.geocode", format!("{}/geocode/json", self.maps_base))
            .query("address", address)
            .query("key", &self.api_key);

        let response: GeocodeResponse = self.http.fetch_json(&request, cancel).await?;
        check_maps_status("maps.geocode", &response.status, response.error_message.as_deref())?;

        response
            .results
            .first()
            .map(|result| Coordinates::new(result.geometry.location.lat, result.geometry.location.lng))
            .ok_or_else(|| AggregationError::NotFound(format!("no geocode result for '{}'", address)))
    }

    /// Landmarks across a city or country, in upstream order and de-duplicated by
    /// place id. Results missing an id or a name are dropped.
    pub async fn popular_in(&self, region: &str, cancel: &CancellationToken) -> Result<Vec<PopularPlace>> {
        let request = HttpRequest::post(
            "places.searchText",
            format!("{}/places:searchText", self.places_base),
        )
        .header("X-Goog-Api-Key", self.api_key.as_str())
        .header("X-Goog-FieldMask", POPULAR_FIELD_MASK)
        .json(json!({
            "textQuery": format!("city landmarks in {}", region),
            "maxResultCount": POPULAR_MAX_RESULTS,
        }));

        let response: TextSearchDetails = self.http.fetch_json(&request, cancel).await?;
        debug!("{} landmarks in '{}'", response.places.len(), region);

        Ok(response
            .places
            .into_iter()
            .filter_map(|place| {
                let id = place.id?;
                let name = place.display_name?.text;
                Some(PopularPlace {
                    photo_url: place.photos.first().map(|photo| self.photo_media_url(&photo.name)),
                    location: place
                        .location
                        .map(|location| Coordinates::new(location.latitude, location.longitude)),
                    address: place.formatted_address,
                    place_id: id,
                    name,
                })
            })
            .unique_by(|place| place.place_id.clone())
            .collect())
    }

    /// Popular places (attractions and restaurants) around a point, merged and
    /// de-duplicated by place id. Each type is a separate upstream call.
    pub async fn nearby_popular(
        &self,
        center: Coordinates,
        radius_m: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<NearbyPlace>> {
        let mut all_results = Vec::new();

        for place_type in NEARBY_TYPES {
            let request = HttpRequest::get(
                "maps.nearbySearch",
                format!("{}/place/nearbysearch/json", self.maps_base),
            )
            .query("location", center.to_query())
            .query("radius", radius_m)
            .query("type", place_type)
            .query("key", &self.api_key);

            let response: NearbySearchResponse = self.http.fetch_json(&request, cancel).await?;
            match check_maps_status(
                "maps.nearbySearch",
                &response.status,
                response.error_message.as_deref(),
            ) {
                Ok(()) => {}
                Err(AggregationError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
            debug!("{} {} results near {}", response.results.len(), place_type, center.to_query());
            all_results.extend(response.results);
        }

        Ok(all_results
            .into_iter()
            .unique_by(|result| result.place_id.clone())
            .map(|result| NearbyPlace {
                photo_url: result
                    .photos
                    .first()
                    .map(|photo| self.legacy_photo_url(&photo.photo_reference)),
                place_id: result.place_id,
                name: result.name,
                vicinity: result.vicinity,
                rating: result.rating,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::RetryPolicy, http::HttpRateLimiter, testing::StubTransport};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn places_api(stub: Arc<StubTransport>) -> PlacesApi {
        let http = Arc::new(ApiClient::new(
            stub,
            RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(1)),
            HttpRateLimiter::new(4, Duration::ZERO),
        ));
        PlacesApi::new(
            http,
            "https://places.test/v1",
            "https://maps.test/maps/api",
            "k",
        )
    }

    #[tokio::test]
    async fn test_search_sends_field_mask_and_query() {
        let stub = Arc::new(
            StubTransport::new().on_post("places:searchText", 200, json!({"places": [{"id": "p1"}, {"id": "p2"}]})),
        );
        let ids = places_api(stub.clone())
            .search_ids("Lahore", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(ids, vec!["p1".to_string(), "p2".to_string()]);

        let call = &stub.recorded()[0];
        assert_eq!(
            call.headers
                .iter()
                .find(|(k, _)| k == "X-Goog-FieldMask")
                .map(|(_, v)| v.as_str()),
            Some("places.id")
        );
        assert_eq!(
            call.body,
            Some(crate::http::RequestBody::Json(json!({"textQuery": "Lahore"})))
        );
    }

    #[tokio::test]
    async fn test_search_without_places_key_is_empty() {
        let stub = Arc::new(StubTransport::new().on_post("places:searchText", 200, json!({})));
        let ids = places_api(stub)
            .search_ids("Atlantis", &CancellationToken::new())
            .await
            .unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn test_nearby_dedupes_across_types() {
        let stub = Arc::new(
            StubTransport::new()
                .on_get(
                    "nearbysearch",
                    200,
                    json!({"status": "OK", "results": [
                        {"place_id": "a", "name": "Fort", "photos": [{"photo_reference": "ref-a"}]},
                        {"place_id": "b", "name": "Mosque"}
                    ]}),
                )
                .on_get(
                    "nearbysearch",
                    200,
                    json!({"status": "OK", "results": [
                        {"place_id": "b", "name": "Mosque"},
                        {"place_id": "c", "name": "Food Street", "rating": 4.5}
                    ]}),
                ),
        );
        let places = places_api(stub)
            .nearby_popular(Coordinates::new(31.5, 74.3), 5000, &CancellationToken::new())
            .await
            .unwrap();

        let ids: Vec<&str> = places.iter().map(|p| p.place_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(
            places[0].photo_url.as_deref(),
            Some("https://maps.test/maps/api/place/photo?maxwidth=400&photo_reference=ref-a&key=k")
        );
    }

    #[tokio::test]
    async fn test_popular_in_region() {
        let stub = Arc::new(StubTransport::new().on_post(
            "places:searchText",
            200,
            json!({"places": [
                {
                    "id": "fort",
                    "displayName": {"text": "Lahore Fort"},
                    "formattedAddress": "Fort Rd, Lahore, Pakistan",
                    "location": {"latitude": 31.588, "longitude": 74.315},
                    "photos": [{"name": "places/fort/photos/f1"}]
                },
                {"id": "fort", "displayName": {"text": "Lahore Fort"}},
                {"id": "nameless"},
                {"id": "faisal", "displayName": {"text": "Faisal Mosque"}}
            ]}),
        ));
        let places = places_api(stub.clone())
            .popular_in("Pakistan", &CancellationToken::new())
            .await
            .unwrap();

        let ids: Vec<&str> = places.iter().map(|p| p.place_id.as_str()).collect();
        assert_eq!(ids, vec!["fort", "faisal"]);
        assert_eq!(places[0].address.as_deref(), Some("Fort Rd, Lahore, Pakistan"));
        assert_eq!(places[0].location, Some(Coordinates::new(31.588, 74.315)));
        assert_eq!(
            places[0].photo_url.as_deref(),
            Some("https://places.test/v1/places/fort/photos/f1/media?maxWidthPx=400&key=k")
        );
        assert_eq!(places[1].photo_url, None);

        let call = &stub.recorded()[0];
        assert_eq!(
            call.body,
            Some(crate::http::RequestBody::Json(
                json!({"textQuery": "city landmarks in Pakistan", "maxResultCount": 20})
            ))
        );
        assert!(call
            .headers
            .contains(&("X-Goog-FieldMask".to_string(), POPULAR_FIELD_MASK.to_string())));
    }

    #[tokio::test]
    async fn test_geocode_zero_results_is_not_found() {
        let stub = Arc::new(
            StubTransport::new().on_get("geocode/json", 200, json!({"status": "ZERO_RESULTS", "results": []})),
        );
        let result = places_api(stub)
            .geocode("Nowhere", &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(AggregationError::NotFound(_))));
    }

    #[test]
    fn test_photo_media_url() {
        let api = places_api(Arc::new(StubTransport::new()));
        assert_eq!(
            api.photo_media_url("places/p1/photos/abc"),
            "https://places.test/v1/places/p1/photos/abc/media?maxWidthPx=400&key=k"
        );
    }
}
