use chrono::NaiveDate;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use voyon_aggregator::testing::{test_config, StubTransport};
use voyon_aggregator::{AggregationError, Aggregator, CanonicalId, FlightQuery};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn departure() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 11, 2).unwrap()
}

fn segment(carrier: &str, number: &str, from: &str, to: &str, departs: &str, arrives: &str) -> Value {
    json!({
        "departure": {"iataCode": from, "at": departs},
        "arrival": {"iataCode": to, "at": arrives},
        "carrierCode": carrier,
        "number": number,
        "duration": "PT2H"
    })
}

fn offers_body() -> Value {
    json!({
        "data": [
            {
                "id": "1",
                "itineraries": [{"segments": [
                    segment("PK", "303", "LHE", "KHI", "2026-11-02T08:00:00", "2026-11-02T10:00:00")
                ]}],
                "price": {"total": "95.00", "currency": "EUR"}
            },
            {
                "id": "2",
                "itineraries": [{"segments": [
                    segment("EK", "623", "LHE", "DXB", "2026-11-02T03:00:00", "2026-11-02T05:30:00"),
                    segment("EK", "600", "DXB", "KHI", "2026-11-02T08:00:00", "2026-11-02T09:30:00")
                ]}],
                "price": {"total": "240.10", "currency": "EUR"}
            },
            {
                "id": "3",
                "itineraries": [{"segments": [
                    segment("PK", "305", "LHE", "KHI", "2026-11-02T18:00:00", "2026-11-02T20:00:00")
                ]}],
                "price": {"total": "110.00", "currency": "EUR"}
            },
            {
                "id": "4",
                "itineraries": [{"segments": [
                    segment("EK", "625", "LHE", "DXB", "2026-11-02T21:00:00", "2026-11-02T23:30:00"),
                    segment("EK", "606", "DXB", "KHI", "2026-11-03T02:00:00", "2026-11-03T03:30:00")
                ]}],
                "price": {"total": "260.00", "currency": "EUR"}
            }
        ],
        "dictionaries": {"carriers": {"PK": "PAKISTAN INTERNATIONAL AIRLINES", "EK": "EMIRATES"}}
    })
}

/// Lahore -> Karachi, with Karachi's time zone and an Emirates logo available.
fn flight_upstreams() -> StubTransport {
    StubTransport::new()
        .on_get(
            "address=Lahore",
            200,
            json!({"status": "OK", "results": [{"geometry": {"location": {"lat": 31.52, "lng": 74.35}}}]}),
        )
        .on_get(
            "address=Karachi",
            200,
            json!({"status": "OK", "results": [{"geometry": {"location": {"lat": 24.86, "lng": 67.0}}}]}),
        )
        .on_get("latitude=31.52", 200, json!({"data": [{"iataCode": "LHE"}]}))
        .on_get("latitude=24.86", 200, json!({"data": [{"iataCode": "KHI"}]}))
        .on_post("places:searchText", 200, json!({"places": [{"id": "p-khi"}]}))
        .on_get("/places/p-khi", 200, json!({"location": {"latitude": 24.86, "longitude": 67.0}}))
        .on_get("timezone/json", 200, json!({"status": "OK", "timeZoneId": "Asia/Karachi"}))
        .on_get(
            "name=EMIRATES",
            200,
            json!([{"name": "Emirates", "iata": "EK", "icao": "UAE"}]),
        )
        .on_get(
            "iata=EK",
            200,
            json!([{"name": "Emirates", "iata": "EK", "logo_url": "https://logos.test/ek.png"}]),
        )
        .on_get("name=PAKISTAN", 200, json!([]))
}

fn with_token_and_offers(stub: StubTransport) -> StubTransport {
    stub.on_post("oauth2/token", 200, json!({"access_token": "t1", "expires_in": 1799}))
        .on_get("flight-offers", 200, offers_body())
}

#[tokio::test]
async fn offers_are_grouped_and_localized() {
    init_logging();
    let stub = Arc::new(with_token_and_offers(flight_upstreams()));
    let aggregator = Aggregator::new(&test_config(), stub.clone());

    let view = aggregator
        .search_flights("Lahore", "Karachi", &FlightQuery::new(departure()), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(view.origin, CanonicalId::Airport("LHE".to_string()));
    assert_eq!(view.destination, CanonicalId::Airport("KHI".to_string()));
    assert_eq!(view.destination_timezone.as_deref(), Some("Asia/Karachi"));

    let ids = |offers: &[voyon_aggregator::flights::OfferView]| {
        offers.iter().map(|o| o.id.clone()).collect::<Vec<_>>()
    };
    assert_eq!(ids(&view.direct), vec!["1", "3"]);
    assert_eq!(ids(&view.connecting), vec!["2", "4"]);
    assert_eq!(ids(&view.best), vec!["1", "2", "3"]);

    assert_eq!(view.direct[0].segments[0].flight, "PK303");
    assert_eq!(view.direct[0].segments[0].departs_at, "2026-11-02T08:00:00+05:00");

    let emirates = &view.carriers["EK"];
    assert_eq!(emirates.name, "EMIRATES");
    assert_eq!(emirates.logo_url.as_deref(), Some("https://logos.test/ek.png"));
    // A missing logo does not fail the search.
    assert_eq!(view.carriers["PK"].logo_url, None);

    let offers_call = stub
        .recorded()
        .into_iter()
        .find(|call| call.url.contains("flight-offers"))
        .unwrap();
    assert!(offers_call.target().contains("originLocationCode=LHE"));
    assert!(offers_call.target().contains("destinationLocationCode=KHI"));
    assert!(offers_call.target().contains("departureDate=2026-11-02"));
}

#[tokio::test]
async fn carrier_filter_keeps_matching_offers() {
    init_logging();
    let stub = Arc::new(with_token_and_offers(flight_upstreams()));
    let aggregator = Aggregator::new(&test_config(), stub.clone());

    let query = FlightQuery::new(departure()).with_carrier("EK");
    let view = aggregator
        .search_flights("Lahore", "Karachi", &query, &CancellationToken::new())
        .await
        .unwrap();

    assert!(view.direct.is_empty());
    assert_eq!(view.connecting.len(), 2);
    assert_eq!(view.carriers.keys().collect::<Vec<_>>(), vec!["EK"]);
    assert_eq!(stub.calls_to("name=PAKISTAN"), 0);
}

#[tokio::test]
async fn expired_token_is_refreshed_once() {
    init_logging();
    let stub = Arc::new(
        flight_upstreams()
            .on_post("oauth2/token", 200, json!({"access_token": "t1", "expires_in": 1799}))
            .on_post("oauth2/token", 200, json!({"access_token": "t2", "expires_in": 1799}))
            .on_get("flight-offers", 401, json!({"errors": [{"code": 38190}]}))
            .on_get("flight-offers", 200, offers_body()),
    );
    let aggregator = Aggregator::new(&test_config(), stub.clone());

    let view = aggregator
        .search_flights("Lahore", "Karachi", &FlightQuery::new(departure()), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(view.best.len(), 3);
    assert_eq!(stub.calls_to("oauth2/token"), 2);
    assert_eq!(stub.calls_to("flight-offers"), 2);
}

#[tokio::test]
async fn invalid_query_is_rejected_before_any_call() {
    init_logging();
    let stub = Arc::new(StubTransport::new());
    let aggregator = Aggregator::new(&test_config(), stub.clone());

    let query = FlightQuery {
        adults: 0,
        ..FlightQuery::new(departure())
    };
    let result = aggregator
        .search_flights("Lahore", "Karachi", &query, &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(AggregationError::InvalidInput(_))));
    assert_eq!(stub.total_calls(), 0);
}
