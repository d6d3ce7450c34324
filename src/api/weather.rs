use super::trim_base;
use crate::{
    error::{AggregationError, Result},
    http::{ApiClient, HttpRequest},
    model::{Coordinates, WeatherAlert},
};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Current conditions as reported upstream, before rounding for display.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentWeather {
    pub temp_c: f64,
    pub icon: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct OpenWeatherResponse {
    main: MainReading,
    #[serde(default)]
    weather: Vec<Condition>,
}

#[derive(Debug, Deserialize)]
struct MainReading {
    temp: f64,
}

#[derive(Debug, Deserialize)]
struct Condition {
    icon: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct AlertsResponse {
    #[serde(default)]
    alerts: Vec<AlertRecord>,
}

#[derive(Debug, Deserialize)]
struct AlertRecord {
    title: String,
    severity: Option<String>,
    description: Option<String>,
    #[serde(default)]
    regions: Vec<String>,
}

pub struct WeatherApi {
    http: Arc<ApiClient>,
    openweather_base: String,
    openweather_key: String,
    weatherbit_base: String,
    weatherbit_key: Option<String>,
}

impl WeatherApi {
    pub fn new(
        http: Arc<ApiClient>,
        openweather_base: &str,
        openweather_key: &str,
        weatherbit_base: &str,
        weatherbit_key: Option<String>,
    ) -> Self {
        Self {
            http,
            openweather_base: trim_base(openweather_base),
            openweather_key: openweather_key.to_string(),
            weatherbit_base: trim_base(weatherbit_base),
            weatherbit_key,
        }
    }

    /// Current weather in metric units.
    pub async fn current(&self, at: Coordinates, cancel: &CancellationToken) -> Result<CurrentWeather> {
        let request = HttpRequest::get(
            "openweather.current",
            format!("{}/data/2.5/weather", self.openweather_base),
        )
        .query("lat", at.latitude)
        .query("lon", at.longitude)
        .query("units", "metric")
        .query("appid", &self.openweather_key);

        let response: OpenWeatherResponse = self.http.fetch_json(&request, cancel).await?;
        let condition = response.weather.into_iter().next().ok_or_else(|| {
            AggregationError::Malformed("openweather.current: empty weather list".to_string())
        })?;

        Ok(CurrentWeather {
            temp_c: response.main.temp,
            icon: condition.icon,
            description: condition.description,
        })
    }

    /// Active severe-weather alerts. An empty list means none are in effect.
    pub async fn alerts(&self, at: Coordinates, cancel: &CancellationToken) -> Result<Vec<WeatherAlert>> {
        let key = self.weatherbit_key.as_deref().ok_or_else(|| {
            AggregationError::Unsupported("weather alerts need WEATHERBIT_API_KEY".to_string())
        })?;

        let request = HttpRequest::get(
            "weatherbit.alerts",
            format!("{}/v2.0/alerts", self.weatherbit_base),
        )
        .query("lat", at.latitude)
        .query("lon", at.longitude)
        .query("key", key);

        let response: AlertsResponse = self.http.fetch_json(&request, cancel).await?;
        Ok(response
            .alerts
            .into_iter()
            .map(|alert| WeatherAlert {
                title: alert.title,
                severity: alert.severity,
                description: alert.description,
                regions: alert.regions,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::RetryPolicy, http::HttpRateLimiter, testing::StubTransport};
    use serde_json::json;
    use std::time::Duration;

    fn weather_api(stub: Arc<StubTransport>, weatherbit_key: Option<&str>) -> WeatherApi {
        let http = Arc::new(ApiClient::new(
            stub,
            RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(1)),
            HttpRateLimiter::new(4, Duration::ZERO),
        ));
        WeatherApi::new(
            http,
            "https://owm.test",
            "owm",
            "https://wb.test",
            weatherbit_key.map(str::to_string),
        )
    }

    #[tokio::test]
    async fn test_current_weather_uses_metric_units() {
        let stub = Arc::new(StubTransport::new().on_get(
            "/data/2.5/weather",
            200,
            json!({"main": {"temp": 24.6}, "weather": [{"icon": "01d", "description": "clear"}]}),
        ));
        let report = weather_api(stub.clone(), None)
            .current(Coordinates::new(31.5, 74.3), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.icon, "01d");
        assert_eq!(report.description, "clear");
        assert!((report.temp_c - 24.6).abs() < f64::EPSILON);
        let call = &stub.recorded()[0];
        assert!(call.query.contains(&("units".to_string(), "metric".to_string())));
    }

    #[tokio::test]
    async fn test_missing_condition_is_malformed() {
        let stub = Arc::new(StubTransport::new().on_get(
            "/data/2.5/weather",
            200,
            json!({"main": {"temp": 10.0}, "weather": []}),
        ));
        let result = weather_api(stub, None)
            .current(Coordinates::new(0.0, 0.0), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(AggregationError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_alerts_without_key_are_unsupported() {
        let stub = Arc::new(StubTransport::new());
        let result = weather_api(stub.clone(), None)
            .alerts(Coordinates::new(0.0, 0.0), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(AggregationError::Unsupported(_))));
        assert_eq!(stub.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_alerts_are_mapped() {
        let stub = Arc::new(StubTransport::new().on_get(
            "/v2.0/alerts",
            200,
            json!({"alerts": [{"title": "Heat Advisory", "severity": "Advisory", "regions": ["Punjab"]}]}),
        ));
        let alerts = weather_api(stub, Some("wb"))
            .alerts(Coordinates::new(31.5, 74.3), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].title, "Heat Advisory");
        assert_eq!(alerts[0].regions, vec!["Punjab".to_string()]);
    }
}
