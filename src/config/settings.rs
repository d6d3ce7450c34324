use crate::{error::AggregationError, utils::redact};
use std::{env, fmt, time::Duration};

/// Base URLs of every upstream, overridable for staging or local fakes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub places_base: String,
    pub maps_base: String,
    pub openweather_base: String,
    pub weatherbit_base: String,
    pub wikipedia_base: String,
    pub ninjas_base: String,
    pub amadeus_base: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            places_base: "https://places.googleapis.com/v1".to_string(),
            maps_base: "https://maps.googleapis.com/maps/api".to_string(),
            openweather_base: "https://api.openweathermap.org".to_string(),
            weatherbit_base: "https://api.weatherbit.io".to_string(),
            wikipedia_base: "https://en.wikipedia.org".to_string(),
            ninjas_base: "https://api.api-ninjas.com".to_string(),
            amadeus_base: "https://test.api.amadeus.com".to_string(),
        }
    }
}

impl Endpoints {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            places_base: env_or("PLACES_API_BASE", defaults.places_base),
            maps_base: env_or("MAPS_API_BASE", defaults.maps_base),
            openweather_base: env_or("OPENWEATHER_API_BASE", defaults.openweather_base),
            weatherbit_base: env_or("WEATHERBIT_API_BASE", defaults.weatherbit_base),
            wikipedia_base: env_or("WIKIPEDIA_API_BASE", defaults.wikipedia_base),
            ninjas_base: env_or("NINJAS_API_BASE", defaults.ninjas_base),
            amadeus_base: env_or("AMADEUS_API_BASE", defaults.amadeus_base),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub google_api_key: String,
    pub openweather_api_key: String,
    pub weatherbit_api_key: Option<String>,
    pub ninjas_api_key: String,
    pub amadeus_client_id: String,
    pub amadeus_client_secret: String,
    pub endpoints: Endpoints,
    pub http_timeout_ms: u64,
    pub http_max_concurrent: usize,
    pub http_min_delay_ms: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub failure_cooldown_ms: u64,
    pub max_failure_cooldown_ms: u64,
    pub nearby_radius_m: u32,
    pub log_level: log::LevelFilter,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            google_api_key: String::new(),
            openweather_api_key: String::new(),
            weatherbit_api_key: None,
            ninjas_api_key: String::new(),
            amadeus_client_id: String::new(),
            amadeus_client_secret: String::new(),
            endpoints: Endpoints::default(),
            http_timeout_ms: 10_000,
            http_max_concurrent: 8,
            http_min_delay_ms: 0,
            retry_max_attempts: 3,
            retry_base_delay_ms: 250,
            retry_max_delay_ms: 5_000,
            failure_cooldown_ms: 30_000,
            max_failure_cooldown_ms: 600_000,
            nearby_radius_m: 5_000,
            log_level: log::LevelFilter::Info,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();
        Config {
            google_api_key: env::var("GOOGLE_API_KEY").unwrap_or_default(),
            openweather_api_key: env::var("OPENWEATHER_API_KEY").unwrap_or_default(),
            weatherbit_api_key: env::var("WEATHERBIT_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            ninjas_api_key: env::var("NINJAS_API_KEY").unwrap_or_default(),
            amadeus_client_id: env::var("AMADEUS_CLIENT_ID").unwrap_or_default(),
            amadeus_client_secret: env::var("AMADEUS_CLIENT_SECRET").unwrap_or_default(),
            endpoints: Endpoints::from_env(),
            http_timeout_ms: parse_env("HTTP_TIMEOUT_MS", defaults.http_timeout_ms),
            http_max_concurrent: parse_env("HTTP_MAX_CONCURRENT", defaults.http_max_concurrent),
            http_min_delay_ms: parse_env("HTTP_MIN_DELAY_MS", defaults.http_min_delay_ms),
            retry_max_attempts: parse_env("RETRY_MAX_ATTEMPTS", defaults.retry_max_attempts),
            retry_base_delay_ms: parse_env("RETRY_BASE_DELAY_MS", defaults.retry_base_delay_ms),
            retry_max_delay_ms: parse_env("RETRY_MAX_DELAY_MS", defaults.retry_max_delay_ms),
            failure_cooldown_ms: parse_env("FAILURE_COOLDOWN_MS", defaults.failure_cooldown_ms),
            max_failure_cooldown_ms: parse_env(
                "MAX_FAILURE_COOLDOWN_MS",
                defaults.max_failure_cooldown_ms,
            ),
            nearby_radius_m: parse_env("NEARBY_RADIUS_M", defaults.nearby_radius_m),
            log_level: parse_env("LOG_LEVEL", defaults.log_level),
        }
    }

    /// Check that every required secret is present.
    pub fn validate(&self) -> Result<(), AggregationError> {
        let required = [
            ("GOOGLE_API_KEY", &self.google_api_key),
            ("OPENWEATHER_API_KEY", &self.openweather_api_key),
            ("NINJAS_API_KEY", &self.ninjas_api_key),
            ("AMADEUS_CLIENT_ID", &self.amadeus_client_id),
            ("AMADEUS_CLIENT_SECRET", &self.amadeus_client_secret),
        ];

        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();

        if !missing.is_empty() {
            return Err(AggregationError::Config(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )));
        }
        if self.http_max_concurrent == 0 {
            return Err(AggregationError::Config(
                "HTTP_MAX_CONCURRENT must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn validate_and_log(&self) {
        log::info!("Application Configuration Loaded: {:?}", self);
        if self.weatherbit_api_key.is_none() {
            log::warn!("WEATHERBIT_API_KEY not set; weather alerts will be unavailable");
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn failure_cooldown(&self) -> Duration {
        Duration::from_millis(self.failure_cooldown_ms)
    }

    pub fn max_failure_cooldown(&self) -> Duration {
        Duration::from_millis(self.max_failure_cooldown_ms)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("google_api_key", &redact(&self.google_api_key))
            .field("openweather_api_key", &redact(&self.openweather_api_key))
            .field(
                "weatherbit_api_key",
                &self.weatherbit_api_key.as_deref().map(redact),
            )
            .field("ninjas_api_key", &redact(&self.ninjas_api_key))
            .field("amadeus_client_id", &redact(&self.amadeus_client_id))
            .field("amadeus_client_secret", &redact(&self.amadeus_client_secret))
            .field("endpoints", &self.endpoints)
            .field("http_timeout_ms", &self.http_timeout_ms)
            .field("http_max_concurrent", &self.http_max_concurrent)
            .field("http_min_delay_ms", &self.http_min_delay_ms)
            .field("retry_max_attempts", &self.retry_max_attempts)
            .field("retry_base_delay_ms", &self.retry_base_delay_ms)
            .field("retry_max_delay_ms", &self.retry_max_delay_ms)
            .field("failure_cooldown_ms", &self.failure_cooldown_ms)
            .field("max_failure_cooldown_ms", &self.max_failure_cooldown_ms)
            .field("nearby_radius_m", &self.nearby_radius_m)
            .field("log_level", &self.log_level)
            .finish()
    }
}

fn env_or(name: &str, default: String) -> String {
    env::var(name)
        .ok()
        .map(|v| v.trim().trim_end_matches('/').to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
