//! Entity, identifier and attribute types shared by the resolver, enricher and cache.

use crate::error::AggregationError;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Free-text lookup key (city, place, airline). Always trimmed and non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntityName(String);

impl EntityName {
    pub fn parse(raw: &str) -> Result<Self, AggregationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AggregationError::InvalidInput(
                "entity name must not be empty".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Selects the upstream search used to resolve a name, and namespaces the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    City,
    Country,
    Place,
    Airline,
    Airport,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::City => "city",
            EntityKind::Country => "country",
            EntityKind::Place => "place",
            EntityKind::Airline => "airline",
            EntityKind::Airport => "airport",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = AggregationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "city" => Ok(EntityKind::City),
            "country" => Ok(EntityKind::Country),
            "place" => Ok(EntityKind::Place),
            "airline" => Ok(EntityKind::Airline),
            "airport" => Ok(EntityKind::Airport),
            other => Err(AggregationError::InvalidInput(format!(
                "unknown entity kind '{}'",
                other
            ))),
        }
    }
}

/// Identifier returned by an upstream reference API.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "namespace", content = "value", rename_all = "snake_case")]
pub enum CanonicalId {
    /// Google place id
    Place(String),
    /// IATA airline designator (ICAO when no IATA code is assigned)
    Airline(String),
    /// IATA airport code
    Airport(String),
}

impl CanonicalId {
    pub fn as_str(&self) -> &str {
        match self {
            CanonicalId::Place(id) | CanonicalId::Airline(id) | CanonicalId::Airport(id) => id,
        }
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanonicalId::Place(id) => write!(f, "place:{}", id),
            CanonicalId::Airline(code) => write!(f, "airline:{}", code),
            CanonicalId::Airport(code) => write!(f, "airport:{}", code),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    Photo,
    Weather,
    WeatherAlerts,
    Timezone,
    OpeningHours,
    Summary,
    NearbyPlaces,
    /// Landmarks across a city or country; requested explicitly
    PopularPlaces,
    RoutePolyline,
}

impl AttributeKind {
    /// Attributes that describe a single entity, in display order.
    pub const SINGLE_ENTITY: [AttributeKind; 7] = [
        AttributeKind::Photo,
        AttributeKind::Weather,
        AttributeKind::WeatherAlerts,
        AttributeKind::Timezone,
        AttributeKind::OpeningHours,
        AttributeKind::Summary,
        AttributeKind::NearbyPlaces,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeKind::Photo => "photo",
            AttributeKind::Weather => "weather",
            AttributeKind::WeatherAlerts => "weather_alerts",
            AttributeKind::Timezone => "timezone",
            AttributeKind::OpeningHours => "opening_hours",
            AttributeKind::Summary => "summary",
            AttributeKind::NearbyPlaces => "nearby_places",
            AttributeKind::PopularPlaces => "popular_places",
            AttributeKind::RoutePolyline => "route_polyline",
        }
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttributeKind {
    type Err = AggregationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "photo" => Ok(AttributeKind::Photo),
            "weather" => Ok(AttributeKind::Weather),
            "weather_alerts" | "alerts" => Ok(AttributeKind::WeatherAlerts),
            "timezone" => Ok(AttributeKind::Timezone),
            "opening_hours" | "hours" => Ok(AttributeKind::OpeningHours),
            "summary" => Ok(AttributeKind::Summary),
            "nearby_places" | "nearby" => Ok(AttributeKind::NearbyPlaces),
            "popular_places" | "popular" => Ok(AttributeKind::PopularPlaces),
            "route_polyline" | "route" => Ok(AttributeKind::RoutePolyline),
            other => Err(AggregationError::InvalidInput(format!(
                "unknown attribute '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// `lat,lng` as expected by the maps web services
    pub fn to_query(&self) -> String {
        format!("{},{}", self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherReport {
    /// Rounded to the nearest whole degree
    pub temp_c: i32,
    pub icon: String,
    pub description: String,
}

impl WeatherReport {
    pub fn icon_url(&self) -> String {
        format!("https://openweathermap.org/img/wn/{}@2x.png", self.icon)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherAlert {
    pub title: String,
    pub severity: Option<String>,
    pub description: Option<String>,
    pub regions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearbyPlace {
    pub place_id: String,
    pub name: String,
    pub vicinity: Option<String>,
    pub rating: Option<f64>,
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopularPlace {
    pub place_id: String,
    pub name: String,
    pub address: Option<String>,
    pub location: Option<Coordinates>,
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutePolyline {
    pub points: Vec<Coordinates>,
    pub duration_text: String,
}

/// One enrichable fact about an entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Attribute {
    Photo(String),
    Weather(WeatherReport),
    WeatherAlerts(Vec<WeatherAlert>),
    Timezone(String),
    OpeningHours(Vec<String>),
    Summary(String),
    NearbyPlaces(Vec<NearbyPlace>),
    PopularPlaces(Vec<PopularPlace>),
    RoutePolyline(RoutePolyline),
}

impl Attribute {
    pub fn kind(&self) -> AttributeKind {
        match self {
            Attribute::Photo(_) => AttributeKind::Photo,
            Attribute::Weather(_) => AttributeKind::Weather,
            Attribute::WeatherAlerts(_) => AttributeKind::WeatherAlerts,
            Attribute::Timezone(_) => AttributeKind::Timezone,
            Attribute::OpeningHours(_) => AttributeKind::OpeningHours,
            Attribute::Summary(_) => AttributeKind::Summary,
            Attribute::NearbyPlaces(_) => AttributeKind::NearbyPlaces,
            Attribute::PopularPlaces(_) => AttributeKind::PopularPlaces,
            Attribute::RoutePolyline(_) => AttributeKind::RoutePolyline,
        }
    }
}
