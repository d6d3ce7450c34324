//! Name -> canonical id.
//!
//! The entity kind picks the upstream search: places text search for cities,
//! countries and places, the airline reference API for airlines, and geocoding plus the
//! nearest-airport lookup for airports. The first upstream result wins.

use crate::{
    api::UpstreamApis,
    error::{AggregationError, Result},
    model::{CanonicalId, EntityKind, EntityName},
};
use log::{debug, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct Resolver {
    apis: Arc<UpstreamApis>,
}

impl Resolver {
    pub fn new(apis: Arc<UpstreamApis>) -> Self {
        Self { apis }
    }

    pub async fn resolve(
        &self,
        name: &EntityName,
        kind: EntityKind,
        cancel: &CancellationToken,
    ) -> Result<CanonicalId> {
        let result = match kind {
            EntityKind::City | EntityKind::Country | EntityKind::Place => {
                self.resolve_place(name, cancel).await
            }
            EntityKind::Airline => self.resolve_airline(name, cancel).await,
            EntityKind::Airport => self.resolve_airport(name, cancel).await,
        };

        match &result {
            Ok(id) => debug!("Resolved {} '{}' -> {}", kind, name, id),
            Err(AggregationError::Cancelled) => {}
            Err(e) => warn!(
                "Could not resolve {} '{}' [{:?}]: {}",
                kind,
                name,
                e.categorize(),
                e
            ),
        }
        result
    }

    async fn resolve_place(&self, name: &EntityName, cancel: &CancellationToken) -> Result<CanonicalId> {
        self.apis
            .places
            .search_ids(name.as_str(), cancel)
            .await?
            .into_iter()
            .next()
            .map(CanonicalId::Place)
            .ok_or_else(|| AggregationError::NotFound(format!("no place matches '{}'", name)))
    }

    async fn resolve_airline(&self, name: &EntityName, cancel: &CancellationToken) -> Result<CanonicalId> {
        let record = self.apis.airlines.by_name(name.as_str(), cancel).await?;
        Ok(CanonicalId::Airline(record.code()?))
    }

    async fn resolve_airport(&self, name: &EntityName, cancel: &CancellationToken) -> Result<CanonicalId> {
        let location = self.apis.places.geocode(name.as_str(), cancel).await?;
        let code = self.apis.amadeus.nearest_airport(location, cancel).await?;
        Ok(CanonicalId::Airport(code))
    }
}
