//! The aggregation service: resolver, enricher and caches behind one handle.
//!
//! Construct one `Aggregator` per process and share it by `Arc`. Every lookup
//! goes through the caches, so repeated and concurrent requests for the same
//! `(name, kind, attribute)` reach the upstream at most once.

use crate::{
    api::{OfferSearch, UpstreamApis},
    cache::{AggregationCache, AttributeKey, CacheStats, EntityKey},
    config::Config,
    enricher::Enricher,
    error::{AggregationError, Result},
    flights::{self, CarrierView, FlightQuery, FlightSearchView},
    http::{ApiClient, HttpTransport, ReqwestTransport},
    model::{Attribute, AttributeKind, CanonicalId, EntityKind, EntityName},
    resolver::Resolver,
    utils::Timer,
};
use futures::future::join_all;
use log::{debug, info};
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc};
use tokio_util::sync::CancellationToken;

const VIEW_SLOW_THRESHOLD_MS: u64 = 3_000;

/// Everything known about one entity, with the attributes that could not be fetched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewModel {
    pub name: EntityName,
    pub kind: EntityKind,
    pub id: CanonicalId,
    pub attributes: BTreeMap<AttributeKind, Attribute>,
    pub failures: BTreeMap<AttributeKind, String>,
}

impl ViewModel {
    pub fn get(&self, attribute: AttributeKind) -> Option<&Attribute> {
        self.attributes.get(&attribute)
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Aggregator {
    apis: Arc<UpstreamApis>,
    resolver: Resolver,
    enricher: Enricher,
    ids: AggregationCache<EntityKey, CanonicalId>,
    attributes: AggregationCache<AttributeKey, Attribute>,
}

impl Aggregator {
    pub fn new(config: &Config, transport: Arc<dyn HttpTransport>) -> Self {
        let http = Arc::new(ApiClient::from_config(config, transport));
        let apis = Arc::new(UpstreamApis::new(config, http));
        Self {
            resolver: Resolver::new(apis.clone()),
            enricher: Enricher::new(apis.clone(), config),
            apis,
            ids: AggregationCache::new("ids", config.failure_cooldown(), config.max_failure_cooldown()),
            attributes: AggregationCache::new(
                "attributes",
                config.failure_cooldown(),
                config.max_failure_cooldown(),
            ),
        }
    }

    /// Aggregator talking to the real upstreams over HTTPS.
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(config.http_timeout())?);
        Ok(Self::new(config, transport))
    }

    pub async fn resolve(&self, name: &str, kind: EntityKind, cancel: &CancellationToken) -> Result<CanonicalId> {
        let key = EntityKey::new(EntityName::parse(name)?, kind);
        self.resolve_key(&key, cancel).await
    }

    async fn resolve_key(&self, key: &EntityKey, cancel: &CancellationToken) -> Result<CanonicalId> {
        self.ids
            .get_or_fetch(
                key,
                || self.resolver.resolve(&key.name, key.kind, cancel),
                cancel,
            )
            .await
    }

    /// One attribute of a named entity: resolve (cached), then enrich (cached).
    pub async fn attribute(
        &self,
        name: &str,
        kind: EntityKind,
        attribute: AttributeKind,
        cancel: &CancellationToken,
    ) -> Result<Attribute> {
        if attribute == AttributeKind::RoutePolyline {
            return Err(AggregationError::InvalidInput(
                "use route_between for routes".to_string(),
            ));
        }
        let key = AttributeKey::new(EntityName::parse(name)?, kind, attribute);
        self.attribute_for_key(&key, cancel).await
    }

    async fn attribute_for_key(&self, key: &AttributeKey, cancel: &CancellationToken) -> Result<Attribute> {
        self.attributes
            .get_or_fetch(
                key,
                || async move {
                    let id = self.resolve_key(&key.entity, cancel).await?;
                    self.enricher.enrich(&id, key.attribute, cancel).await
                },
                cancel,
            )
            .await
    }

    /// Resolve `name`, then fetch `attributes` concurrently.
    ///
    /// A failed resolution is returned as the error and nothing is enriched.
    /// Individual attribute failures land in `ViewModel::failures`.
    pub async fn view_model(
        &self,
        name: &str,
        kind: EntityKind,
        attributes: &[AttributeKind],
        cancel: &CancellationToken,
    ) -> Result<ViewModel> {
        let name = EntityName::parse(name)?;
        let entity = EntityKey::new(name.clone(), kind);
        let mut timer = Timer::start(format!("view {}", entity));

        let id = self.resolve_key(&entity, cancel).await?;
        timer.checkpoint("resolve");

        let fetches = attributes
            .iter()
            .filter(|&&attribute| attribute != AttributeKind::RoutePolyline)
            .map(|&attribute| {
                let key = AttributeKey {
                    entity: entity.clone(),
                    attribute,
                };
                async move { (attribute, self.attribute_for_key(&key, cancel).await) }
            });
        let results = join_all(fetches).await;
        timer.checkpoint("enrich");

        if cancel.is_cancelled() {
            return Err(AggregationError::Cancelled);
        }

        let mut view = ViewModel {
            name,
            kind,
            id,
            attributes: BTreeMap::new(),
            failures: BTreeMap::new(),
        };
        for (attribute, result) in results {
            match result {
                Ok(value) => {
                    view.attributes.insert(attribute, value);
                }
                Err(e) => {
                    view.failures.insert(attribute, e.to_string());
                }
            }
        }

        debug!(
            "{}: {} attributes, {} missing",
            entity,
            view.attributes.len(),
            view.failures.len()
        );
        timer.finish_with_threshold(VIEW_SLOW_THRESHOLD_MS);
        Ok(view)
    }

    /// Driving route between two named places, cached per ordered pair.
    pub async fn route_between(
        &self,
        origin: &str,
        destination: &str,
        cancel: &CancellationToken,
    ) -> Result<Attribute> {
        let origin = EntityKey::new(EntityName::parse(origin)?, EntityKind::Place);
        let destination = EntityKey::new(EntityName::parse(destination)?, EntityKind::Place);
        let pair = EntityName::parse(&format!("{} → {}", origin.name, destination.name))?;
        let key = AttributeKey::new(pair, EntityKind::Place, AttributeKind::RoutePolyline);

        self.attributes
            .get_or_fetch(
                &key,
                || async {
                    let (from, to) = tokio::try_join!(
                        self.resolve_key(&origin, cancel),
                        self.resolve_key(&destination, cancel)
                    )?;
                    self.enricher.route(&from, &to, cancel).await
                },
                cancel,
            )
            .await
    }

    /// Flight offers between the airports nearest two cities, grouped for display.
    ///
    /// Offers are not cached. Carrier logos and the destination time zone go
    /// through the attribute cache; either may be missing from the result.
    pub async fn search_flights(
        &self,
        origin: &str,
        destination: &str,
        query: &FlightQuery,
        cancel: &CancellationToken,
    ) -> Result<FlightSearchView> {
        query.validate()?;
        let mut timer = Timer::start(format!("flights {} → {}", origin, destination));

        let (from, to) = tokio::try_join!(
            self.resolve(origin, EntityKind::Airport, cancel),
            self.resolve(destination, EntityKind::Airport, cancel)
        )?;
        timer.checkpoint("airports");

        let search = OfferSearch {
            origin: from.as_str().to_string(),
            destination: to.as_str().to_string(),
            departure_date: query.departure_date,
            adults: query.adults,
            max_results: query.max_results,
        };
        let found = self.apis.amadeus.flight_offers(&search, cancel).await?;
        timer.checkpoint("offers");

        let offers = match &query.carrier {
            Some(carrier) => flights::filter_by_carrier(found.offers, carrier),
            None => found.offers,
        };
        let codes = flights::carrier_codes(&offers);

        let logos = codes.iter().map(|code| {
            let name = found.carriers.get(code).cloned().unwrap_or_else(|| code.clone());
            async move {
                let logo = match self.attribute(&name, EntityKind::Airline, AttributeKind::Photo, cancel).await {
                    Ok(Attribute::Photo(url)) => Some(url),
                    _ => None,
                };
                (code.clone(), CarrierView { name, logo_url: logo })
            }
        });
        let (carriers, zone) = tokio::join!(
            join_all(logos),
            self.attribute(destination, EntityKind::City, AttributeKind::Timezone, cancel)
        );
        timer.checkpoint("carriers");

        if cancel.is_cancelled() {
            return Err(AggregationError::Cancelled);
        }

        let zone = match zone {
            Ok(Attribute::Timezone(zone)) => Some(zone),
            _ => None,
        };
        let categories = flights::categorize(&offers);
        let view = FlightSearchView {
            origin: from,
            destination: to,
            departure_date: query.departure_date,
            direct: flights::offer_views(&categories.direct, zone.as_deref())?,
            connecting: flights::offer_views(&categories.connecting, zone.as_deref())?,
            best: flights::offer_views(&categories.best, zone.as_deref())?,
            destination_timezone: zone,
            carriers: carriers.into_iter().collect(),
        };

        info!(
            "{} offers {} → {} ({} direct, {} connecting)",
            offers.len(),
            view.origin,
            view.destination,
            view.direct.len(),
            view.connecting.len()
        );
        timer.finish_with_threshold(VIEW_SLOW_THRESHOLD_MS);
        Ok(view)
    }

    /// Combined statistics of the id and attribute caches.
    pub fn cache_stats(&self) -> CacheStats {
        self.ids.stats().merge(&self.attributes.stats())
    }

    pub fn log_cache_stats(&self) {
        self.ids.log_stats();
        self.attributes.log_stats();
    }
}
