//! Flight offer shaping: categorization, carrier filtering and zone-aware schedules.

use crate::{
    api::FlightOffer,
    enricher::localize_timestamp,
    error::{AggregationError, Result},
    model::CanonicalId,
};
use chrono::NaiveDate;
use itertools::Itertools;
use serde::Serialize;
use std::collections::BTreeMap;

/// Offers shown in the "best" group.
pub const BEST_OFFER_COUNT: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct FlightQuery {
    pub departure_date: NaiveDate,
    pub adults: u32,
    pub max_results: u32,
    /// Keep only offers flown (at least partly) by this carrier code
    pub carrier: Option<String>,
}

impl FlightQuery {
    pub fn new(departure_date: NaiveDate) -> Self {
        Self {
            departure_date,
            adults: 1,
            max_results: 20,
            carrier: None,
        }
    }

    pub fn with_carrier(mut self, carrier: impl Into<String>) -> Self {
        self.carrier = Some(carrier.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.adults == 0 || self.adults > 9 {
            return Err(AggregationError::InvalidInput(format!(
                "adults must be between 1 and 9, got {}",
                self.adults
            )));
        }
        if self.max_results == 0 || self.max_results > 250 {
            return Err(AggregationError::InvalidInput(format!(
                "max_results must be between 1 and 250, got {}",
                self.max_results
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlightCategories {
    pub direct: Vec<FlightOffer>,
    pub connecting: Vec<FlightOffer>,
    pub best: Vec<FlightOffer>,
}

/// Direct offers have a single segment on every itinerary; the rest connect.
/// "Best" is the first few offers in upstream order.
pub fn categorize(offers: &[FlightOffer]) -> FlightCategories {
    let (direct, connecting): (Vec<FlightOffer>, Vec<FlightOffer>) =
        offers.iter().cloned().partition(FlightOffer::is_direct);
    FlightCategories {
        direct,
        connecting,
        best: offers.iter().take(BEST_OFFER_COUNT).cloned().collect(),
    }
}

pub fn filter_by_carrier(offers: Vec<FlightOffer>, carrier: &str) -> Vec<FlightOffer> {
    offers
        .into_iter()
        .filter(|offer| {
            offer
                .itineraries
                .iter()
                .flat_map(|itinerary| &itinerary.segments)
                .any(|segment| segment.carrier_code.eq_ignore_ascii_case(carrier))
        })
        .collect()
}

/// Distinct carrier codes across all offers, sorted.
pub fn carrier_codes(offers: &[FlightOffer]) -> Vec<String> {
    offers
        .iter()
        .flat_map(|offer| &offer.itineraries)
        .flat_map(|itinerary| &itinerary.segments)
        .map(|segment| segment.carrier_code.clone())
        .sorted()
        .dedup()
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledSegment {
    pub flight: String,
    pub from: String,
    pub to: String,
    pub departs_at: String,
    pub arrives_at: String,
    pub duration: Option<String>,
}

/// Every segment of `offer` with times rendered in `zone`.
pub fn schedule(offer: &FlightOffer, zone: Option<&str>) -> Result<Vec<ScheduledSegment>> {
    offer
        .itineraries
        .iter()
        .flat_map(|itinerary| &itinerary.segments)
        .map(|segment| {
            Ok(ScheduledSegment {
                flight: format!("{}{}", segment.carrier_code, segment.number),
                from: segment.departure.iata_code.clone(),
                to: segment.arrival.iata_code.clone(),
                departs_at: localize_timestamp(&segment.departure.at, zone)?,
                arrives_at: localize_timestamp(&segment.arrival.at, zone)?,
                duration: segment.duration.clone(),
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OfferView {
    pub id: String,
    pub price: String,
    pub currency: String,
    pub direct: bool,
    pub segments: Vec<ScheduledSegment>,
}

impl OfferView {
    pub fn from_offer(offer: &FlightOffer, zone: Option<&str>) -> Result<Self> {
        Ok(Self {
            id: offer.id.clone(),
            price: offer.price.total.clone(),
            currency: offer.price.currency.clone(),
            direct: offer.is_direct(),
            segments: schedule(offer, zone)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CarrierView {
    pub name: String,
    pub logo_url: Option<String>,
}

/// Everything a flight results screen needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlightSearchView {
    pub origin: CanonicalId,
    pub destination: CanonicalId,
    pub departure_date: NaiveDate,
    pub destination_timezone: Option<String>,
    pub direct: Vec<OfferView>,
    pub connecting: Vec<OfferView>,
    pub best: Vec<OfferView>,
    pub carriers: BTreeMap<String, CarrierView>,
}

pub(crate) fn offer_views(offers: &[FlightOffer], zone: Option<&str>) -> Result<Vec<OfferView>> {
    offers
        .iter()
        .map(|offer| OfferView::from_offer(offer, zone))
        .collect()
}
