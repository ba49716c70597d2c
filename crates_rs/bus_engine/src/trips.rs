//! Trip registry: creation with human-readable ids, lifecycle and quotes.

use crate::allocator::MAX_SEATS_PER_BOOKING;
use crate::engine::BusEngine;
use crate::error::{EngineError, Result};
use crate::models::{Trip, TripStatus};
use crate::reference::operator_for_trip;
use crate::store::{LockMode, StoreTx};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const TRIP_ID_MAX_LEN: usize = 36;
const DEFAULT_CURRENCY: &str = "SYP";

#[derive(Debug, Clone, Deserialize)]
pub struct NewTrip {
    pub route_id: String,
    /// RFC 3339; a trailing `Z` is accepted.
    pub depart_at: String,
    pub arrive_at: String,
    pub price_cents: i64,
    pub seats_total: i32,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quote {
    pub trip_id: String,
    pub seats: i32,
    pub total_cents: i64,
    pub currency: String,
    pub seats_available: i32,
}

pub(crate) fn parse_timestamp(field: &str, raw: &str) -> Result<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(EngineError::InvalidTimeRange(format!("{field} required")));
    }
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| EngineError::InvalidTimeRange(format!("{field} is not RFC 3339")))
}

fn normalize_currency(raw: Option<&str>) -> Result<String> {
    let c = raw.map(str::trim).unwrap_or_default();
    if c.is_empty() {
        return Ok(DEFAULT_CURRENCY.to_string());
    }
    if c.len() != 3 || !c.chars().all(|ch| ch.is_ascii_alphabetic()) {
        return Err(EngineError::validation("currency must be a 3-letter code"));
    }
    Ok(c.to_ascii_uppercase())
}

/// City name reduced to an upper-case ASCII code of at most 10 characters.
pub(crate) fn city_code(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(10)
        .collect();
    if cleaned.is_empty() {
        return "CITY".to_string();
    }
    cleaned.to_ascii_uppercase()
}

/// Ids tried in order before falling back to a random UUID:
/// `ORIGIN-DEST-YYYYMMDD-HHMM`, then that base suffixed `-1` through `-99`.
pub(crate) fn trip_id_candidates(
    origin_name: &str,
    dest_name: &str,
    depart_at: DateTime<Utc>,
) -> impl Iterator<Item = String> {
    let mut base = format!(
        "{}-{}-{}",
        city_code(origin_name),
        city_code(dest_name),
        depart_at.format("%Y%m%d-%H%M")
    );
    base.truncate(TRIP_ID_MAX_LEN - 3);
    let suffixed = {
        let base = base.clone();
        (1..100).map(move |n| {
            let mut id = format!("{base}-{n}");
            id.truncate(TRIP_ID_MAX_LEN);
            id
        })
    };
    std::iter::once(base).chain(suffixed)
}

async fn generate_trip_id(
    tx: &mut dyn StoreTx,
    origin_name: &str,
    dest_name: &str,
    depart_at: DateTime<Utc>,
) -> Result<String> {
    for candidate in trip_id_candidates(origin_name, dest_name, depart_at) {
        if tx.trip(&candidate, LockMode::Shared).await?.is_none() {
            return Ok(candidate);
        }
    }
    Ok(Uuid::new_v4().to_string())
}

impl BusEngine {
    pub async fn create_trip(&self, new: NewTrip) -> Result<Trip> {
        if new.price_cents <= 0 {
            return Err(EngineError::validation("price_cents must be > 0"));
        }
        if new.seats_total < 1 {
            return Err(EngineError::validation("seats_total must be >= 1"));
        }
        let currency = normalize_currency(new.currency.as_deref())?;
        let depart_at = parse_timestamp("depart_at", &new.depart_at)?;
        let arrive_at = parse_timestamp("arrive_at", &new.arrive_at)?;
        if arrive_at < depart_at {
            return Err(EngineError::InvalidTimeRange(
                "arrive_at precedes depart_at".to_string(),
            ));
        }

        let route_id = new.route_id.trim();
        let mut tx = self.store.begin().await?;
        let route = tx
            .route(route_id)
            .await?
            .ok_or_else(|| EngineError::not_found("route", route_id))?;
        let operator = tx
            .operator(&route.operator_id)
            .await?
            .ok_or_else(|| EngineError::not_found("operator", route.operator_id.as_str()))?;
        if !operator.is_online {
            return Err(EngineError::OperatorOffline);
        }

        let origin_name = tx
            .city(&route.origin_city_id)
            .await?
            .map(|c| c.name)
            .unwrap_or_else(|| "Origin".to_string());
        let dest_name = tx
            .city(&route.dest_city_id)
            .await?
            .map(|c| c.name)
            .unwrap_or_else(|| "Dest".to_string());
        let id = generate_trip_id(tx.as_mut(), &origin_name, &dest_name, depart_at).await?;

        let trip = Trip {
            id,
            route_id: route.id,
            depart_at,
            arrive_at,
            price_cents: new.price_cents,
            currency,
            seats_total: new.seats_total,
            seats_available: new.seats_total,
            status: TripStatus::Draft,
        };
        tx.insert_trip(&trip).await?;
        tx.commit().await?;
        tracing::info!(trip_id = %trip.id, route_id = %trip.route_id, "trip created");
        Ok(trip)
    }

    pub async fn publish_trip(&self, trip_id: &str) -> Result<Trip> {
        self.set_trip_status(trip_id, TripStatus::Published).await
    }

    pub async fn unpublish_trip(&self, trip_id: &str) -> Result<Trip> {
        self.set_trip_status(trip_id, TripStatus::Draft).await
    }

    /// Idempotent. Existing bookings are left untouched.
    pub async fn cancel_trip(&self, trip_id: &str) -> Result<Trip> {
        self.set_trip_status(trip_id, TripStatus::Canceled).await
    }

    async fn set_trip_status(&self, trip_id: &str, status: TripStatus) -> Result<Trip> {
        let trip_id = trip_id.trim();
        let mut tx = self.store.begin().await?;
        let mut trip = tx
            .trip(trip_id, LockMode::Exclusive)
            .await?
            .ok_or_else(|| EngineError::not_found("trip", trip_id))?;

        if trip.status == TripStatus::Canceled && status != TripStatus::Canceled {
            return Err(EngineError::TripCanceled);
        }
        if status == TripStatus::Published {
            let operator = operator_for_trip(tx.as_mut(), &trip).await?;
            if !operator.is_online {
                return Err(EngineError::OperatorOffline);
            }
        }
        if trip.status == status {
            return Ok(trip);
        }

        tx.set_trip_status(trip_id, status).await?;
        tx.commit().await?;
        tracing::info!(trip_id, from = %trip.status, to = %status, "trip status changed");
        trip.status = status;
        Ok(trip)
    }

    pub async fn trip(&self, trip_id: &str) -> Result<Trip> {
        let trip_id = trip_id.trim();
        let mut tx = self.store.begin().await?;
        tx.trip(trip_id, LockMode::Shared)
            .await?
            .ok_or_else(|| EngineError::not_found("trip", trip_id))
    }

    pub async fn quote(&self, trip_id: &str, seats: i32) -> Result<Quote> {
        if !(1..=MAX_SEATS_PER_BOOKING).contains(&seats) {
            return Err(EngineError::InvalidSeatCount);
        }
        let trip = self.trip(trip_id).await?;
        Ok(Quote {
            trip_id: trip.id,
            seats,
            total_cents: trip.price_cents * i64::from(seats),
            currency: trip.currency,
            seats_available: trip.seats_available,
        })
    }
}
